//! Page rasterizing.
//!
//! A [`Rasterizer`] turns PDF bytes into one PNG per page. The default
//! [`PdftoppmRasterizer`] shells out to poppler's `pdftoppm` inside a
//! scratch directory. [`NoRasterizer`] renders nothing, leaving every unit
//! without a visual.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::PipelineConfig;

/// Renders PDF pages to PNG bytes keyed by 1-based page number.
///
/// Pages that fail to render are simply absent from the map.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, pdf: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>>;
}

/// Renders nothing.
pub struct NoRasterizer;

#[async_trait]
impl Rasterizer for NoRasterizer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn render(&self, _pdf: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>> {
        Ok(BTreeMap::new())
    }
}

/// `pdftoppm -png -r <dpi>` in a temporary directory.
pub struct PdftoppmRasterizer {
    program: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self {
            program: "pdftoppm".to_string(),
            dpi,
        }
    }

    /// Use a different executable, e.g. an absolute path to `pdftoppm`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Rasterizer for PdftoppmRasterizer {
    fn name(&self) -> &str {
        "pdftoppm"
    }

    async fn render(&self, pdf: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>> {
        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        let input = scratch.path().join("input.pdf");
        tokio::fs::write(&input, pdf)
            .await
            .with_context(|| format!("Failed to write {}", input.display()))?;

        let prefix = scratch.path().join("page");
        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(&input)
            .arg(&prefix)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed: {}", self.program, stderr.trim());
        }

        collect_pages(scratch.path()).await
    }
}

/// Reads `page-N.png` files (pdftoppm zero-pads N by page count).
async fn collect_pages(dir: &Path) -> Result<BTreeMap<u32, Vec<u8>>> {
    let mut pages = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(page) = page_number(&name) else {
            continue;
        };
        let bytes = tokio::fs::read(entry.path())
            .await
            .with_context(|| format!("Failed to read {}", name))?;
        pages.insert(page, bytes);
    }
    Ok(pages)
}

fn page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

/// The rasterizer named by `pipeline.rasterizer`.
pub fn create_rasterizer(config: &PipelineConfig) -> Result<Arc<dyn Rasterizer>> {
    match config.rasterizer.as_str() {
        "disabled" => Ok(Arc::new(NoRasterizer)),
        "pdftoppm" => Ok(Arc::new(PdftoppmRasterizer::new(config.render_dpi))),
        other => bail!("Unknown rasterizer: {}", other),
    }
}
