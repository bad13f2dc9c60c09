//! Directory batch analysis.
//!
//! Walks a directory, keeps files matching `pipeline.include_globs`, and
//! analyzes them one after another.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::warn;
use walkdir::WalkDir;

use diligence_core::orchestrator::TaskObserver;
use diligence_core::{DocumentResult, Status};

use crate::pipeline::Analyzer;

/// Outcome for one file of a batch.
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub status: Status,
    pub total_units: usize,
    pub successful_units: usize,
    pub failure_reason: Option<String>,
    #[serde(skip)]
    pub result: Option<DocumentResult>,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Matching files under `root`, sorted by relative path.
pub fn discover(root: &Path, include_globs: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", root.display());
    }
    let includes = build_globset(include_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if includes.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Analyzes every matching file. A file that cannot be read becomes a
/// failed entry; the batch continues.
pub async fn run_batch(
    analyzer: &Analyzer,
    root: &Path,
    include_globs: &[String],
    observer: &dyn TaskObserver,
) -> Result<Vec<BatchEntry>> {
    let files = discover(root, include_globs)?;
    let mut entries = Vec::with_capacity(files.len());

    for path in files {
        let entry = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let result = analyzer.analyze_document_observed(&bytes, observer).await;
                BatchEntry {
                    path,
                    status: result.status,
                    total_units: result.total_units,
                    successful_units: result.successful_units,
                    failure_reason: result.failure_reason.clone(),
                    result: Some(result),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read file");
                BatchEntry {
                    path,
                    status: Status::Failed,
                    total_units: 0,
                    successful_units: 0,
                    failure_reason: Some(format!("read failed: {}", e)),
                    result: None,
                }
            }
        };
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    #[test]
    fn discovers_matching_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("decks/2024")).unwrap();
        std::fs::write(dir.path().join("decks/2024/acme.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("memo.docx"), b"PK").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();

        let files = discover(dir.path(), &PipelineConfig::default().include_globs).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["acme.pdf", "memo.docx"]);
    }

    #[test]
    fn rejects_missing_directory_and_bad_globs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&dir.path().join("missing"), &[]).is_err());
        assert!(discover(dir.path(), &["[".to_string()]).is_err());
    }
}
