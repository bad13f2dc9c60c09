//! Page-level document decomposition.
//!
//! Splits raw document bytes into ordered [`SourceUnit`]s:
//!
//! | Format | Detected by | Units |
//! |--------|-------------|-------|
//! | PDF | `%PDF` magic | one per page, text plus rendered PNG |
//! | PPTX | ZIP with `ppt/slides/` | one per slide, text only |
//! | DOCX | ZIP with `word/document.xml` | one for the whole body |
//!
//! Anything that cannot be opened or parsed yields no units. Ordinals are
//! 1-based and contiguous even when a page has no text.

use std::io::Read;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use diligence_core::SourceUnit;

use crate::raster::Rasterizer;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Pptx,
    Docx,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::Docx => "docx",
        }
    }
}

#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("unsupported document format")]
    UnsupportedFormat,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Detects the container format from the leading bytes and ZIP directory.
pub fn sniff(bytes: &[u8]) -> Option<DocumentFormat> {
    if bytes.starts_with(b"%PDF") {
        return Some(DocumentFormat::Pdf);
    }
    if !bytes.starts_with(b"PK") {
        return None;
    }
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).ok()?;
    if archive.file_names().any(|n| n.starts_with("ppt/slides/")) {
        return Some(DocumentFormat::Pptx);
    }
    if archive.file_names().any(|n| n == "word/document.xml") {
        return Some(DocumentFormat::Docx);
    }
    None
}

/// Hex SHA-256 of the input bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Units of one document plus what was learned about it.
#[derive(Debug)]
pub struct Decomposition {
    pub format: Option<DocumentFormat>,
    pub fingerprint: String,
    pub units: Vec<SourceUnit>,
}

/// Splits documents into units, rendering PDF pages with a [`Rasterizer`].
#[derive(Clone)]
pub struct PageDecomposer {
    rasterizer: Arc<dyn Rasterizer>,
}

impl PageDecomposer {
    pub fn new(rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self { rasterizer }
    }

    /// Never fails: unreadable input gives an empty unit list.
    pub async fn decompose(&self, bytes: &[u8]) -> Decomposition {
        let fingerprint = fingerprint(bytes);
        let format = sniff(bytes);

        let pages = match format {
            Some(format) => extract_units_text(bytes.to_vec(), format).await,
            None => Err(DecomposeError::UnsupportedFormat),
        };
        let pages = match pages {
            Ok(pages) => pages,
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "document could not be decomposed");
                return Decomposition {
                    format,
                    fingerprint,
                    units: Vec::new(),
                };
            }
        };

        let mut visuals = if format == Some(DocumentFormat::Pdf) && !pages.is_empty() {
            match self.rasterizer.render(bytes).await {
                Ok(visuals) => visuals,
                Err(e) => {
                    warn!(
                        rasterizer = self.rasterizer.name(),
                        error = %e,
                        "page rendering failed; continuing without visuals"
                    );
                    Default::default()
                }
            }
        } else {
            Default::default()
        };

        let units: Vec<SourceUnit> = pages
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let ordinal = idx as u32 + 1;
                SourceUnit::new(ordinal, text, visuals.remove(&ordinal))
            })
            .collect();

        debug!(
            format = format.map(|f| f.as_str()),
            units = units.len(),
            with_visual = units.iter().filter(|u| u.visual().is_some()).count(),
            "document decomposed"
        );

        Decomposition {
            format,
            fingerprint,
            units,
        }
    }
}

/// Per-unit text. PDF parsing runs on the blocking pool, where a panic
/// in the parser surfaces as a join error.
async fn extract_units_text(
    bytes: Vec<u8>,
    format: DocumentFormat,
) -> Result<Vec<String>, DecomposeError> {
    match format {
        DocumentFormat::Pdf => tokio::task::spawn_blocking(move || extract_pdf_pages(&bytes))
            .await
            .map_err(|e| DecomposeError::Pdf(e.to_string()))?,
        DocumentFormat::Pptx => extract_pptx_slides(&bytes),
        DocumentFormat::Docx => extract_docx(&bytes).map(|text| vec![text]),
    }
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, DecomposeError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map(|pages| pages.into_iter().map(|p| p.trim().to_string()).collect())
        .map_err(|e| DecomposeError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, DecomposeError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| DecomposeError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| DecomposeError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(DecomposeError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, DecomposeError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| DecomposeError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    text_runs(&xml, b"p")
}

fn extract_pptx_slides(bytes: &[u8]) -> Result<Vec<String>, DecomposeError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| DecomposeError::Ooxml(e.to_string()))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut slides = Vec::with_capacity(slide_names.len());
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        slides.push(text_runs(&xml, b"p")?);
    }
    Ok(slides)
}

/// Concatenates `<*:t>` runs, starting a new line at the end of every
/// `paragraph` element (`w:p` in Word, `a:p` in DrawingML). Runs split
/// words arbitrarily, so they are joined without separators.
fn text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, DecomposeError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| DecomposeError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DecomposeError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::NoRasterizer;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn slide(text: &str) -> String {
        format!(
            r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#,
            text
        )
    }

    fn decomposer() -> PageDecomposer {
        PageDecomposer::new(Arc::new(NoRasterizer))
    }

    #[test]
    fn sniffs_formats() {
        assert_eq!(sniff(b"%PDF-1.7 ..."), Some(DocumentFormat::Pdf));
        assert_eq!(sniff(b"hello"), None);
        let pptx = zip_with(&[("ppt/slides/slide1.xml", "<x/>")]);
        assert_eq!(sniff(&pptx), Some(DocumentFormat::Pptx));
        let docx = zip_with(&[("word/document.xml", "<x/>")]);
        assert_eq!(sniff(&docx), Some(DocumentFormat::Docx));
        let other = zip_with(&[("readme.txt", "hi")]);
        assert_eq!(sniff(&other), None);
    }

    #[tokio::test]
    async fn pptx_slides_are_ordered_numerically() {
        let s2 = slide("Traction: 40 pilots");
        let s10 = slide("Ask: $3M seed");
        let s1 = slide("Acme Robotics");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);

        let doc = decomposer().decompose(&bytes).await;
        assert_eq!(doc.format, Some(DocumentFormat::Pptx));
        let texts: Vec<&str> = doc.units.iter().map(|u| u.text()).collect();
        assert_eq!(texts, vec!["Acme Robotics", "Traction: 40 pilots", "Ask: $3M seed"]);
        let ordinals: Vec<u32> = doc.units.iter().map(|u| u.ordinal()).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert!(doc.units.iter().all(|u| u.visual().is_none()));
    }

    #[tokio::test]
    async fn docx_is_one_unit_with_paragraph_breaks() {
        let body = r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>First line</w:t></w:r></w:p><w:p><w:r><w:t xml:space="preserve">Second </w:t></w:r><w:r><w:t>line</w:t></w:r></w:p></w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", body)]);

        let doc = decomposer().decompose(&bytes).await;
        assert_eq!(doc.units.len(), 1);
        assert_eq!(doc.units[0].text(), "First line\nSecond line");
        assert!(doc.units[0].has_content());
    }

    #[tokio::test]
    async fn unreadable_input_gives_no_units() {
        let doc = decomposer().decompose(b"definitely not a document").await;
        assert!(doc.units.is_empty());
        assert_eq!(doc.format, None);
        assert_eq!(doc.fingerprint.len(), 64);

        let broken_pdf = decomposer().decompose(b"%PDF-1.4 truncated").await;
        assert!(broken_pdf.units.is_empty());
        assert_eq!(broken_pdf.format, Some(DocumentFormat::Pdf));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
