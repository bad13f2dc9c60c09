//! Core data types for the document analysis pipeline.
//!
//! A document is decomposed into [`SourceUnit`]s, each unit is analyzed
//! into a [`UnitResult`], and the results are assembled into one terminal
//! [`DocumentResult`]. Every result carries an explicit [`Status`]; callers
//! must never infer success from the mere presence of a result.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal status of a unit, a document, or a synthesis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failed,
}

/// Raw text artifacts that skip page decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Email,
    CallTranscript,
}

impl TextKind {
    pub fn label(&self) -> &'static str {
        match self {
            TextKind::Email => "email",
            TextKind::CallTranscript => "call transcript",
        }
    }
}

impl std::str::FromStr for TextKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(TextKind::Email),
            "call" | "call_transcript" => Ok(TextKind::CallTranscript),
            other => Err(format!(
                "unknown text kind '{}': expected email or call_transcript",
                other
            )),
        }
    }
}

/// One page of a document, or one whole text blob.
///
/// Created once at decomposition time and immutable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct SourceUnit {
    ordinal: u32,
    text: String,
    #[serde(skip)]
    visual: Option<Arc<[u8]>>,
    has_content: bool,
}

impl SourceUnit {
    /// Builds a unit. `ordinal` is 1-based.
    pub fn new(ordinal: u32, text: impl Into<String>, visual: Option<Vec<u8>>) -> Self {
        let text = text.into();
        let visual: Option<Arc<[u8]>> = visual.map(Arc::from);
        let has_content = !text.trim().is_empty() || visual.is_some();
        Self {
            ordinal,
            text,
            visual,
            has_content,
        }
    }

    /// A whole text blob as the single unit of its document.
    pub fn text_blob(text: impl Into<String>) -> Self {
        Self::new(1, text, None)
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn visual(&self) -> Option<&Arc<[u8]>> {
        self.visual.as_ref()
    }

    pub fn has_content(&self) -> bool {
        self.has_content
    }
}

/// Outcome of analyzing one [`SourceUnit`].
///
/// `analysis_text` is present iff the status is success, and
/// `failure_reason` is present iff it failed.
#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    ordinal: u32,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
}

impl UnitResult {
    pub fn success(ordinal: u32, analysis_text: impl Into<String>) -> Self {
        Self {
            ordinal,
            status: Status::Success,
            analysis_text: Some(analysis_text.into()),
            failure_reason: None,
        }
    }

    pub fn failed(ordinal: u32, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = "unknown failure".to_string();
        }
        Self {
            ordinal,
            status: Status::Failed,
            analysis_text: None,
            failure_reason: Some(reason),
        }
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn analysis_text(&self) -> Option<&str> {
        self.analysis_text.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

/// Aggregate result for one document. Terminal and read-only once built.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResult {
    pub run_id: String,
    pub generated_at: String,
    /// Detected container format (`pdf`, `pptx`, `docx`), when known.
    pub format: Option<String>,
    /// Hex SHA-256 of the input bytes, when computed by the caller.
    pub fingerprint: Option<String>,
    pub status: Status,
    pub total_units: usize,
    pub successful_units: usize,
    /// Ordered by ordinal.
    pub unit_results: Vec<UnitResult>,
    pub corpus_summary: Option<String>,
    pub failure_reason: Option<String>,
}

impl DocumentResult {
    /// A stage-level failure: no units, no summary.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            format: None,
            fingerprint: None,
            status: Status::Failed,
            total_units: 0,
            successful_units: 0,
            unit_results: Vec::new(),
            corpus_summary: None,
            failure_reason: Some(reason.into()),
        }
    }

    /// Assembles a result from unit outcomes and the aggregation outcome.
    ///
    /// Unit results are sorted by ordinal. A missing summary makes the
    /// document failed with `summary`'s error as the reason.
    pub fn assemble(mut unit_results: Vec<UnitResult>, summary: Result<String, String>) -> Self {
        unit_results.sort_by_key(|r| r.ordinal());
        let successful_units = unit_results.iter().filter(|r| r.is_success()).count();
        let (status, corpus_summary, failure_reason) = match summary {
            Ok(text) => (Status::Success, Some(text), None),
            Err(reason) => (Status::Failed, None, Some(reason)),
        };
        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            format: None,
            fingerprint: None,
            status,
            total_units: unit_results.len(),
            successful_units,
            unit_results,
            corpus_summary,
            failure_reason,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_content_reflects_text_or_visual() {
        assert!(!SourceUnit::new(1, "   \n", None).has_content());
        assert!(SourceUnit::new(1, "", Some(vec![0x89, b'P'])).has_content());
        assert!(SourceUnit::text_blob("hello").has_content());
    }

    #[test]
    fn failed_unit_always_has_reason() {
        let r = UnitResult::failed(2, "");
        assert_eq!(r.status(), Status::Failed);
        assert_eq!(r.failure_reason(), Some("unknown failure"));
        assert!(r.analysis_text().is_none());
    }

    #[test]
    fn assemble_restores_ordinal_order() {
        let doc = DocumentResult::assemble(
            vec![
                UnitResult::success(3, "c"),
                UnitResult::failed(1, "boom"),
                UnitResult::success(2, "b"),
            ],
            Ok("summary".to_string()),
        );
        let ordinals: Vec<u32> = doc.unit_results.iter().map(|r| r.ordinal()).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert_eq!(doc.total_units, 3);
        assert_eq!(doc.successful_units, 2);
        assert!(doc.is_success());
    }

    #[test]
    fn unit_result_serializes_status_lowercase() {
        let json = serde_json::to_value(UnitResult::failed(1, "timeout")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure_reason"], "timeout");
        assert!(json.get("analysis_text").is_none());
    }

    #[test]
    fn text_kind_parses_aliases() {
        assert_eq!("call".parse::<TextKind>().unwrap(), TextKind::CallTranscript);
        assert!("memo".parse::<TextKind>().is_err());
    }
}
