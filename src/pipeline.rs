//! The analysis pipeline facade.
//!
//! ```text
//! bytes ──▶ PageDecomposer ──▶ PageAnalyzer (N concurrent) ──▶ CorpusAggregator ──▶ DocumentResult
//!                                                                   │
//!                                          ┌────────────────────────┴──────────┐
//!                                          ▼                                   ▼
//!                                   EconomicsAnalyzer                  VerificationEngine
//!                                          └──────────────┬────────────────────┘
//!                                                         ▼
//!                                                   InvestorReport
//! ```
//!
//! [`Analyzer`] owns one of each stage, all sharing a single inference
//! client, and is what the CLI and the HTTP server call into.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use diligence_core::orchestrator::{NoObserver, TaskObserver};
use diligence_core::{
    DocumentResult, FactCheckReport, InferenceClient, Orchestrator, SourceUnit, TextKind,
    UnitResult, VerificationEngine,
};

use crate::aggregate::CorpusAggregator;
use crate::analyze::PageAnalyzer;
use crate::config::Config;
use crate::decompose::PageDecomposer;
use crate::economics::{EconomicsAnalyzer, SynthesisOutput};
use crate::inference::{create_client, Secrets};
use crate::raster::{create_rasterizer, Rasterizer};

/// Document analysis followed by economics and fact-checking of its corpus.
#[derive(Debug, Clone, Serialize)]
pub struct InvestorReport {
    pub run_id: String,
    pub generated_at: String,
    pub document: DocumentResult,
    /// Absent when the document failed.
    pub economics: Option<SynthesisOutput>,
    /// Absent when the document failed.
    pub fact_check: Option<FactCheckReport>,
}

#[derive(Clone)]
pub struct Analyzer {
    decomposer: PageDecomposer,
    pages: PageAnalyzer,
    aggregator: CorpusAggregator,
    economics: EconomicsAnalyzer,
    verifier: VerificationEngine,
    max_document_bytes: usize,
}

impl Analyzer {
    pub fn new(
        config: &Config,
        client: Arc<dyn InferenceClient>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Self {
        let orchestrator = Orchestrator::new(client.clone(), config.pipeline.max_concurrency);
        Self {
            decomposer: PageDecomposer::new(rasterizer),
            pages: PageAnalyzer::new(orchestrator.clone()),
            aggregator: CorpusAggregator::new(orchestrator.clone()),
            economics: EconomicsAnalyzer::new(orchestrator),
            verifier: VerificationEngine::new(client, config.verification_settings()),
            max_document_bytes: config.pipeline.max_document_bytes,
        }
    }

    /// Builds the configured client and rasterizer.
    pub fn from_config(config: &Config, secrets: Secrets) -> Result<Self> {
        let client = create_client(config, secrets)?;
        let rasterizer = create_rasterizer(&config.pipeline)?;
        info!(
            provider = client.name(),
            rasterizer = rasterizer.name(),
            concurrency = config.pipeline.max_concurrency,
            "analyzer ready"
        );
        Ok(Self::new(config, client, rasterizer))
    }

    pub fn max_document_bytes(&self) -> usize {
        self.max_document_bytes
    }

    pub async fn analyze_document(&self, bytes: &[u8]) -> DocumentResult {
        self.analyze_document_observed(bytes, &NoObserver).await
    }

    pub async fn analyze_document_observed(
        &self,
        bytes: &[u8],
        observer: &dyn TaskObserver,
    ) -> DocumentResult {
        if bytes.len() > self.max_document_bytes {
            warn!(
                bytes = bytes.len(),
                limit = self.max_document_bytes,
                "document rejected as too large"
            );
            return DocumentResult::failed(format!(
                "document is {} bytes; the limit is {} bytes",
                bytes.len(),
                self.max_document_bytes
            ));
        }

        let decomposition = self.decomposer.decompose(bytes).await;
        let result = self.analyze_units(&decomposition.units, observer).await;
        let result = result.with_fingerprint(decomposition.fingerprint);
        match decomposition.format {
            Some(format) => result.with_format(format.as_str()),
            None => result,
        }
    }

    /// Page analysis and consolidation over already decomposed units.
    pub async fn analyze_units(
        &self,
        units: &[SourceUnit],
        observer: &dyn TaskObserver,
    ) -> DocumentResult {
        if units.is_empty() {
            warn!("decomposition produced no units; nothing to analyze");
            return DocumentResult::failed("document could not be opened or has no pages");
        }

        let results = self.pages.analyze(units, observer).await;
        let summary = self.aggregator.aggregate(&results).await;
        let document = DocumentResult::assemble(results, summary);
        info!(
            run_id = %document.run_id,
            total_units = document.total_units,
            successful_units = document.successful_units,
            status = ?document.status,
            "document analysis complete"
        );
        document
    }

    pub async fn analyze_text(&self, text: &str, kind: TextKind) -> UnitResult {
        self.pages.analyze_text(text, kind).await
    }

    pub async fn run_economics(&self, content: &str) -> SynthesisOutput {
        self.economics.run(content).await
    }

    pub async fn verify(&self, text: &str) -> FactCheckReport {
        self.verifier.verify(text).await
    }

    /// Economics and fact-checking run concurrently over the corpus.
    pub async fn full_report(&self, bytes: &[u8], observer: &dyn TaskObserver) -> InvestorReport {
        let document = self.analyze_document_observed(bytes, observer).await;

        let (economics, fact_check) = match document.corpus_summary.as_deref() {
            Some(corpus) if document.is_success() => {
                let (economics, fact_check) =
                    futures::join!(self.run_economics(corpus), self.verify(corpus));
                (Some(economics), Some(fact_check))
            }
            _ => {
                warn!("document analysis failed; skipping economics and fact-check");
                (None, None)
            }
        };

        InvestorReport {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            document,
            economics,
            fact_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::DisabledClient;
    use crate::raster::NoRasterizer;

    fn analyzer(config: &Config) -> Analyzer {
        Analyzer::new(config, Arc::new(DisabledClient), Arc::new(NoRasterizer))
    }

    #[tokio::test]
    async fn oversized_document_is_a_stage_failure() {
        let mut config = Config::minimal();
        config.pipeline.max_document_bytes = 8;
        let result = analyzer(&config).analyze_document(b"%PDF-1.4 way too long").await;
        assert!(!result.is_success());
        assert_eq!(result.total_units, 0);
        assert!(result.failure_reason.unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn unreadable_document_short_circuits() {
        let result = analyzer(&Config::minimal())
            .analyze_document(b"plain text is not a deck")
            .await;
        assert!(!result.is_success());
        assert!(result.unit_results.is_empty());
        assert!(result.fingerprint.is_some());
        assert!(result.format.is_none());
    }

    #[tokio::test]
    async fn failed_document_skips_downstream_stages() {
        let report = analyzer(&Config::minimal())
            .full_report(b"nope", &NoObserver)
            .await;
        assert!(report.economics.is_none());
        assert!(report.fact_check.is_none());
    }
}
