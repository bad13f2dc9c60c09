//! Corpus consolidation over successful page analyses.

use diligence_core::orchestrator::{StageContext, TaskOutcome};
use diligence_core::{Orchestrator, Status, SynthesisStage, UnitResult};
use tracing::warn;

use crate::analyze::page_task_name;
use crate::prompts;

#[derive(Clone)]
pub struct CorpusAggregator {
    orchestrator: Orchestrator,
}

impl CorpusAggregator {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// One consolidation call over the successful units, tagged by page.
    ///
    /// With no successful unit, no call is made and the error explains why.
    pub async fn aggregate(&self, results: &[UnitResult]) -> Result<String, String> {
        let context = StageContext::from_outcomes(results.iter().filter_map(|r| {
            let text = r.analysis_text()?;
            Some(TaskOutcome {
                name: page_task_name(r.ordinal()),
                status: Status::Success,
                output: text.to_string(),
                error: None,
            })
        }));

        if context.is_empty() {
            warn!(units = results.len(), "no successful page analyses; skipping consolidation");
            return Err(format!(
                "all {} page analyses failed; nothing to consolidate",
                results.len()
            ));
        }

        let stage = SynthesisStage::new("corpus consolidation", prompts::CONSOLIDATION_INSTRUCTION);
        let outcome = self.orchestrator.synthesize(&stage, &context).await;
        if outcome.is_success() {
            Ok(outcome.output)
        } else {
            Err(format!(
                "consolidation failed: {}",
                outcome.error.unwrap_or_default()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use diligence_core::{GenerateRequest, InferenceClient, InferenceError, SearchHit};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InferenceClient for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
            self.prompts.lock().unwrap().push(request.prompt);
            Ok("corpus".into())
        }

        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, InferenceError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn only_successful_pages_reach_the_prompt() {
        let client = Arc::new(Recorder::default());
        let aggregator = CorpusAggregator::new(Orchestrator::new(client.clone(), 4));
        let results = vec![
            UnitResult::success(1, "cover page"),
            UnitResult::failed(2, "timeout"),
            UnitResult::success(3, "financials"),
        ];

        assert_eq!(aggregator.aggregate(&results).await, Ok("corpus".to_string()));

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("=== page 1 ===\ncover page"));
        assert!(prompts[0].contains("=== page 3 ===\nfinancials"));
        assert!(!prompts[0].contains("page 2"));
    }

    #[tokio::test]
    async fn zero_successes_skip_the_call() {
        let client = Arc::new(Recorder::default());
        let aggregator = CorpusAggregator::new(Orchestrator::new(client.clone(), 4));
        let results = vec![UnitResult::failed(1, "x"), UnitResult::failed(2, "y")];

        assert!(aggregator.aggregate(&results).await.is_err());
        assert!(client.prompts.lock().unwrap().is_empty());
    }
}
