//! Economics analysis: three independent lenses, then one report.
//!
//! ```text
//!            ┌─ revenue streams ──────┐
//! content ──▶├─ pricing strategy ─────├──▶ economics report
//!            └─ monetization pipeline ┘
//! ```
//!
//! The lenses run as one concurrent [`TaskGroup`]; the report is a
//! [`SynthesisStage`] over their tagged outputs, skipped when every lens
//! failed.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use diligence_core::orchestrator::TaskOutcome;
use diligence_core::{AgentTask, Orchestrator, Stage, Status, SynthesisStage, TaskGroup};

use crate::prompts;

pub const REVENUE_LENS: &str = "revenue_streams";
pub const PRICING_LENS: &str = "pricing_strategy";
pub const MONETIZATION_LENS: &str = "monetization_pipeline";

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisOutput {
    pub run_id: String,
    pub generated_at: String,
    pub status: Status,
    /// Lens outcomes in declared order, placeholders included.
    pub lenses: Vec<TaskOutcome>,
    pub report: Option<String>,
    pub failure_reason: Option<String>,
}

impl SynthesisOutput {
    fn new(status: Status, lenses: Vec<TaskOutcome>, report: Option<String>, reason: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().to_rfc3339(),
            status,
            lenses,
            report,
            failure_reason: reason,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

pub fn lens_group(content: &str) -> TaskGroup {
    TaskGroup::new(
        "economics lenses",
        vec![
            AgentTask::text(REVENUE_LENS, prompts::REVENUE_LENS, content),
            AgentTask::text(PRICING_LENS, prompts::PRICING_LENS, content),
            AgentTask::text(MONETIZATION_LENS, prompts::MONETIZATION_LENS, content),
        ],
    )
}

#[derive(Clone)]
pub struct EconomicsAnalyzer {
    orchestrator: Orchestrator,
}

impl EconomicsAnalyzer {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn run(&self, content: &str) -> SynthesisOutput {
        if content.trim().is_empty() {
            warn!("economics analysis requested with empty content");
            return SynthesisOutput::new(
                Status::Failed,
                Vec::new(),
                None,
                Some("content is required".to_string()),
            );
        }

        let stages = [
            Stage::Group(lens_group(content)),
            Stage::Synthesis(
                SynthesisStage::new("economics report", prompts::ECONOMICS_REPORT)
                    .skip_when_upstream_failed(),
            ),
        ];
        let mut context = self.orchestrator.run_sequential(&stages).await;
        let report = context.outcomes.pop();
        let lenses = context.outcomes;
        let succeeded = lenses.iter().filter(|l| l.is_success()).count();

        if succeeded == 0 {
            warn!("every economics lens failed; report synthesis skipped");
            return SynthesisOutput::new(
                Status::Failed,
                lenses,
                None,
                Some("all economics analyses failed".to_string()),
            );
        }

        info!(
            lenses_succeeded = succeeded,
            report = report.as_ref().is_some_and(TaskOutcome::is_success),
            "economics analysis complete"
        );

        match report {
            Some(report) if report.is_success() => {
                SynthesisOutput::new(Status::Success, lenses, Some(report.output), None)
            }
            report => SynthesisOutput::new(
                Status::Failed,
                lenses,
                None,
                Some(format!(
                    "report synthesis failed: {}",
                    report.and_then(|r| r.error).unwrap_or_default()
                )),
            ),
        }
    }
}
