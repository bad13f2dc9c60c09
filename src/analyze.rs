//! Per-unit analysis: document pages and raw text artifacts.
//!
//! Every page becomes one vision task in a single [`TaskGroup`]; the
//! [`Orchestrator`] runs them with bounded concurrency and hands outcomes
//! back in declared order, so results line up with ordinals no matter
//! which call finishes first. A failed page never aborts its siblings.

use diligence_core::orchestrator::{TaskObserver, TaskOutcome};
use diligence_core::{AgentTask, Orchestrator, SourceUnit, TaskGroup, TextKind, UnitResult};
use tracing::{info, warn};

use crate::prompts;

/// Task name for the page with `ordinal`.
pub fn page_task_name(ordinal: u32) -> String {
    format!("page {}", ordinal)
}

#[derive(Clone)]
pub struct PageAnalyzer {
    orchestrator: Orchestrator,
}

impl PageAnalyzer {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Analyzes every unit; the result has one entry per unit, in unit order.
    ///
    /// Units with neither text nor a visual fail without a call.
    pub async fn analyze(&self, units: &[SourceUnit], observer: &dyn TaskObserver) -> Vec<UnitResult> {
        let (dispatched, empty): (Vec<&SourceUnit>, Vec<&SourceUnit>) =
            units.iter().partition(|u| u.has_content());

        let group = TaskGroup::new(
            "page analysis",
            dispatched
                .iter()
                .map(|unit| {
                    AgentTask::vision(
                        page_task_name(unit.ordinal()),
                        prompts::page_instruction(unit.ordinal(), unit.text()),
                        "",
                        unit.visual().cloned(),
                    )
                })
                .collect(),
        );
        let output = self.orchestrator.run_observed(&group, observer).await;

        let mut results: Vec<UnitResult> = dispatched
            .iter()
            .zip(output.outcomes)
            .map(|(unit, outcome)| to_unit_result(unit.ordinal(), outcome))
            .collect();
        results.extend(empty.iter().map(|unit| {
            warn!(ordinal = unit.ordinal(), "page has no text and no image; skipped");
            UnitResult::failed(unit.ordinal(), "page has no extractable content")
        }));
        results.sort_by_key(|r| r.ordinal());

        info!(
            pages = results.len(),
            succeeded = results.iter().filter(|r| r.is_success()).count(),
            "page analysis complete"
        );
        results
    }

    /// Single extraction task over an email thread or call transcript.
    pub async fn analyze_text(&self, text: &str, kind: TextKind) -> UnitResult {
        if text.trim().is_empty() {
            return UnitResult::failed(1, format!("{} text is required", kind.label()));
        }
        let group = TaskGroup::new(
            kind.label(),
            vec![AgentTask::text(
                kind.label(),
                prompts::text_instruction(kind),
                text,
            )],
        );
        let output = self.orchestrator.run(&group).await;
        match output.outcomes.into_iter().next() {
            Some(outcome) => to_unit_result(1, outcome),
            None => UnitResult::failed(1, "no outcome produced"),
        }
    }
}

fn to_unit_result(ordinal: u32, outcome: TaskOutcome) -> UnitResult {
    if outcome.is_success() {
        UnitResult::success(ordinal, outcome.output)
    } else {
        UnitResult::failed(ordinal, outcome.error.unwrap_or_default())
    }
}
