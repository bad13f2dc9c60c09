//! Fan-out/fan-in task orchestration.
//!
//! Work is described as plain configuration records:
//!
//! - [`AgentTask`]: a named unit of work with an instruction, input payload,
//!   optional image, and the [`Capability`] it needs.
//! - [`TaskGroup`]: tasks with no data dependency among them. They run
//!   concurrently, bounded by the orchestrator's concurrency limit.
//! - [`SynthesisStage`]: one task whose input is the ordered
//!   concatenation of every prior output, tagged by task name. A stage
//!   marked `skip_when_upstream_failed` is not sent when nothing before it
//!   succeeded.
//!
//! A group completes only when every member is terminal. Failed members
//! are not dropped: they keep their slot with a placeholder output so
//! downstream stages see the gap explicitly. Results are always returned
//! in declared order, whatever the completion order was.
//!
//! The same executor drives page analysis (one task per page, then a
//! consolidation stage) and the economics lenses (three lenses, then a
//! report stage).

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::capability::{Capability, GenerateRequest, InferenceClient};
use crate::models::Status;

/// A named unit of work. Pure value; executing it has no side effects on
/// the task itself.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub name: String,
    pub instruction: String,
    pub input: String,
    pub image: Option<Arc<[u8]>>,
    pub capability: Capability,
}

impl AgentTask {
    pub fn text(
        name: impl Into<String>,
        instruction: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            input: input.into(),
            image: None,
            capability: Capability::Text,
        }
    }

    /// A vision task. Without an image it degrades to text generation.
    pub fn vision(
        name: impl Into<String>,
        instruction: impl Into<String>,
        input: impl Into<String>,
        image: Option<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            input: input.into(),
            image,
            capability: Capability::Vision,
        }
    }

    fn request(&self) -> GenerateRequest {
        let prompt = if self.input.is_empty() {
            self.instruction.clone()
        } else {
            format!("{}\n\n{}", self.instruction, self.input)
        };
        match (&self.image, self.capability) {
            (Some(image), Capability::Vision) => GenerateRequest::with_image(prompt, image.clone()),
            _ => GenerateRequest::text(prompt),
        }
    }
}

/// Independent tasks executed concurrently.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    pub name: String,
    pub tasks: Vec<AgentTask>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>, tasks: Vec<AgentTask>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }
}

/// A single downstream task fed by everything that ran before it.
#[derive(Debug, Clone)]
pub struct SynthesisStage {
    pub name: String,
    pub instruction: String,
    pub capability: Capability,
    /// Fail without a provider call when no prior outcome succeeded.
    pub skip_when_upstream_failed: bool,
}

impl SynthesisStage {
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            capability: Capability::Text,
            skip_when_upstream_failed: false,
        }
    }

    pub fn skip_when_upstream_failed(mut self) -> Self {
        self.skip_when_upstream_failed = true;
        self
    }
}

/// One step of a sequential pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    Group(TaskGroup),
    Synthesis(SynthesisStage),
}

/// Terminal state of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub status: Status,
    /// Generated text on success, a bracketed placeholder on failure.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    fn success(name: &str, output: String) -> Self {
        Self {
            name: name.to_string(),
            status: Status::Success,
            output,
            error: None,
        }
    }

    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            status: Status::Failed,
            output: format!("[{} unavailable: {}]", name, error),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Outcomes of one [`TaskGroup`], in declared order.
#[derive(Debug, Clone, Serialize)]
pub struct GroupOutput {
    pub group: String,
    pub outcomes: Vec<TaskOutcome>,
}

impl GroupOutput {
    /// Output of the named task, placeholder included.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.output.as_str())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn all_failed(&self) -> bool {
        self.succeeded() == 0
    }
}

/// Accumulated outputs passed forward between stages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageContext {
    pub outcomes: Vec<TaskOutcome>,
}

impl StageContext {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = TaskOutcome>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
        }
    }

    pub fn push_group(&mut self, group: GroupOutput) {
        self.outcomes.extend(group.outcomes);
    }

    pub fn get(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// `=== name ===` sections in accumulation order.
    pub fn tagged_sections(&self) -> String {
        self.outcomes
            .iter()
            .map(|o| format!("=== {} ===\n{}", o.name, o.output.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Number of sections [`tagged_sections`](Self::tagged_sections) emits.
    pub fn section_count(&self) -> usize {
        self.outcomes.len()
    }
}

/// Receives task completions as they happen (completion order).
pub trait TaskObserver: Send + Sync {
    fn task_finished(&self, outcome: &TaskOutcome, completed: usize, total: usize);
}

/// Observer that ignores every event.
pub struct NoObserver;

impl TaskObserver for NoObserver {
    fn task_finished(&self, _outcome: &TaskOutcome, _completed: usize, _total: usize) {}
}

/// Executes task groups and synthesis stages against one inference client.
#[derive(Clone)]
pub struct Orchestrator {
    client: Arc<dyn InferenceClient>,
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn InferenceClient>, max_concurrency: usize) -> Self {
        Self {
            client,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Runs every task of `group` and waits for all of them.
    pub async fn run(&self, group: &TaskGroup) -> GroupOutput {
        self.run_observed(group, &NoObserver).await
    }

    /// Like [`run`](Self::run), reporting each completion to `observer`.
    pub async fn run_observed(&self, group: &TaskGroup, observer: &dyn TaskObserver) -> GroupOutput {
        let total = group.tasks.len();
        debug!(
            group = %group.name,
            tasks = total,
            concurrency = self.max_concurrency,
            "running task group"
        );

        let mut completed = 0usize;
        let mut indexed: Vec<(usize, TaskOutcome)> = Vec::with_capacity(total);
        let tasks: Vec<BoxFuture<'_, (usize, TaskOutcome)>> = group
            .tasks
            .iter()
            .enumerate()
            .map(|(idx, task)| async move { (idx, self.execute(task).await) }.boxed())
            .collect();
        let mut pending = stream::iter(tasks).buffer_unordered(self.max_concurrency);

        while let Some((idx, outcome)) = pending.next().await {
            completed += 1;
            observer.task_finished(&outcome, completed, total);
            indexed.push((idx, outcome));
        }

        indexed.sort_by_key(|(idx, _)| *idx);
        GroupOutput {
            group: group.name.clone(),
            outcomes: indexed.into_iter().map(|(_, o)| o).collect(),
        }
    }

    /// Runs one synthesis stage over `context`.
    ///
    /// The stage input is the tagged concatenation of every outcome in the
    /// context, so a stage after a 3-task group receives exactly 3 sections.
    pub async fn synthesize(&self, stage: &SynthesisStage, context: &StageContext) -> TaskOutcome {
        let task = AgentTask {
            name: stage.name.clone(),
            instruction: stage.instruction.clone(),
            input: context.tagged_sections(),
            image: None,
            capability: stage.capability,
        };
        debug!(
            stage = %stage.name,
            sections = context.section_count(),
            "running synthesis stage"
        );
        self.execute(&task).await
    }

    /// Executes stages strictly in order.
    ///
    /// Groups after the first stage receive the accumulated context
    /// appended to each task's input. A synthesis stage never starts before
    /// the previous group is fully terminal, and a stage that skips on
    /// upstream failure records a failed outcome without calling the
    /// provider.
    pub async fn run_sequential(&self, stages: &[Stage]) -> StageContext {
        let mut context = StageContext::default();
        for stage in stages {
            match stage {
                Stage::Group(group) => {
                    let output = if context.is_empty() {
                        self.run(group).await
                    } else {
                        let sections = context.tagged_sections();
                        let fed = TaskGroup {
                            name: group.name.clone(),
                            tasks: group
                                .tasks
                                .iter()
                                .cloned()
                                .map(|mut t| {
                                    t.input = format!("{}\n\n{}", t.input, sections);
                                    t
                                })
                                .collect(),
                        };
                        self.run(&fed).await
                    };
                    context.push_group(output);
                }
                Stage::Synthesis(synthesis) => {
                    let upstream_ok = context.outcomes.iter().any(TaskOutcome::is_success);
                    let outcome = if synthesis.skip_when_upstream_failed && !upstream_ok {
                        warn!(
                            stage = %synthesis.name,
                            upstream = context.section_count(),
                            "every upstream task failed; skipping synthesis"
                        );
                        TaskOutcome::failed(&synthesis.name, "every upstream task failed".to_string())
                    } else {
                        self.synthesize(synthesis, &context).await
                    };
                    context.outcomes.push(outcome);
                }
            }
        }
        context
    }

    async fn execute(&self, task: &AgentTask) -> TaskOutcome {
        match self.client.generate(task.request()).await {
            Ok(text) if text.trim().is_empty() => {
                warn!(task = %task.name, "empty response from inference provider");
                TaskOutcome::failed(&task.name, "empty response".to_string())
            }
            Ok(text) => {
                debug!(task = %task.name, chars = text.len(), "task finished");
                TaskOutcome::success(&task.name, text)
            }
            Err(e) => {
                warn!(task = %task.name, error = %e, "task failed");
                TaskOutcome::failed(&task.name, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{InferenceError, SearchHit};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sleeps longer for earlier tasks so completion order is reversed.
    struct SlowFirst {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl SlowFirst {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InferenceClient for SlowFirst {
        fn name(&self) -> &str {
            "slow-first"
        }

        async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());

            let delay = if request.prompt.contains("task-0") { 40 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.prompt.contains("fail") {
                return Err(InferenceError::Transport("connection reset".into()));
            }
            Ok(format!("out:{}", request.prompt.lines().next().unwrap_or("")))
        }

        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, InferenceError> {
            Ok(vec![])
        }
    }

    fn group(names: &[&str]) -> TaskGroup {
        TaskGroup::new(
            "g",
            names
                .iter()
                .map(|n| AgentTask::text(*n, *n, "payload"))
                .collect(),
        )
    }

    #[tokio::test]
    async fn run_preserves_declared_order() {
        let client = Arc::new(SlowFirst::new());
        let orch = Orchestrator::new(client, 4);
        let out = orch.run(&group(&["task-0", "task-1", "task-2"])).await;
        let names: Vec<&str> = out.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["task-0", "task-1", "task-2"]);
        assert_eq!(out.get("task-1"), Some("out:task-1"));
    }

    #[tokio::test]
    async fn failure_keeps_slot_with_placeholder() {
        let client = Arc::new(SlowFirst::new());
        let orch = Orchestrator::new(client, 2);
        let out = orch.run(&group(&["task-0", "fail-me", "task-2"])).await;
        assert_eq!(out.outcomes.len(), 3);
        assert_eq!(out.succeeded(), 2);
        let failed = &out.outcomes[1];
        assert_eq!(failed.status, Status::Failed);
        assert!(failed.output.starts_with("[fail-me unavailable:"));
        assert!(failed.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let client = Arc::new(SlowFirst::new());
        let orch = Orchestrator::new(client.clone(), 2);
        orch.run(&group(&["a", "b", "c", "d", "e", "f"])).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 6);
        assert!(client.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn synthesis_sees_every_group_member() {
        let client = Arc::new(SlowFirst::new());
        let orch = Orchestrator::new(client.clone(), 4);
        let ctx = orch
            .run_sequential(&[
                Stage::Group(group(&["revenue", "fail-pricing", "monetization"])),
                Stage::Synthesis(SynthesisStage::new("report", "combine")),
            ])
            .await;

        assert_eq!(ctx.outcomes.len(), 4);
        let prompts = client.prompts.lock().unwrap();
        let synthesis_prompt = prompts.last().unwrap();
        assert!(synthesis_prompt.starts_with("combine"));
        assert_eq!(synthesis_prompt.matches("=== ").count(), 3);
        assert!(synthesis_prompt.contains("[fail-pricing unavailable:"));
    }

    #[tokio::test]
    async fn synthesis_skipped_when_every_upstream_task_failed() {
        let client = Arc::new(SlowFirst::new());
        let orch = Orchestrator::new(client.clone(), 4);
        let ctx = orch
            .run_sequential(&[
                Stage::Group(group(&["fail-a", "fail-b"])),
                Stage::Synthesis(SynthesisStage::new("report", "combine").skip_when_upstream_failed()),
            ])
            .await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.outcomes.len(), 3);
        let report = &ctx.outcomes[2];
        assert_eq!(report.name, "report");
        assert!(!report.is_success());
        assert_eq!(report.error.as_deref(), Some("every upstream task failed"));
    }

    #[tokio::test]
    async fn synthesis_without_skip_runs_over_failures() {
        let client = Arc::new(SlowFirst::new());
        let orch = Orchestrator::new(client.clone(), 4);
        let ctx = orch
            .run_sequential(&[
                Stage::Group(group(&["fail-a"])),
                Stage::Synthesis(SynthesisStage::new("report", "combine")),
            ])
            .await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.outcomes.len(), 2);
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[1].starts_with("combine"));
    }

    #[tokio::test]
    async fn group_runs_on_a_spawned_task() {
        fn assert_send<T: Send>(value: T) -> T {
            value
        }

        let client = Arc::new(SlowFirst::new());
        let orch = Orchestrator::new(client.clone(), 2);
        let handle = tokio::spawn(async move {
            let g = group(&["task-0", "task-1"]);
            assert_send(orch.run(&g)).await
        });
        let out = handle.await.unwrap();
        assert_eq!(out.succeeded(), 2);
    }

    #[test]
    fn tagged_sections_format() {
        let ctx = StageContext::from_outcomes(vec![
            TaskOutcome::success("a", "one\n".into()),
            TaskOutcome::success("b", "two".into()),
        ]);
        assert_eq!(ctx.tagged_sections(), "=== a ===\none\n\n=== b ===\ntwo");
    }
}
