use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use diligence_core::orchestrator::NoObserver;
use diligence_core::{GenerateRequest, InferenceClient, InferenceError, SearchHit, SourceUnit};
use diligence_harness::config::Config;
use diligence_harness::pipeline::Analyzer;
use diligence_harness::raster::NoRasterizer;

/// Answers page prompts with `analysis of page N`, fails the pages listed
/// in `failing`, and answers the consolidation prompt with `corpus`.
#[derive(Default)]
struct ScriptedClient {
    failing: Vec<u32>,
    /// Later pages finish first when set.
    reverse_delays: bool,
    page_calls: AtomicUsize,
    aggregate_calls: AtomicUsize,
    aggregate_prompts: Mutex<Vec<String>>,
}

fn page_number(prompt: &str) -> Option<u32> {
    let rest = prompt.split("Page number: ").nth(1)?;
    rest.split_whitespace().next()?.parse().ok()
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
        if request.prompt.contains("EXTRACTED PAGE DATA") {
            self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
            self.aggregate_prompts
                .lock()
                .unwrap()
                .push(request.prompt.clone());
            return Ok("corpus".to_string());
        }

        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let page = page_number(&request.prompt).expect("page prompt carries its number");
        if self.reverse_delays {
            tokio::time::sleep(Duration::from_millis(10 * u64::from(5 - page.min(5)))).await;
        }
        if self.failing.contains(&page) {
            return Err(InferenceError::Api {
                status: 500,
                body: format!("page {} exploded", page),
            });
        }
        Ok(format!("analysis of page {}", page))
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, InferenceError> {
        Err(InferenceError::Unsupported("search"))
    }
}

fn analyzer(client: Arc<ScriptedClient>) -> Analyzer {
    Analyzer::new(&Config::minimal(), client, Arc::new(NoRasterizer))
}

fn pages(n: u32) -> Vec<SourceUnit> {
    (1..=n)
        .map(|i| SourceUnit::new(i, format!("slide {} text", i), None))
        .collect()
}

#[tokio::test]
async fn failed_page_is_reported_and_excluded_from_the_corpus() {
    let client = Arc::new(ScriptedClient {
        failing: vec![2],
        ..Default::default()
    });
    let result = analyzer(client.clone())
        .analyze_units(&pages(3), &NoObserver)
        .await;

    assert_eq!(result.total_units, 3);
    assert_eq!(result.successful_units, 2);
    assert_eq!(result.corpus_summary.as_deref(), Some("corpus"));

    let page_two = &result.unit_results[1];
    assert_eq!(page_two.ordinal(), 2);
    assert!(!page_two.is_success());
    assert!(page_two.failure_reason().unwrap().contains("exploded"));

    assert_eq!(client.page_calls.load(Ordering::SeqCst), 3);
    assert_eq!(client.aggregate_calls.load(Ordering::SeqCst), 1);
    let prompts = client.aggregate_prompts.lock().unwrap();
    assert!(prompts[0].contains("=== page 1 ===\nanalysis of page 1"));
    assert!(prompts[0].contains("=== page 3 ===\nanalysis of page 3"));
    assert!(!prompts[0].contains("=== page 2 ==="));
}

#[tokio::test]
async fn all_pages_failing_skips_consolidation() {
    let client = Arc::new(ScriptedClient {
        failing: vec![1, 2],
        ..Default::default()
    });
    let result = analyzer(client.clone())
        .analyze_units(&pages(2), &NoObserver)
        .await;

    assert!(!result.is_success());
    assert_eq!(result.successful_units, 0);
    assert!(result.corpus_summary.is_none());
    assert!(result.failure_reason.is_some());
    assert_eq!(client.aggregate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn results_follow_page_order_regardless_of_completion_order() {
    let client = Arc::new(ScriptedClient {
        reverse_delays: true,
        ..Default::default()
    });
    let result = analyzer(client).analyze_units(&pages(4), &NoObserver).await;

    let ordinals: Vec<u32> = result.unit_results.iter().map(|r| r.ordinal()).collect();
    assert_eq!(ordinals, vec![1, 2, 3, 4]);
    assert_eq!(
        result.unit_results[0].analysis_text(),
        Some("analysis of page 1")
    );
    assert!(result.is_success());
}

#[tokio::test]
async fn no_units_fails_without_any_call() {
    let client = Arc::new(ScriptedClient::default());
    let result = analyzer(client.clone()).analyze_units(&[], &NoObserver).await;

    assert!(!result.is_success());
    assert_eq!(result.total_units, 0);
    assert_eq!(client.page_calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.aggregate_calls.load(Ordering::SeqCst), 0);
}
