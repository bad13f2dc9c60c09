//! Page-analysis progress reporting.
//!
//! Reports each finished page during `dili document`, `dili report`, and
//! `dili batch` so users see how much of a long deck is done. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use diligence_core::orchestrator::{TaskObserver, TaskOutcome};
use diligence_core::Status;

/// Human-friendly progress on stderr: "analyze page 3  ok      2 / 12 pages".
pub struct StderrProgress;

impl TaskObserver for StderrProgress {
    fn task_finished(&self, outcome: &TaskOutcome, completed: usize, total: usize) {
        let state = match outcome.status {
            Status::Success => "ok",
            Status::Failed => "failed",
        };
        let line = format!(
            "analyze {}  {:<6}  {} / {} pages\n",
            outcome.name,
            state,
            format_number(completed as u64),
            format_number(total as u64)
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl TaskObserver for JsonProgress {
    fn task_finished(&self, outcome: &TaskOutcome, completed: usize, total: usize) {
        let obj = serde_json::json!({
            "event": "progress",
            "task": outcome.name,
            "status": outcome.status,
            "n": completed,
            "total": total,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl TaskObserver for NoProgress {
    fn task_finished(&self, _outcome: &TaskOutcome, _completed: usize, _total: usize) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn TaskObserver> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
