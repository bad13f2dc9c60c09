//! # Diligence Harness Core
//!
//! Shared, I/O-free logic for Diligence Harness: the analysis data model,
//! the inference capability trait, the fan-out/fan-in task orchestrator,
//! and the fact-check verification engine.
//!
//! This crate contains no tokio, HTTP client, filesystem, or document
//! parsing dependencies. Concurrency is expressed with `futures`
//! combinators so any executor can drive it.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`capability`] | `InferenceClient` trait (generate + search) and its error type |
//! | [`models`] | `SourceUnit`, `UnitResult`, `DocumentResult`, `TextKind` |
//! | [`orchestrator`] | `TaskGroup` / `SynthesisStage` executor with bounded concurrency |
//! | [`verify`] | Normalize → calculate → verify externally → verdict |

pub mod capability;
pub mod models;
pub mod orchestrator;
pub mod verify;

pub use capability::{Capability, GenerateRequest, InferenceClient, InferenceError, SearchHit};
pub use models::{DocumentResult, SourceUnit, Status, TextKind, UnitResult};
pub use orchestrator::{AgentTask, GroupOutput, Orchestrator, Stage, SynthesisStage, TaskGroup};
pub use verify::{FactCheckReport, SearchQuota, VerificationEngine, VerificationSettings, Verdict};
