//! # Diligence Harness
//!
//! A multi-stage analysis pipeline for startup evaluation artifacts: pitch
//! decks and memos, email threads, and call transcripts.
//!
//! Documents are decomposed into pages, every page is analyzed with text
//! and a rendered image, and the successful analyses are consolidated into
//! one corpus. The corpus then feeds the economics lenses and the numeric
//! fact-checker. The pure pipeline logic lives in the `diligence-core`
//! crate; this crate adds configuration, HTTP providers, document parsing,
//! the CLI, and the HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Decompose  │──▶│ Page analyze │──▶│  Aggregate  │──▶│ Economics +  │
//! │ PDF/PPTX/… │   │ (concurrent) │   │ (one call)  │   │ Verification │
//! └────────────┘   └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                                              │
//!                                         ┌────────────────────┤
//!                                         ▼                    ▼
//!                                    ┌──────────┐        ┌──────────┐
//!                                    │   CLI    │        │   HTTP   │
//!                                    │  (dili)  │        │  (axum)  │
//!                                    └──────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`inference`] | Gemini, OpenAI, and Ollama clients with retry |
//! | [`decompose`] | Format sniffing and page-level text extraction |
//! | [`raster`] | Page rendering through `pdftoppm` |
//! | [`prompts`] | Instruction templates |
//! | [`analyze`] | Per-page and raw-text analysis |
//! | [`aggregate`] | Corpus consolidation |
//! | [`economics`] | Revenue, pricing, and monetization lenses |
//! | [`pipeline`] | The `Analyzer` facade |
//! | [`progress`] | Page progress on stderr |
//! | [`batch`] | Directory batch runs |
//! | [`server`] | HTTP server |

pub mod aggregate;
pub mod analyze;
pub mod batch;
pub mod config;
pub mod decompose;
pub mod economics;
pub mod inference;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod raster;
pub mod server;
