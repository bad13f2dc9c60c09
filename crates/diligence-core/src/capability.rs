//! Inference capability interface.
//!
//! Every model-backed step in the pipeline goes through one polymorphic
//! call surface, [`InferenceClient`], with two capabilities:
//!
//! - `generate`: text generation, optionally grounded on a PNG image.
//! - `search`: web lookup returning `{url, snippet}` hits.
//!
//! Concrete HTTP clients (Gemini, OpenAI, Ollama) live in the
//! `diligence-harness` app crate. Clients are stateless: a failed call is
//! reported to the caller and never retried implicitly at this layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which generation capability a task needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Text-only generation.
    Text,
    /// Generation over text plus one image.
    Vision,
}

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    /// PNG bytes attached to the prompt, if any.
    pub image: Option<Arc<[u8]>>,
}

impl GenerateRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_image(prompt: impl Into<String>, image: Arc<[u8]>) -> Self {
        Self {
            prompt: prompt.into(),
            image: Some(image),
        }
    }

    /// Vision when an image is attached, text otherwise.
    pub fn capability(&self) -> Capability {
        if self.image.is_some() {
            Capability::Vision
        } else {
            Capability::Text
        }
    }
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub snippet: String,
}

/// Failure of a single generation or search call.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference provider is disabled")]
    Disabled,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
}

/// Capability wrapper around a generation service and a search service.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use diligence_core::capability::{GenerateRequest, InferenceClient, InferenceError, SearchHit};
///
/// struct Echo;
///
/// #[async_trait]
/// impl InferenceClient for Echo {
///     fn name(&self) -> &str { "echo" }
///
///     async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
///         Ok(request.prompt)
///     }
///
///     async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, InferenceError> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Provider identifier used in logs (e.g. `"gemini"`).
    fn name(&self) -> &str;

    /// Generate a completion for the prompt (and image, if attached).
    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError>;

    /// Run one web search.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, InferenceError>;
}
