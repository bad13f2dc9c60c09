//! HTTP inference providers.
//!
//! Concrete [`InferenceClient`] implementations for the generation and
//! search services named in `[inference]` and `[search]`:
//!
//! - **[`GeminiClient`]**: `generateContent` for text and vision, and grounded
//!   generation with the `google_search` tool for web lookups.
//! - **[`OpenAiClient`]**: chat completions; images travel as data URLs.
//! - **[`OllamaClient`]**: a local Ollama instance's `/api/generate`.
//! - **[`DisabledClient`]**: every call fails with [`InferenceError::Disabled`].
//!
//! [`create_client`] combines the configured generation provider and search
//! provider into one [`RoutedClient`].
//!
//! # Model Selection
//!
//! Requests without an image use `text_model`; requests carrying an image
//! use `vision_model`.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use diligence_core::{Capability, GenerateRequest, InferenceClient, InferenceError, SearchHit};

use crate::config::{Config, InferenceConfig, SearchConfig};

const GEMINI_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// API keys resolved once by the binary and handed to the constructors.
#[derive(Clone, Default)]
pub struct Secrets {
    pub inference_api_key: Option<String>,
    pub search_api_key: Option<String>,
}

impl Secrets {
    /// Reads the variables *named* by `api_key_env` in each section.
    pub fn from_env(config: &Config) -> Self {
        let read = |name: &Option<String>| name.as_ref().and_then(|n| std::env::var(n).ok());
        Self {
            inference_api_key: read(&config.inference.api_key_env),
            search_api_key: read(&config.search.api_key_env),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("inference_api_key", &self.inference_api_key.as_ref().map(|_| "***"))
            .field("search_api_key", &self.search_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Shared HTTP plumbing: one reqwest client plus the retry budget.
struct HttpSettings {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpSettings {
    fn new(timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    /// POSTs `body` as JSON, retrying 429/5xx and network errors with
    /// exponential backoff.
    async fn post_json(
        &self,
        provider: &str,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, InferenceError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(provider, attempt, delay_secs = delay.as_secs(), "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| InferenceError::MalformedResponse(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = InferenceError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };
                    // Rate limited or server error: retry. Other client errors are final.
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(InferenceError::Transport(format!("{}: {}", provider, e)));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            InferenceError::Transport(format!("{} request failed after retries", provider))
        }))
    }
}

fn encode_png(image: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(image)
}

fn pick_model<'a>(request: &GenerateRequest, text_model: &'a str, vision_model: &'a str) -> &'a str {
    match request.capability() {
        Capability::Text => text_model,
        Capability::Vision => vision_model,
    }
}

fn require<T: Clone>(value: &Option<T>, what: &str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| anyhow::anyhow!("{} required", what))
}

// ============ Disabled ============

/// Fails every call. Used when a provider is `"disabled"`.
pub struct DisabledClient;

#[async_trait]
impl InferenceClient for DisabledClient {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<String, InferenceError> {
        Err(InferenceError::Disabled)
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, InferenceError> {
        Err(InferenceError::Disabled)
    }
}

// ============ Gemini ============

/// Google Gemini via the `generateContent` REST endpoint.
pub struct GeminiClient {
    http: HttpSettings,
    base_url: String,
    api_key: String,
    text_model: String,
    vision_model: String,
    temperature: f32,
    max_results: usize,
}

impl GeminiClient {
    pub fn new(config: &InferenceConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => bail!(
                "Gemini provider requires an API key (set inference.api_key_env and export that variable)"
            ),
        };
        Ok(Self {
            http: HttpSettings::new(config.timeout_secs, config.max_retries)?,
            base_url: config.url.clone().unwrap_or_else(|| GEMINI_DEFAULT_URL.to_string()),
            api_key,
            text_model: require(&config.text_model, "inference.text_model")?,
            vision_model: require(&config.vision_model, "inference.vision_model")?,
            temperature: config.temperature,
            max_results: 5,
        })
    }

    /// A client used only for grounded search.
    pub fn for_search(config: &SearchConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => bail!(
                "Gemini search requires an API key (set search.api_key_env and export that variable)"
            ),
        };
        let model = require(&config.model, "search.model")?;
        Ok(Self {
            http: HttpSettings::new(config.timeout_secs, 0)?,
            base_url: config.url.clone().unwrap_or_else(|| GEMINI_DEFAULT_URL.to_string()),
            api_key,
            text_model: model.clone(),
            vision_model: model,
            temperature: 0.0,
            max_results: config.max_results,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    async fn call(&self, model: &str, body: &Value) -> Result<Value, InferenceError> {
        let headers = [("x-goog-api-key", self.api_key.clone())];
        self.http
            .post_json("gemini", &self.endpoint(model), &headers, body)
            .await
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
        let model = pick_model(&request, &self.text_model, &self.vision_model);
        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(image) = &request.image {
            parts.push(json!({
                "inline_data": { "mime_type": "image/png", "data": encode_png(image) }
            }));
        }
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "temperature": self.temperature },
        });
        let json = self.call(model, &body).await?;
        parse_gemini_text(&json)
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, InferenceError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": query }] }],
            "tools": [{ "google_search": {} }],
        });
        let json = self.call(&self.text_model, &body).await?;
        let mut hits = parse_gemini_grounding(&json)?;
        hits.truncate(self.max_results);
        Ok(hits)
    }
}

fn parse_gemini_text(json: &Value) -> Result<String, InferenceError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            InferenceError::MalformedResponse("Gemini response missing candidate parts".into())
        })?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

/// Turns grounding chunks into hits. Each hit's snippet is the text of
/// the answer segments that cite it, or the grounded answer when none do.
fn parse_gemini_grounding(json: &Value) -> Result<Vec<SearchHit>, InferenceError> {
    let answer = parse_gemini_text(json)?;
    let Some(metadata) = json.pointer("/candidates/0/groundingMetadata") else {
        return Ok(Vec::new());
    };
    let chunks = metadata
        .get("groundingChunks")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();
    let supports = metadata
        .get("groundingSupports")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut snippets = vec![Vec::<String>::new(); chunks.len()];
    for support in &supports {
        let Some(text) = support.pointer("/segment/text").and_then(|t| t.as_str()) else {
            continue;
        };
        let indices = support
            .get("groundingChunkIndices")
            .and_then(|i| i.as_array())
            .cloned()
            .unwrap_or_default();
        for idx in indices.iter().filter_map(|i| i.as_u64()) {
            if let Some(slot) = snippets.get_mut(idx as usize) {
                slot.push(text.to_string());
            }
        }
    }

    Ok(chunks
        .iter()
        .zip(snippets)
        .filter_map(|(chunk, texts)| {
            let url = chunk.pointer("/web/uri").and_then(|u| u.as_str())?;
            let snippet = if texts.is_empty() {
                answer.clone()
            } else {
                texts.join(" ")
            };
            Some(SearchHit {
                url: url.to_string(),
                snippet,
            })
        })
        .collect())
}

// ============ OpenAI ============

/// OpenAI chat completions. Search is not available.
pub struct OpenAiClient {
    http: HttpSettings,
    base_url: String,
    api_key: String,
    text_model: String,
    vision_model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(config: &InferenceConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => bail!(
                "OpenAI provider requires an API key (set inference.api_key_env and export that variable)"
            ),
        };
        Ok(Self {
            http: HttpSettings::new(config.timeout_secs, config.max_retries)?,
            base_url: config.url.clone().unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key,
            text_model: require(&config.text_model, "inference.text_model")?,
            vision_model: require(&config.vision_model, "inference.vision_model")?,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
        let model = pick_model(&request, &self.text_model, &self.vision_model);
        let content = match &request.image {
            Some(image) => json!([
                { "type": "text", "text": request.prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{}", encode_png(image)) }
                }
            ]),
            None => json!(request.prompt),
        };
        let body = json!({
            "model": model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": content }],
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let url = format!("{}/v1/chat/completions", self.base_url);
        let json = self.http.post_json("openai", &url, &headers, &body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                InferenceError::MalformedResponse("OpenAI response missing message content".into())
            })
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, InferenceError> {
        Err(InferenceError::Unsupported("search"))
    }
}

// ============ Ollama ============

/// A local Ollama instance. Vision needs a multimodal model such as `llava`.
pub struct OllamaClient {
    http: HttpSettings,
    url: String,
    text_model: String,
    vision_model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config.timeout_secs, config.max_retries)?,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            text_model: require(&config.text_model, "inference.text_model")?,
            vision_model: require(&config.vision_model, "inference.vision_model")?,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
        let model = pick_model(&request, &self.text_model, &self.vision_model);
        let mut body = json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        if let Some(image) = &request.image {
            body["images"] = json!([encode_png(image)]);
        }
        let url = format!("{}/api/generate", self.url);
        let json = self.http.post_json("ollama", &url, &[], &body).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                InferenceError::MalformedResponse("Ollama response missing 'response'".into())
            })
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, InferenceError> {
        Err(InferenceError::Unsupported("search"))
    }
}

// ============ Routing ============

/// Sends generation to one provider and search to another.
pub struct RoutedClient {
    generation: Box<dyn InferenceClient>,
    search: Box<dyn InferenceClient>,
}

impl RoutedClient {
    pub fn new(generation: Box<dyn InferenceClient>, search: Box<dyn InferenceClient>) -> Self {
        Self { generation, search }
    }
}

#[async_trait]
impl InferenceClient for RoutedClient {
    fn name(&self) -> &str {
        self.generation.name()
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, InferenceError> {
        self.generation.generate(request).await
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, InferenceError> {
        self.search.search(query).await
    }
}

/// Create the client for the configured providers.
///
/// | `inference.provider` | Generation client |
/// |----------------------|-------------------|
/// | `"disabled"` | [`DisabledClient`] |
/// | `"gemini"` | [`GeminiClient`] |
/// | `"openai"` | [`OpenAiClient`] |
/// | `"ollama"` | [`OllamaClient`] |
///
/// `search.provider` is `"gemini"` or `"disabled"`.
pub fn create_client(config: &Config, secrets: Secrets) -> Result<Arc<dyn InferenceClient>> {
    let generation: Box<dyn InferenceClient> = match config.inference.provider.as_str() {
        "disabled" => Box::new(DisabledClient),
        "gemini" => Box::new(GeminiClient::new(
            &config.inference,
            secrets.inference_api_key.clone(),
        )?),
        "openai" => Box::new(OpenAiClient::new(
            &config.inference,
            secrets.inference_api_key.clone(),
        )?),
        "ollama" => Box::new(OllamaClient::new(&config.inference)?),
        other => bail!("Unknown inference provider: {}", other),
    };
    let search: Box<dyn InferenceClient> = match config.search.provider.as_str() {
        "disabled" => Box::new(DisabledClient),
        "gemini" => Box::new(GeminiClient::for_search(
            &config.search,
            secrets.search_api_key,
        )?),
        other => bail!("Unknown search provider: {}", other),
    };
    Ok(Arc::new(RoutedClient::new(generation, search)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_config_builds_a_failing_client() {
        let client = create_client(&Config::minimal(), Secrets::default()).unwrap();
        let err = client.generate(GenerateRequest::text("hi")).await.unwrap_err();
        assert!(matches!(err, InferenceError::Disabled));
        assert!(matches!(
            client.search("q").await.unwrap_err(),
            InferenceError::Disabled
        ));
    }

    #[test]
    fn gemini_without_key_is_rejected() {
        let mut config = Config::minimal();
        config.inference.provider = "gemini".into();
        config.inference.text_model = Some("t".into());
        config.inference.vision_model = Some("v".into());
        let err = create_client(&config, Secrets::default()).err().unwrap();
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn model_follows_capability() {
        let text = GenerateRequest::text("p");
        let vision = GenerateRequest::with_image("p", Arc::from(vec![1u8, 2, 3]));
        assert_eq!(pick_model(&text, "t", "v"), "t");
        assert_eq!(pick_model(&vision, "t", "v"), "v");
    }

    #[test]
    fn parses_gemini_text_parts() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }]
        });
        assert_eq!(parse_gemini_text(&json).unwrap(), "Hello world");
        assert!(parse_gemini_text(&json!({})).is_err());
    }

    #[test]
    fn grounding_chunks_become_hits() {
        let json = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Acme raised $50M." }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://a.example", "title": "A" } },
                        { "web": { "uri": "https://b.example", "title": "B" } }
                    ],
                    "groundingSupports": [
                        { "segment": { "text": "Acme raised $50M" }, "groundingChunkIndices": [0] }
                    ]
                }
            }]
        });
        let hits = parse_gemini_grounding(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a.example");
        assert_eq!(hits[0].snippet, "Acme raised $50M");
        assert_eq!(hits[1].snippet, "Acme raised $50M.");
    }

    #[test]
    fn secrets_debug_hides_keys() {
        let secrets = Secrets {
            inference_api_key: Some("sk-secret".into()),
            search_api_key: None,
        };
        let shown = format!("{:?}", secrets);
        assert!(!shown.contains("sk-secret"));
    }
}
