//! AI Manager: routes text/image generation to a capable provider.
//!
//! The manager is an ordinary value built by the composition root and
//! shared through an `Arc`; providers are registered explicitly and the first
//! one advertising the requested capability wins.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::NodeError;

/// What a provider can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Image,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    /// No registered provider supports the capability.
    #[error("no provider available for {0} generation")]
    NoProvider(Capability),

    /// The provider is temporarily unreachable or overloaded.
    #[error("provider '{provider}' unavailable: {message}")]
    Unavailable { provider: String, message: String },

    /// The provider rejected the request.
    #[error("provider '{provider}' request failed: {message}")]
    Request { provider: String, message: String },
}

impl From<AiError> for NodeError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Unavailable { .. } => NodeError::Retryable(err.to_string()),
            other => NodeError::Fatal(other.to_string()),
        }
    }
}

/// A text/image generation backend.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> &[Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    async fn generate_text(&self, prompt: &str, model: &str) -> Result<String, AiError>;

    /// Returns the generated image URL, or `None` when the provider produced
    /// nothing usable.
    async fn generate_image(&self, _prompt: &str, _model: &str) -> Result<Option<String>, AiError> {
        Err(AiError::Request {
            provider: self.name().to_owned(),
            message: "image generation not supported".into(),
        })
    }
}

/// Registry of providers, consulted in registration order.
#[derive(Default, Clone)]
pub struct AiManager {
    providers: Vec<Arc<dyn AiProvider>>,
}

impl AiManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        info!(provider = provider.name(), "AI provider registered");
        self.providers.push(provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn provider_for(&self, capability: Capability) -> Result<&Arc<dyn AiProvider>, AiError> {
        self.providers
            .iter()
            .find(|p| p.supports(capability))
            .ok_or(AiError::NoProvider(capability))
    }

    pub async fn generate_text(&self, prompt: &str, model: &str) -> Result<String, AiError> {
        let provider = self.provider_for(Capability::Text)?;
        debug!(provider = provider.name(), model, "generating text");
        provider.generate_text(prompt, model).await
    }

    pub async fn generate_image(&self, prompt: &str, model: &str) -> Result<Option<String>, AiError> {
        let provider = self.provider_for(Capability::Image)?;
        debug!(provider = provider.name(), model, "generating image");
        provider.generate_image(prompt, model).await
    }
}

// ---------------------------------------------------------------------------
// Built-in providers
// ---------------------------------------------------------------------------

/// Canned text provider for local runs and demos.
pub struct DummyProvider;

#[async_trait]
impl AiProvider for DummyProvider {
    fn name(&self) -> &str {
        "dummy"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Text]
    }

    async fn generate_text(&self, _prompt: &str, _model: &str) -> Result<String, AiError> {
        Ok("This is a test response from the dummy provider.".into())
    }
}

/// Text generation against an Ollama server (`POST {endpoint}/api/generate`).
pub struct OllamaProvider {
    http: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
        }
    }

    fn unavailable(&self, message: impl Into<String>) -> AiError {
        AiError::Unavailable {
            provider: self.name().to_owned(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl AiProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Text]
    }

    async fn generate_text(&self, prompt: &str, model: &str) -> Result<String, AiError> {
        let url = format!("{}/api/generate", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&OllamaRequest { model, prompt, stream: false })
            .send()
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        let parsed: OllamaResponse = read_json(self.name(), response).await?;
        Ok(parsed.response)
    }
}

/// Decode a provider's JSON reply; 429 and 5xx are reported as unavailable.
async fn read_json<T: serde::de::DeserializeOwned>(provider: &str, response: reqwest::Response) -> Result<T, AiError> {
    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(AiError::Unavailable {
            provider: provider.to_owned(),
            message: format!("HTTP {status}"),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| "unknown".to_string());
        return Err(AiError::Request {
            provider: provider.to_owned(),
            message: format!("HTTP {status}: {body}"),
        });
    }
    response.json().await.map_err(|e| AiError::Request {
        provider: provider.to_owned(),
        message: e.to_string(),
    })
}

/// Google Gemini over the Generative Language REST API
/// (`POST {endpoint}/models/{model}:generateContent`).
pub struct GeminiProvider {
    http: Client,
    endpoint: String,
    api_key: String,
}

pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: [GeminiContent<'a>; 1],
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiReply>,
}

#[derive(Deserialize)]
struct GeminiReply {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Deserialize)]
struct GeminiReplyPart {
    text: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::Request {
                provider: "gemini".into(),
                message: "an API key is required".into(),
            });
        }
        Ok(Self {
            http: Client::new(),
            endpoint: GEMINI_ENDPOINT.to_owned(),
            api_key,
        })
    }

    /// Point at a different API root, e.g. a proxy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_owned();
        self
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<GeminiResponse, AiError> {
        let url = format!("{}/models/{model}:generateContent", self.endpoint);
        let request = GeminiRequest {
            contents: [GeminiContent { parts: [GeminiPart { text: prompt }] }],
        };
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Unavailable {
                provider: self.name().to_owned(),
                message: e.to_string(),
            })?;
        read_json(self.name(), response).await
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Text, Capability::Image]
    }

    async fn generate_text(&self, prompt: &str, model: &str) -> Result<String, AiError> {
        self.generate(prompt, model).await?.text().ok_or_else(|| AiError::Request {
            provider: self.name().to_owned(),
            message: "response carried no text".into(),
        })
    }

    /// Only inline `data:image` replies count as an image.
    async fn generate_image(&self, prompt: &str, model: &str) -> Result<Option<String>, AiError> {
        let reply = self.generate(&format!("Generate an image of: {prompt}"), model).await?;
        Ok(reply.text().filter(|t| t.starts_with("data:image")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;

    #[tokio::test]
    async fn empty_manager_reports_missing_capability() {
        let manager = AiManager::new();
        let err = manager.generate_text("hi", "m").await.unwrap_err();
        assert_eq!(err, AiError::NoProvider(Capability::Text));
        assert!(matches!(NodeError::from(err), NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn first_capable_provider_wins() {
        let manager = AiManager::new()
            .with_provider(Arc::new(DummyProvider))
            .with_provider(Arc::new(ScriptedProvider::image("https://img/1.png")));

        let text = manager.generate_text("hi", "m").await.unwrap();
        assert!(text.contains("dummy provider"));

        let url = manager.generate_image("a cat", "m").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://img/1.png"));
    }

    #[test]
    fn unavailable_maps_to_retryable() {
        let err = AiError::Unavailable { provider: "x".into(), message: "503".into() };
        assert!(matches!(NodeError::from(err), NodeError::Retryable(_)));
    }

    #[test]
    fn gemini_needs_an_api_key() {
        assert!(matches!(GeminiProvider::new("  "), Err(AiError::Request { .. })));

        let gemini = GeminiProvider::new("k").unwrap().with_endpoint("http://localhost:9/v1beta/");
        assert_eq!(gemini.endpoint, "http://localhost:9/v1beta");
        assert!(gemini.supports(Capability::Text));
        assert!(gemini.supports(Capability::Image));
    }

    #[test]
    fn gemini_reply_text_joins_first_candidate_parts() {
        let reply: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": "Hello " }, { "text": "Ada" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        }))
        .unwrap();
        assert_eq!(reply.text().as_deref(), Some("Hello Ada"));

        let blocked: GeminiResponse =
            serde_json::from_value(serde_json::json!({ "promptFeedback": { "blockReason": "SAFETY" } })).unwrap();
        assert_eq!(blocked.text(), None);
    }

    #[tokio::test]
    async fn unreachable_gemini_is_retryable() {
        let gemini = GeminiProvider::new("k").unwrap().with_endpoint("http://127.0.0.1:9");
        let err = gemini.generate_text("hi", "gemini-1.5-flash").await.unwrap_err();
        assert!(matches!(err, AiError::Unavailable { .. }));
    }
}
