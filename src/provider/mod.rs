// src/provider/mod.rs — Upstream gateway adapter layer

pub mod anthropic;
pub mod openai_compat;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use crate::infra::config::{Config, GatewayKind};
use crate::infra::errors::GatewayError;

/// Raw streaming frames as parsed from the upstream SSE feed. The stream
/// ends after the upstream's own end-of-stream marker; dialect-specific
/// interpretation happens in the routing-side normalizer.
pub type RawStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value, GatewayError>> + Send>>;

/// Wire dialect an adapter speaks; tells the normalizer how to read frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

/// Core trait every upstream gateway adapter implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn slug(&self) -> &str;
    fn display_name(&self) -> &str;
    fn dialect(&self) -> Dialect;

    /// Fetch the gateway's raw model listing. Returned values are the
    /// upstream's own JSON objects; normalization is the catalog's job.
    async fn list_models(&self) -> Result<Vec<serde_json::Value>, GatewayError>;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError>;

    /// Open a streaming completion. Resolves once the upstream connection
    /// is established, so connect-phase failures surface here (and count as
    /// one routing attempt) while later frames fail in-band on the stream.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<RawStream, GatewayError>;
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Model id as the target gateway knows it.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    /// Same request aimed at a different model id.
    pub fn for_model(&self, model: impl Into<String>) -> Self {
        let mut req = self.clone();
        req.model = model.into();
        req
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub model: String,
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    #[default]
    Unknown,
}

impl FinishReason {
    /// Canonical form of the finish markers the upstream dialects emit.
    pub fn parse(s: &str) -> Self {
        match s {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Lookup table of the configured adapters, keyed by gateway slug.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every enabled gateway in the config. Gateways
    /// whose key env var is declared but unset are skipped rather than
    /// registered broken.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for (slug, gw) in &config.gateways {
            if !gw.enabled {
                continue;
            }
            let api_key = if gw.api_key_env.is_empty() {
                String::new()
            } else {
                match std::env::var(&gw.api_key_env) {
                    Ok(key) if !key.is_empty() => key,
                    _ => {
                        tracing::debug!(
                            "skipping gateway '{slug}': {} not set",
                            gw.api_key_env
                        );
                        continue;
                    }
                }
            };

            let name = gw.name.clone().unwrap_or_else(|| slug.clone());
            let adapter: Arc<dyn ProviderAdapter> = match gw.kind {
                GatewayKind::Openai => Arc::new(openai_compat::OpenAiCompatAdapter::new(
                    slug.clone(),
                    name,
                    api_key,
                    gw.base_url.clone(),
                )),
                GatewayKind::Anthropic => Arc::new(anthropic::AnthropicAdapter::new(
                    slug.clone(),
                    name,
                    api_key,
                    gw.base_url.clone(),
                )),
            };
            registry.insert(adapter);
        }
        registry
    }

    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.slug().to_string(), adapter);
    }

    pub fn get(&self, slug: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(slug).cloned()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.adapters.contains_key(slug)
    }

    /// Registered gateway slugs, sorted for deterministic iteration.
    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.adapters.keys().cloned().collect();
        slugs.sort();
        slugs
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Map a failed upstream HTTP response onto the error taxonomy: 429 →
/// RateLimited, other 4xx → ProviderRejected, 5xx → ProviderUnavailable.
pub(crate) async fn classify_response(gateway: &str, response: reqwest::Response) -> GatewayError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(5000);
        return GatewayError::RateLimited {
            gateway: gateway.into(),
            retry_after_ms,
        };
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        GatewayError::ProviderRejected {
            gateway: gateway.into(),
            status: status.as_u16(),
            message: body,
        }
    } else {
        GatewayError::ProviderUnavailable {
            gateway: gateway.into(),
            message: format!("HTTP {status}: {body}"),
        }
    }
}

/// Map a transport-level failure (connect refused, timeout, TLS).
pub(crate) fn classify_transport(gateway: &str, e: reqwest::Error) -> GatewayError {
    GatewayError::ProviderUnavailable {
        gateway: gateway.into(),
        message: e.to_string(),
    }
}

/// Map an SSE connect-phase failure onto the taxonomy.
pub(crate) async fn classify_stream_error(
    gateway: &str,
    e: reqwest_eventsource::Error,
) -> GatewayError {
    match e {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return GatewayError::RateLimited {
                    gateway: gateway.into(),
                    retry_after_ms: 5000,
                };
            }
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                GatewayError::ProviderRejected {
                    gateway: gateway.into(),
                    status: status.as_u16(),
                    message: body,
                }
            } else {
                GatewayError::ProviderUnavailable {
                    gateway: gateway.into(),
                    message: format!("HTTP {status}: {body}"),
                }
            }
        }
        other => GatewayError::ProviderUnavailable {
            gateway: gateway.into(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── FinishReason tests ─────────────────────────────────────

    #[test]
    fn test_finish_reason_canonicalizes_dialects() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("stop_sequence"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(FinishReason::parse("max_tokens"), FinishReason::Length);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::parse("???"), FinishReason::Unknown);
    }

    // ─── TokenUsage tests ───────────────────────────────────────

    #[test]
    fn test_token_usage_total() {
        let u = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        };
        assert_eq!(u.total(), 150);
    }

    // ─── Registry tests ─────────────────────────────────────────

    #[test]
    fn test_registry_slugs_sorted() {
        let mut r = AdapterRegistry::new();
        r.insert(Arc::new(openai_compat::OpenAiCompatAdapter::new(
            "zeta".into(),
            "Zeta".into(),
            String::new(),
            "http://localhost/v1".into(),
        )));
        r.insert(Arc::new(openai_compat::OpenAiCompatAdapter::new(
            "alpha".into(),
            "Alpha".into(),
            String::new(),
            "http://localhost/v1".into(),
        )));
        assert_eq!(r.slugs(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(r.contains("alpha"));
        assert!(r.get("missing").is_none());
    }
}
