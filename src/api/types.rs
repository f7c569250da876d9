// src/api/types.rs

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::catalog::{ModelPricing, ModelRecord};
use crate::infra::errors::GatewayError;
use crate::provider::{ChatMessage, TokenUsage};

/// Request body for POST /v1/chat/completions (OpenAI wire shape, plus
/// the `provider` extension for pinning a gateway).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    /// Pin the request to one gateway instead of routing by catalog.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    /// End-user identifier, forwarded to the billing gates as tenant.
    #[serde(default)]
    pub user: Option<String>,
}

/// Non-streaming response for POST /v1/chat/completions.
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    /// Gateway that actually served the request.
    pub provider: String,
    pub choices: Vec<ChatChoice>,
    pub usage: UsageBody,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct UsageBody {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<TokenUsage> for UsageBody {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total(),
        }
    }
}

/// One SSE frame body for a streaming completion.
#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub provider: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageBody>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Catalog entry as listed on GET /v1/models.
#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub name: String,
    pub owned_by: String,
    pub gateway: String,
    pub context_length: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub modality: String,
    pub pricing: ModelPricing,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ModelEntry {
    pub fn from_record(record: &ModelRecord) -> Self {
        Self {
            id: record.id.clone(),
            object: "model",
            name: record.name.clone(),
            owned_by: record.provider_slug.clone(),
            gateway: record.gateway.clone(),
            context_length: record.context_length,
            max_output_tokens: record.max_output_tokens,
            modality: record.modality.clone(),
            pricing: record.pricing.clone(),
            tags: record.tags.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

impl ModelList {
    pub fn new(data: Vec<ModelEntry>) -> Self {
        Self {
            object: "list",
            data,
        }
    }
}

/// Body for PUT /admin/maintenance/{gateway}/{model}.
#[derive(Debug, Default, Deserialize)]
pub struct MaintenanceRequest {
    #[serde(default)]
    pub reason: Option<String>,
    /// Window length; omitted means until explicitly cleared.
    #[serde(default)]
    pub duration_seconds: Option<u64>,
}

/// Error envelope with a stable machine-readable code.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Map a routing error onto an HTTP status plus the error envelope.
pub fn error_response(e: &GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        GatewayError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
        GatewayError::UnknownGateway(_) => StatusCode::BAD_REQUEST,
        GatewayError::ProviderRejected { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        GatewayError::ProviderUnavailable { .. } | GatewayError::ChainExhausted { .. } => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::RateLimited { .. } | GatewayError::RateDenied(_) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        GatewayError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::CatalogUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::CreditDenied(_) => StatusCode::PAYMENT_REQUIRED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse::new(e.code(), e.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_body_totals() {
        let body = UsageBody::from(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        assert_eq!(body.total_tokens, 15);
    }

    #[test]
    fn test_chunk_delta_omits_empty_fields() {
        let json = serde_json::to_string(&ChunkDelta::default()).unwrap();
        assert_eq!(json, "{}");

        let json = serde_json::to_string(&ChunkDelta {
            role: Some("assistant"),
            content: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"role":"assistant"}"#);
    }

    #[test]
    fn test_chunk_keeps_null_finish_reason() {
        // Clients watch finish_reason per frame; null must stay present.
        let choice = ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: None,
                content: Some("hi".into()),
            },
            finish_reason: None,
        };
        let json = serde_json::to_string(&choice).unwrap();
        assert!(json.contains(r#""finish_reason":null"#));
    }

    #[test]
    fn test_error_status_mapping() {
        let (status, _) = error_response(&GatewayError::ModelNotFound {
            model: "x".into(),
            suggestions: vec![],
        });
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = error_response(&GatewayError::DeadlineExceeded { deadline_ms: 2000 });
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

        let (status, body) = error_response(&GatewayError::ChainExhausted {
            model: "x".into(),
            attempts: vec![],
        });
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error.code, "chain_exhausted");
    }

    #[test]
    fn test_request_minimal_body_parses() {
        let body: ChatCompletionRequest = serde_json::from_str(
            r#"{"model": "llama-3.3-70b", "messages": [{"role": "user", "content": "hi"}]}"#,
        )
        .unwrap();
        assert!(!body.stream);
        assert!(body.provider.is_none());
        assert!(body.user.is_none());
    }
}
