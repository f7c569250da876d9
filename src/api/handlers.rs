// src/api/handlers.rs

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;

use crate::api::{auth, types::*, ApiState};
use crate::provider::{ChatMessage, CompletionRequest};
use crate::routing::stream::{StreamChunk, StreamEvent};
use crate::routing::RoutedStream;

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    #[serde(default)]
    pub gateway: Option<String>,
}

/// POST /v1/chat/completions — Route a completion across gateways,
/// streaming or not.
pub async fn chat_completions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;

    if body.model.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalid_request", "model cannot be empty")),
        ));
    }
    if body.messages.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "invalid_request",
                "messages cannot be empty",
            )),
        ));
    }

    let request = CompletionRequest {
        model: body.model.clone(),
        messages: body.messages.clone(),
        max_tokens: body.max_tokens,
        temperature: body.temperature,
        top_p: body.top_p,
        stop: body.stop.clone(),
    };
    let tenant = body.user.clone().unwrap_or_else(|| "default".to_string());

    if body.stream {
        let routed = state
            .router
            .complete_streaming(&body.model, body.provider.as_deref(), &request, &tenant)
            .await
            .map_err(|e| error_response(&e))?;
        Ok(sse_response(routed))
    } else {
        let routed = state
            .router
            .complete(&body.model, body.provider.as_deref(), &request, &tenant)
            .await
            .map_err(|e| error_response(&e))?;

        let response = ChatCompletionResponse {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            object: "chat.completion",
            created: chrono::Utc::now().timestamp(),
            model: routed.target.model,
            provider: routed.target.gateway,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::assistant(routed.response.content),
                finish_reason: routed.response.finish_reason.as_str().to_string(),
            }],
            usage: routed.response.usage.into(),
        };
        Ok(Json(response).into_response())
    }
}

/// Encode a normalized stream as OpenAI-style SSE: one `data:` frame per
/// chunk, an in-band error frame on upstream failure, and the literal
/// `[DONE]` sentinel last.
fn sse_response(routed: RoutedStream) -> Response {
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();
    let model = routed.target.model;
    let provider = routed.target.gateway;
    let mut events = routed.events;

    let frames = async_stream::stream! {
        let mut first = true;
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Chunk(StreamChunk { delta, finish_reason, usage }) => {
                    let frame = ChatCompletionChunk {
                        id: id.clone(),
                        object: "chat.completion.chunk",
                        created,
                        model: model.clone(),
                        provider: provider.clone(),
                        choices: vec![ChunkChoice {
                            index: 0,
                            delta: ChunkDelta {
                                role: first.then_some("assistant"),
                                content: (!delta.is_empty()).then_some(delta),
                            },
                            finish_reason: finish_reason.map(|f| f.as_str().to_string()),
                        }],
                        usage: usage.map(UsageBody::from),
                    };
                    first = false;
                    yield Ok::<_, Infallible>(
                        Event::default().data(serde_json::to_string(&frame).unwrap_or_default()),
                    );
                }
                StreamEvent::Error(e) => {
                    let envelope = ErrorResponse::new(e.code(), e.to_string());
                    yield Ok(Event::default()
                        .data(serde_json::to_string(&envelope).unwrap_or_default()));
                }
                StreamEvent::Done => {
                    yield Ok(Event::default().data("[DONE]"));
                }
            }
        }
    };

    Sse::new(frames).into_response()
}

/// GET /v1/models — Merged catalog, optionally filtered to one gateway.
pub async fn list_models(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<ModelList>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;

    let records = match query.gateway.as_deref() {
        Some(gateway) => {
            let models = state
                .catalog
                .models(gateway)
                .await
                .map_err(|e| error_response(&e))?;
            models.as_ref().clone()
        }
        None => state.catalog.all_models().await,
    };

    let data = records.iter().map(ModelEntry::from_record).collect();
    Ok(Json(ModelList::new(data)))
}

/// GET /v1/models/{*id} — One model across every gateway hosting it.
pub async fn get_model(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;

    let hits = state.catalog.find_model(&id).await;
    if hits.is_empty() {
        let suggestions = state.catalog.suggestions_for(&id).await;
        let err = crate::infra::errors::GatewayError::ModelNotFound {
            model: id,
            suggestions,
        };
        return Err(error_response(&err));
    }

    let sources: Vec<serde_json::Value> = hits
        .iter()
        .map(|hit| {
            serde_json::json!({
                "origin": hit.origin,
                "model": ModelEntry::from_record(&hit.record),
            })
        })
        .collect();
    Ok(Json(serde_json::json!({
        "id": id,
        "object": "model",
        "sources": sources,
    })))
}

/// GET /v1/gateways — Registered gateways with catalog freshness.
pub async fn list_gateways(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;

    let statuses = state.catalog.cache_status().await;
    let mut data = Vec::with_capacity(statuses.len());
    for status in statuses {
        let name = state
            .registry
            .get(&status.gateway)
            .map(|a| a.display_name().to_string())
            .unwrap_or_else(|| status.gateway.clone());
        data.push(serde_json::json!({
            "slug": status.gateway,
            "name": name,
            "cache": status,
        }));
    }
    Ok(Json(serde_json::json!({
        "object": "list",
        "data": data,
    })))
}
