// src/api/admin.rs — Operational control surface
//
// Everything here mutates or inspects gateway-operator state and sits
// behind the bearer token when one is configured. Model path segments
// may contain slashes, so those routes capture the tail of the path.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::api::{auth, types::*, ApiState};
use crate::catalog::CacheStatus;
use crate::health::AvailabilitySnapshot;

#[derive(Debug, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    #[serde(default)]
    pub gateway: Option<String>,
}

/// POST /admin/cache/refresh/{gateway} — Refresh one gateway's catalog,
/// optionally discarding a still-fresh entry.
pub async fn refresh_cache(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(gateway): Path<String>,
    Query(query): Query<ForceQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;

    let models = state
        .catalog
        .refresh(&gateway, query.force)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(serde_json::json!({
        "gateway": gateway,
        "refreshed": true,
        "models": models.len(),
    })))
}

/// GET /admin/cache/status — Freshness of every gateway's catalog entry.
pub async fn cache_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<CacheStatus>>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;
    Ok(Json(state.catalog.cache_status().await))
}

/// PUT /admin/maintenance/{gateway}/{*model} — Open a maintenance
/// window; the target drops out of every chain until it closes.
pub async fn set_maintenance(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((gateway, model)): Path<(String, String)>,
    Json(body): Json<MaintenanceRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;

    let until = body
        .duration_seconds
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
    let reason = body.reason.unwrap_or_else(|| "maintenance".to_string());
    state
        .tracker
        .set_maintenance(&gateway, &model, until, reason)
        .await;

    Ok(Json(serde_json::json!({
        "gateway": gateway,
        "model": model,
        "maintenance": true,
        "until": until,
    })))
}

/// DELETE /admin/maintenance/{gateway}/{*model} — Close the window.
pub async fn clear_maintenance(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((gateway, model)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;

    if !state.tracker.clear_maintenance(&gateway, &model).await {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                format!("No maintenance window for {gateway}/{model}"),
            )),
        ));
    }

    Ok(Json(serde_json::json!({
        "gateway": gateway,
        "model": model,
        "maintenance": false,
    })))
}

/// GET /admin/availability — Circuit state for every tracked pair.
pub async fn availability(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<GatewayQuery>,
) -> Result<Json<Vec<AvailabilitySnapshot>>, (StatusCode, Json<ErrorResponse>)> {
    auth::check_auth(&state, &headers)?;
    Ok(Json(state.tracker.summary(query.gateway.as_deref()).await))
}

/// GET /admin/health — Liveness; deliberately unauthenticated.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
