// src/api/mod.rs — HTTP surface: OpenAI-compatible completions plus the
// operational control plane.

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod types;

use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::ModelCatalog;
use crate::health::AvailabilityTracker;
use crate::infra::config::ServerConfig;
use crate::provider::AdapterRegistry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<crate::routing::Router>,
    pub catalog: Arc<ModelCatalog>,
    pub tracker: Arc<AvailabilityTracker>,
    pub registry: Arc<AdapterRegistry>,
    pub admin_token: Option<String>,
}

/// Build the axum router with all API routes.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/models/{*id}", get(handlers::get_model))
        .route("/v1/gateways", get(handlers::list_gateways))
        .route("/admin/cache/refresh/{gateway}", post(admin::refresh_cache))
        .route("/admin/cache/status", get(admin::cache_status))
        .route(
            "/admin/maintenance/{gateway}/{*model}",
            put(admin::set_maintenance).delete(admin::clear_maintenance),
        )
        .route("/admin/availability", get(admin::availability))
        .route("/admin/health", get(admin::health))
        .layer(cors)
        .with_state(state)
}

/// Start the API server and block until shutdown.
pub async fn start_server(config: &ServerConfig, state: ApiState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let router = build_router(state);

    tracing::info!("gateway listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::{CatalogConfig, HealthConfig, RoutingConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state(admin_token: Option<String>) -> ApiState {
        let registry = Arc::new(AdapterRegistry::new());
        let catalog = Arc::new(ModelCatalog::new(
            Arc::clone(&registry),
            CatalogConfig::default(),
        ));
        let tracker = Arc::new(AvailabilityTracker::new(&HealthConfig::default()));
        let router = Arc::new(crate::routing::Router::new(
            Arc::clone(&registry),
            Arc::clone(&catalog),
            Arc::clone(&tracker),
            RoutingConfig::default(),
        ));
        ApiState {
            router,
            catalog,
            tracker,
            registry,
            admin_token,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state(None));
        let req = Request::builder()
            .uri("/admin/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_models_list_is_empty_without_gateways() {
        let app = build_router(test_state(None));
        let req = Request::builder()
            .uri("/v1/models")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_requires_token_when_configured() {
        let app = build_router(test_state(Some("secret".into())));
        let req = Request::builder()
            .uri("/admin/cache/status")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_accepts_configured_token() {
        let app = build_router(test_state(Some("secret".into())));
        let req = Request::builder()
            .uri("/admin/cache/status")
            .header("authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_skips_auth() {
        let app = build_router(test_state(Some("secret".into())));
        let req = Request::builder()
            .uri("/admin/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_completions_reject_empty_messages() {
        let app = build_router(test_state(None));
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"model": "x", "messages": []}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
