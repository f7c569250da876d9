// src/cli/serve.rs — `switchboard serve`

use std::sync::Arc;
use tokio::time::Duration;

use crate::api::{self, ApiState};
use crate::catalog::ModelCatalog;
use crate::health::AvailabilityTracker;
use crate::infra::config::Config;
use crate::provider::AdapterRegistry;
use crate::routing::Router;

/// Wire the full stack and serve until shutdown.
pub async fn run_serve(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut server = config.server.clone();
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }

    let registry = Arc::new(AdapterRegistry::from_config(&config));
    if registry.is_empty() {
        anyhow::bail!(
            "no gateways available; set an API key env var for at least one configured gateway"
        );
    }
    tracing::info!(
        "gateways enabled: {}",
        registry.slugs().join(", ")
    );

    let catalog = Arc::new(ModelCatalog::new(
        Arc::clone(&registry),
        config.catalog.clone(),
    ));
    let tracker = Arc::new(AvailabilityTracker::new(&config.health));
    let router = Arc::new(Router::new(
        Arc::clone(&registry),
        Arc::clone(&catalog),
        Arc::clone(&tracker),
        config.routing.clone(),
    ));

    if config.catalog.refresh_interval_seconds > 0 {
        Arc::clone(&catalog)
            .spawn_refresh_loop(Duration::from_secs(config.catalog.refresh_interval_seconds));
    } else {
        // No background loop: warm the catalog once so the first
        // requests don't all pay the fetch.
        catalog.warm_all().await;
    }

    let state = ApiState {
        router,
        catalog,
        tracker,
        registry,
        admin_token: server.admin_token.clone(),
    };
    api::start_server(&server, state).await
}
