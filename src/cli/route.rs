// src/cli/route.rs — `switchboard route`

use std::sync::Arc;

use crate::catalog::ModelCatalog;
use crate::health::AvailabilityTracker;
use crate::infra::config::Config;
use crate::provider::AdapterRegistry;
use crate::routing::Router;

/// Print the chain a completion for `model` would walk right now.
pub async fn run_route(config: Config, model: &str, gateway: Option<&str>) -> anyhow::Result<()> {
    let registry = Arc::new(AdapterRegistry::from_config(&config));
    if registry.is_empty() {
        anyhow::bail!(
            "no gateways available; set an API key env var for at least one configured gateway"
        );
    }
    let catalog = Arc::new(ModelCatalog::new(
        Arc::clone(&registry),
        config.catalog.clone(),
    ));
    let tracker = Arc::new(AvailabilityTracker::new(&config.health));
    let router = Router::new(
        Arc::clone(&registry),
        catalog,
        tracker,
        config.routing.clone(),
    );

    let chain = router.route(model, gateway).await?;
    if chain.is_empty() {
        println!("no routable candidates for '{}'", chain.requested);
        return Ok(());
    }

    println!("chain for '{}':", chain.requested);
    for (i, target) in chain.targets.iter().enumerate() {
        println!("  {}. {target}", i + 1);
    }
    Ok(())
}
