// src/cli/models.rs — `switchboard models`

use std::sync::Arc;

use crate::catalog::ModelCatalog;
use crate::infra::config::Config;
use crate::provider::AdapterRegistry;

pub async fn run_models(
    config: Config,
    gateway: Option<&str>,
    refresh: bool,
) -> anyhow::Result<()> {
    let registry = Arc::new(AdapterRegistry::from_config(&config));
    if registry.is_empty() {
        anyhow::bail!(
            "no gateways available; set an API key env var for at least one configured gateway"
        );
    }
    let catalog = ModelCatalog::new(registry, config.catalog.clone());

    if refresh {
        match gateway {
            Some(gw) => {
                catalog.refresh(gw, true).await?;
            }
            None => catalog.refresh_all(true).await,
        }
    }

    let records = match gateway {
        Some(gw) => catalog.models(gw).await?.as_ref().clone(),
        None => catalog.all_models().await,
    };

    for record in &records {
        let ctx = record
            .context_length
            .map(|c| format!("{}k", c / 1000))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{:<12} {:<56} {:>6} ctx  ${:<7.3}/M in  ${:.3}/M out",
            record.gateway,
            record.id,
            ctx,
            record.pricing.prompt_per_mtok,
            record.pricing.completion_per_mtok,
        );
    }
    println!();
    println!("{} model(s)", records.len());
    Ok(())
}
