// src/main.rs — Switchboard entry point

use clap::Parser;

use switchboard::cli::{models, route, serve, Cli, Commands};
use switchboard::infra::config::Config;
use switchboard::infra::logger;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG)
    logger::init_logging("info");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    match cli.command {
        Some(Commands::Models { gateway, refresh }) => {
            models::run_models(config, gateway.as_deref(), refresh).await
        }
        Some(Commands::Route { model, gateway }) => {
            route::run_route(config, &model, gateway.as_deref()).await
        }
        Some(Commands::Serve { host, port }) => serve::run_serve(config, host, port).await,
        None => serve::run_serve(config, None, None).await,
    }
}
