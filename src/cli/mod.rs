// src/cli/mod.rs — CLI definition (clap derive)

pub mod models;
pub mod route;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "switchboard", about = "Unified AI inference gateway", version)]
pub struct Cli {
    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway server (default command)
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Inspect the model catalog
    Models {
        /// Limit to one gateway
        #[arg(short, long)]
        gateway: Option<String>,
        /// Force a refresh before listing
        #[arg(long)]
        refresh: bool,
    },
    /// Print the failover chain a model would get
    Route {
        /// Model id (`vendor/model` or bare)
        model: String,
        /// Pin to one gateway
        #[arg(short, long)]
        gateway: Option<String>,
    },
}
