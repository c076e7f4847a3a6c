mod comms;
mod config;
mod error;
mod resources;
mod security;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "authgate", version, about = "Access gate for the places panel")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();

    // Startup contract: no signing key outside development means no boot.
    let signing_key = config::signing_key_from_env()?;

    let config = if std::path::Path::new(&args.config).exists() {
        config::Config::from_file(&args.config)?
    } else {
        info!("config file {} not found, using defaults", args.config);
        config::Config::default()
    };

    let port = match args.command {
        Some(Commands::Serve { port }) => port,
        None => 8080,
    };

    info!("Starting access gate on port {port}");
    comms::local_api::serve(config, signing_key, port).await?;

    Ok(())
}
