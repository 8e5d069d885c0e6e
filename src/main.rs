use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stevedore::{cli, config::Config, serve, storage::FsBackend};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("error: Fatal error: {panic_info}");
        std::process::exit(1);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    match cli.command {
        cli::Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            let config = Config::load()?;
            let host = host.unwrap_or(config.host);
            let port = port.unwrap_or(config.port);
            let data_dir = data_dir.unwrap_or(config.data_dir);

            let backend = FsBackend::new(&data_dir).with_context(|| {
                format!("Failed to initialize data directory {}", data_dir.display())
            })?;
            serve::run_server(Arc::new(backend), host, port).await
        }
    }
}
