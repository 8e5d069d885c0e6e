pub mod caching;
pub mod error;
pub mod images;
pub mod routes;
pub mod state;
pub mod tags;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use crate::serve::state::AppState;
use crate::storage::Backend;

pub async fn run_server(backend: Arc<dyn Backend>, host: String, port: u16) -> Result<()> {
    let state = AppState::new(backend);
    let router = routes::build_router(state);
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;

    eprintln!("stevedore registry listening on {addr}");
    eprintln!("  Images: http://{addr}/v1/images/{{id}}/json");
    eprintln!("  Tags:   http://{addr}/v1/repositories/{{ns}}/{{repo}}/tags");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to install Ctrl+C handler: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                log::warn!("Failed to install SIGTERM handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    eprintln!("\nShutting down...");
}
