//! The coordinator and WebSocket gateway: wires one kernel subprocess to one
//! notebook's worth of connected browser clients.

pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod routes;
pub mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;

use error::ServerResult;
use routes::AppState;
use storage::FileNotebookStore;

pub use error::ServerError;
pub use protocol::{ClientMessage, ServerMessage};

/// Runtime configuration for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path to the `reactive-kernel` binary to spawn.
    pub kernel_binary: PathBuf,
    /// Directory holding one `<id>.json` file per notebook.
    pub storage_dir: PathBuf,
    /// Identifier of the notebook this server instance serves.
    pub notebook_id: String,
    /// Initial database connection string, used if the stored notebook has
    /// none of its own.
    pub connection_string: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            kernel_binary: PathBuf::from("reactive-kernel"),
            storage_dir: PathBuf::from("./notebooks"),
            notebook_id: "default".to_string(),
            connection_string: None,
        }
    }
}

/// Builds the router and serves until Ctrl-C. Each WebSocket connection
/// spawns and tears down its own kernel subprocess (see `routes::AppState`).
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    let store = Arc::new(FileNotebookStore::new(&config.storage_dir)?);

    let app = routes::create_router(AppState {
        kernel_binary: config.kernel_binary,
        store,
        notebook_id: config.notebook_id,
        connection_string: config.connection_string,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "reactive-server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_localhost() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8765);
        assert_eq!(config.notebook_id, "default");
        assert!(config.connection_string.is_none());
    }
}
