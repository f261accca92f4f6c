//! termdeck server
//!
//! Shared shell sessions with bounded scrollback, multiplexed to any number
//! of websocket clients. See [`serve`] for the entry point used by the
//! `termdeck` binary; tests drive it the same way with a scripted spawner.

use std::future::Future;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use termdeck_pty::ProcessSpawner;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod config;
pub mod decoder;
pub mod hub;
pub mod registry;
pub mod router;
pub mod scrollback;
pub mod websocket;

pub use config::ServerConfig;
pub use hub::{HubHandle, HubSettings, HubStats, spawn_hub};
pub use registry::{SessionDefaults, SessionRegistry};
pub use router::{ConnectionId, MessageRouter};
pub use scrollback::{HistorySlice, ScrollbackBuffer};

/// Shared state for axum handlers
#[derive(Clone, Debug)]
pub struct AppState {
    pub hub: HubHandle,
    /// Capacity of each connection's outbound queue
    pub client_queue: usize,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(websocket::ws_handler))
        .route("/ws", get(websocket::ws_handler))
        .route("/health", get(websocket::health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn hub_settings(config: &ServerConfig) -> HubSettings {
    HubSettings {
        defaults: SessionDefaults {
            cols: config.shell.cols,
            rows: config.shell.rows,
            scrollback_lines: config.scrollback.max_lines,
        },
        process_exit_timeout: config.process_exit_timeout(),
    }
}

/// Run the server until `shutdown` resolves.
///
/// On shutdown every client is disconnected and every process is stopped
/// before the listener is released.
pub async fn serve<F>(
    listener: TcpListener,
    config: &ServerConfig,
    spawner: Box<dyn ProcessSpawner>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (hub, hub_task) = spawn_hub(spawner, hub_settings(config));
    let state = AppState {
        hub: hub.clone(),
        client_queue: config.server.client_queue,
    };

    let hub_for_shutdown = hub.clone();
    let graceful = async move {
        shutdown.await;
        info!("Received shutdown signal, cleaning up...");
        hub_for_shutdown.shutdown().await;
    };

    let server_result = axum::serve(listener, app(state))
        .with_graceful_shutdown(graceful)
        .await
        .context("Server error");

    hub.shutdown().await;
    let _ = hub_task.await;
    info!("Shutdown complete");
    server_result
}
