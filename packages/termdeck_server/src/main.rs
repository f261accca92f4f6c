use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use termdeck_pty::PtySpawner;
use termdeck_server::config::load_config;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "termdeck")]
#[command(about = "Shared terminal sessions over a websocket")]
struct Cli {
    /// Config file (defaults to <config dir>/termdeck/termdeck.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface to bind, overrides [server].host
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overrides [server].port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "termdeck=debug,termdeck_server=debug,tower_http=debug,info"
    } else {
        "termdeck=info,termdeck_server=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;

    info!("termdeck listening on http://{}", actual_addr);
    info!("  WS     /      - terminal websocket");
    info!("  WS     /ws    - terminal websocket");
    info!("  GET    /health");
    info!(
        "Shell: {} ({}x{}, {} lines of scrollback)",
        config.shell.command, config.shell.cols, config.shell.rows, config.scrollback.max_lines
    );

    let grace = config.grace_timeout();
    let spawner = PtySpawner::new(config.pty_config());
    termdeck_server::serve(listener, &config, Box::new(spawner), shutdown_signal(grace)).await
}

/// Resolves on Ctrl+C or SIGTERM, and arms a watchdog that forces the process
/// to exit if cleanup takes longer than `grace`.
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        error!("Graceful shutdown timed out after {:?}, forcing exit", grace);
        std::process::exit(1);
    });
}
