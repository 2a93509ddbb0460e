//! replayd: background daemon that records input and replays it
//!
//! Runs until SIGINT/SIGTERM and is driven over a Unix socket:
//! - capture start/stop
//! - timed replay of the last recording, with a stop hotkey
//! - engine event stream for subscribed clients

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use replayd::config::{BackendKind, Config};
use replayd::ipc::Server;
use replayd::lifecycle::ShutdownSignal;
use replayd::platform::Backend;
use replayd::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "replayd starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        socket_path = ?config.socket_path,
        stop_key = %config.stop_key,
        backend = ?config.backend,
        drift = ?config.timing.drift,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    let backend = match config.backend {
        BackendKind::Native => Backend::native(),
        BackendKind::Loopback => {
            warn!("loopback backend selected, input is neither captured nor injected");
            Backend::dry_run()
        }
    };
    let engine = Arc::new(Engine::new(backend, config.engine_options()));

    // Log every engine event
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(%event, "engine event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let server = Server::new(&config.socket_path, Arc::clone(&engine))?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");
    server.shutdown().await;
    info!("replayd stopped");

    Ok(())
}
