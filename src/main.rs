//! todosync: a task-sync server
//!
//! Clients speak a line-oriented text protocol over TCP. Each request is a
//! `RESOURCE|METHOD` line followed by a single-line JSON payload, and
//! requests are separated by a blank line.
//!
//! Features:
//! - Login by username, at most one connection per user
//! - Task and task-list methods routed behind the login gate
//! - Graceful shutdown from the terminal (`q`) or Ctrl-C
//! - Configuration via CLI arguments or TOML file

mod admin;
mod config;
mod error;
mod protocol;
mod runtime;
mod server;
mod service;
mod storage;

use std::sync::Arc;

use config::Config;
use runtime::Registry;
use server::Server;
use service::ServiceGateway;
use storage::MemoryUserStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_connections = config.max_connections,
        max_frame_bytes = config.max_frame_bytes,
        "Starting todosync server"
    );

    let gateway = Arc::new(ServiceGateway::new(
        MemoryUserStore::new(),
        Arc::new(Registry::new()),
    ));

    let server = Server::bind(config, gateway).inspect_err(|e| {
        error!(error = %e, "Failed to bind listener");
    })?;
    let handle = server.handle();

    admin::spawn_terminal_watcher(handle.shutdown_token())?;
    info!(address = %handle.local_addr(), "Type 'q' and press enter to stop the server");

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c.stopped() => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("Interrupt received");
                    ctrl_c.shutdown();
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            },
        }
    });

    server.run().await;
    info!(state = ?handle.state(), "Shutdown complete");
    Ok(())
}
