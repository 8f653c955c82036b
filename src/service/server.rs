//! TCP listener for world connections.
//!
//! Accepts peers, enforces the connection cap and spawns one
//! [`Connection`] task per peer. Shutdown is driven by an mpsc channel; on
//! shutdown the listener stops accepting and waits, up to the configured
//! timeout, for open connections to finish.

use crate::config::{RealmConfig, ServerConfig};
use crate::error::Result;
use crate::service::connection::{Connection, ConnectionContext};
use crate::service::registry::{AccountStore, WorldRegistry};
use crate::utils::metrics::RealmMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Start the server and stop on CTRL+C.
#[instrument(skip_all, fields(address = %config.server.address))]
pub async fn start_server(
    config: &RealmConfig,
    accounts: Arc<dyn AccountStore>,
    world: Arc<dyn WorldRegistry>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let metrics = Arc::new(RealmMetrics::new());
    let ctx = ConnectionContext::new(accounts, world, metrics, config.server.store_timeout);
    start_server_with_shutdown(&config.server, ctx, shutdown_rx).await
}

/// Bind the configured address and serve until `shutdown_rx` fires.
pub async fn start_server_with_shutdown(
    config: &ServerConfig,
    ctx: ConnectionContext,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&config.address).await?;
    info!(address = %config.address, "Listening for world connections");
    serve(listener, config, ctx, shutdown_rx).await
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: TcpListener,
    config: &ServerConfig,
    ctx: ConnectionContext,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let active_connections = Arc::new(Mutex::new(0usize));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                wait_for_connections(&active_connections, config.shutdown_timeout).await;
                ctx.metrics.log_metrics();
                return Ok(());
            }

            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                {
                    let mut count = active_connections.lock().await;
                    if *count >= config.max_connections {
                        warn!(%peer, limit = config.max_connections, "Connection limit reached, refusing peer");
                        ctx.metrics.connection_refused();
                        continue;
                    }
                    *count += 1;
                }

                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                }

                let active_connections = Arc::clone(&active_connections);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _ = Connection::new(stream, peer, ctx).run().await;

                    let mut count = active_connections.lock().await;
                    *count = count.saturating_sub(1);
                });
            }
        }
    }
}

async fn wait_for_connections(active_connections: &Mutex<usize>, limit: Duration) {
    let timeout = tokio::time::sleep(limit);
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            _ = &mut timeout => {
                warn!("Shutdown timeout reached, forcing exit");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                let connections = *active_connections.lock().await;
                if connections == 0 {
                    info!("All connections closed, shutting down");
                    break;
                }
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}
