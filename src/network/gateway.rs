//! Gateway: the TCP accept loop and the graceful-shutdown sequence.

use crate::handlers::Registry;
use crate::network::Connection;
use crate::state::Hub;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Accepts incoming TCP connections and spawns a handler task for each.
pub struct Gateway {
    listener: TcpListener,
    hub: Arc<Hub>,
    registry: Arc<Registry>,
    tracker: TaskTracker,
    live: Arc<AtomicUsize>,
}

impl Gateway {
    /// Bind to the configured listen address.
    pub async fn bind(hub: Arc<Hub>) -> std::io::Result<Self> {
        let addr = format!("{}:{}", hub.config.server.host, hub.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "Gateway listening");
        Ok(Self {
            listener,
            hub,
            registry: Arc::new(Registry::new()),
            tracker: TaskTracker::new(),
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The bound address (useful when the configured port was 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until the shutdown token fires, then run the shutdown
    /// sequence: notify clients, drain handlers, stop the pool, close the
    /// store.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        let max_connections = self.hub.config.server.max_connections;

        loop {
            tokio::select! {
                _ = self.hub.shutdown.cancelled() => {
                    info!("Shutdown signal received, closing accept loop");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((mut stream, addr)) => {
                        if self.live.load(Ordering::SeqCst) >= max_connections {
                            warn!(%addr, "Connection limit reached, refusing client");
                            let _ = stream.write_all(b"ERROR :Server full\r\n").await;
                            continue;
                        }

                        let hub = Arc::clone(&self.hub);
                        let registry = Arc::clone(&self.registry);
                        let live = Arc::clone(&self.live);

                        live.fetch_add(1, Ordering::SeqCst);
                        self.tracker.spawn(async move {
                            let connection = Connection::new(stream, addr, hub, registry);
                            if let Err(e) = connection.run().await {
                                error!(%addr, error = %e, "Connection error");
                            }
                            live.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Drain connection handlers, bounded by a ten-second grace period.
    ///
    /// Each connection task observes the hub shutdown token itself, sends
    /// `ERROR :Server shutting down`, and runs its close path; cancelling
    /// the per-connection disconnect tokens here would race that send.
    async fn shutdown(&self) {
        self.tracker.close();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait()).await {
            Ok(()) => info!("All connections closed gracefully"),
            Err(_) => warn!("Shutdown grace period expired, abandoning connection handlers"),
        }

        self.hub.pool.shutdown().await;
        self.hub.db.close().await;
        info!("Server shutdown complete");
    }
}
