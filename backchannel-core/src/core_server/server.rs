//! Accept loop

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::core_auth::CredentialHasher;
use crate::core_session::{SessionContext, SessionRegistry};
use crate::core_store::AccountStore;
use crate::shutdown::ShutdownCoordinator;

use super::connection::{drive_connection, new_connection_table, table_handles, ConnectionTable};
use super::error::ServerError;
use super::heartbeat;

/// The WebSocket server: listener, session wiring, connection table.
pub struct WsServer {
    listener: TcpListener,
    heartbeat_interval: std::time::Duration,
    ctx: SessionContext,
    table: ConnectionTable,
    shutdown: Arc<ShutdownCoordinator>,
}

impl WsServer {
    /// Bind the listening socket. Pass port 0 to let the OS pick one
    /// (useful under test); `local_addr` reports the real port.
    pub async fn bind(
        config: &ServerConfig,
        store: Arc<dyn AccountStore>,
        hasher: Arc<CredentialHasher>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Result<Self, ServerError> {
        let addr = SocketAddr::new(config.bind_address, config.ws_port);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            heartbeat_interval: config.heartbeat_interval,
            ctx: SessionContext::new(store, hasher),
            table: new_connection_table(),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the registry, shared with every session this server spawns.
    pub fn session_registry(&self) -> SessionRegistry {
        self.ctx.registry.clone()
    }

    /// Accept connections until shutdown is triggered.
    pub async fn run(self) -> Result<(), ServerError> {
        let sweep_rx = self.shutdown.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();
        // a trigger that raced ahead of the subscriptions above is only
        // visible through the flag
        if self.shutdown.is_triggered() {
            info!("Shutdown already requested, not accepting connections");
            return Ok(());
        }

        let sweep = heartbeat::spawn_sweep(self.table.clone(), self.heartbeat_interval, sweep_rx);
        let mut next_conn_id: u64 = 1;

        info!("The WS server has been started.");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        let conn_id = next_conn_id;
                        next_conn_id += 1;
                        debug!(conn = conn_id, peer = %peer_addr, "Accepted TCP connection");

                        let ctx = self.ctx.clone();
                        let table = self.table.clone();
                        tokio::spawn(async move {
                            match tokio_tungstenite::accept_async(socket).await {
                                Ok(ws_stream) => {
                                    drive_connection(conn_id, ws_stream, ctx, table).await;
                                }
                                Err(e) => {
                                    warn!(conn = conn_id, "WebSocket handshake failed: {}", e);
                                }
                            }
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        // reap every open connection; each driver deregisters its own session
        for handle in table_handles(&self.table) {
            handle.terminate();
        }
        let _ = sweep.await;

        info!("The WS server has stopped.");
        Ok(())
    }
}
