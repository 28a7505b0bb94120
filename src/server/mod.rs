//! TCP relay server
//!
//! One listener task accepts connections and hands each to its own handler
//! task. Handlers share three things through [`ServerContext`]: the
//! connection registry, the broadcast router over it, and the file
//! transfer coordinator. A background reaper evicts peers that go silent.

mod broadcast;
mod handler;
mod registry;
mod reaper;
mod transfer;

pub use broadcast::BroadcastRouter;
pub use registry::{ConnId, ConnectionRegistry, PeerConnection, PeerWriter};
pub use reaper::InactivityReaper;
pub use transfer::FileTransferCoordinator;

use crate::config::ServerConfig;
use crate::error::{NetworkError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Shared state every handler task needs
#[derive(Debug)]
pub(crate) struct ServerContext {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) router: BroadcastRouter,
    pub(crate) transfer: FileTransferCoordinator,
    pub(crate) config: ServerConfig,
}

impl ServerContext {
    pub(crate) fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let transfer = FileTransferCoordinator::new(router.clone(), config.max_file_size);
        Self {
            registry,
            router,
            transfer,
            config,
        }
    }
}

/// The central relay server
///
/// Accepts peer connections, rebroadcasts their frames and relays their
/// files until the process is stopped.
///
/// # Example
///
/// ```no_run
/// use chatrelay::{RelayServer, ServerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = RelayServer::bind(ServerConfig::default()).await?;
/// println!("listening on {}", server.local_addr()?);
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    next_conn_id: AtomicU64,
}

impl RelayServer {
    /// Validate the configuration and bind the listen socket
    ///
    /// # Errors
    ///
    /// Fails with `NetworkError::BindFailed` when the address cannot be
    /// bound. That is fatal: a relay that cannot listen has nothing else
    /// to do.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let address = config.listen_addr();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| NetworkError::BindFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        info!(address = %address, "relay server listening");
        Ok(Self {
            listener,
            ctx: Arc::new(ServerContext::new(config)),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// The address the listener actually bound
    ///
    /// Useful when the configured port was 0 and the system picked one.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The shared connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.ctx.registry
    }

    /// Accept and serve connections until the process stops
    ///
    /// Spawns the idle reaper, then loops on accept. Each accepted socket
    /// gets a fresh connection handle and its own handler task; a failed
    /// accept is logged and retried after a short pause so a transient
    /// resource shortage cannot spin the loop hot.
    pub async fn run(self) -> Result<()> {
        let reaper = InactivityReaper::new(
            self.ctx.registry.clone(),
            self.ctx.config.sweep_interval,
            self.ctx.config.idle_timeout,
        );
        tokio::spawn(reaper.run());

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let id = ConnId::new(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
                    debug!(conn_id = %id, addr = %addr, "accepted connection");
                    let ctx = self.ctx.clone();
                    tokio::spawn(handler::run(ctx, id, stream, addr));
                },
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
            }
        }
    }
}
