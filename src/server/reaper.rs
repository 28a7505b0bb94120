//! Periodic eviction of idle connections

use crate::server::registry::ConnectionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// Background task that evicts peers idle past a threshold
///
/// Runs one sweep per interval against the shared registry. A peer's
/// activity clock is refreshed by every frame it sends, so only genuinely
/// silent connections age out. Eviction closes the socket, which wakes
/// that connection's handler and finishes the teardown.
#[derive(Debug)]
pub struct InactivityReaper {
    registry: Arc<ConnectionRegistry>,
    sweep_interval: Duration,
    idle_timeout: Duration,
}

impl InactivityReaper {
    /// Create a reaper over the shared registry
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sweep_interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sweep_interval,
            idle_timeout,
        }
    }

    /// Sweep forever
    ///
    /// Never returns; intended to run under `tokio::spawn` for the life of
    /// the server.
    pub async fn run(self) {
        let mut ticker = interval(self.sweep_interval);
        // The first tick fires immediately and sweeps an empty or fresh
        // registry, which is harmless
        loop {
            ticker.tick().await;
            let evicted = self.registry.evict_idle(self.idle_timeout);
            for peer in &evicted {
                info!(
                    conn_id = %peer.id,
                    username = %peer.username,
                    idle_secs = peer.idle_for().as_secs(),
                    "evicted idle peer"
                );
            }
            if evicted.is_empty() {
                debug!(online = self.registry.len(), "idle sweep found nothing");
            }
        }
    }
}
