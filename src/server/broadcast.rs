//! Frame fan-out to every peer except the sender

use crate::error::Result;
use crate::protocol::Frame;
use crate::server::registry::{ConnId, ConnectionRegistry};
use std::sync::Arc;
use tracing::warn;

/// Rebroadcasts frames from one peer to all others
///
/// Encodes a frame once and hands the same bytes to every target's write
/// gate. A failed write tells us that target is dead, so it is dropped
/// from the registry on the spot; delivery to the remaining targets is
/// unaffected and the sender never hears about it.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    /// Create a router over the shared registry
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send one frame to every registered peer except `source`
    ///
    /// Returns the number of peers the frame was delivered to. Targets
    /// whose write fails are unregistered and not counted.
    ///
    /// # Errors
    ///
    /// Fails only if the frame itself cannot be encoded; per-target write
    /// failures are handled here and never propagate.
    pub async fn send_to_all_except(&self, source: ConnId, frame: &Frame) -> Result<usize> {
        let bytes = frame.encode()?;
        let mut delivered = 0;
        for peer in self.registry.snapshot() {
            if peer.id == source {
                continue;
            }
            match peer.writer().send_encoded(&bytes).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        conn_id = %peer.id,
                        username = %peer.username,
                        error = %e,
                        "dropping peer after failed broadcast write"
                    );
                    self.registry.unregister(peer.id);
                },
            }
        }
        Ok(delivered)
    }

    /// Send a file header plus its payload to every peer except `source`
    ///
    /// Header and payload go to each target as one uninterruptible write,
    /// so no other frame can land between them on that target's stream.
    pub async fn send_file_to_all_except(
        &self,
        source: ConnId,
        header: &Frame,
        payload: &[u8],
    ) -> Result<usize> {
        let header_bytes = header.encode()?;
        let mut delivered = 0;
        for peer in self.registry.snapshot() {
            if peer.id == source {
                continue;
            }
            match peer
                .writer()
                .send_encoded_with_payload(&header_bytes, payload)
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        conn_id = %peer.id,
                        username = %peer.username,
                        error = %e,
                        "dropping peer after failed file relay write"
                    );
                    self.registry.unregister(peer.id);
                },
            }
        }
        Ok(delivered)
    }

    /// The registry this router fans out over
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
