//! Server-side file relay
//!
//! A file arrives as a header frame followed by exactly the announced
//! number of raw payload bytes. The coordinator reads the whole payload
//! off the sender first, then fans header plus payload out to every other
//! peer; a target that connects mid-transfer therefore never sees a
//! half-announced payload.

use crate::error::{ProtocolError, Result};
use crate::protocol::{Frame, FrameReader};
use crate::server::broadcast::BroadcastRouter;
use crate::server::registry::ConnId;
use tokio::io::AsyncRead;
use tracing::debug;

/// Relays announced file payloads between peers
#[derive(Debug, Clone)]
pub struct FileTransferCoordinator {
    router: BroadcastRouter,
    max_file_size: u64,
}

impl FileTransferCoordinator {
    /// Create a coordinator that fans out over `router`
    pub fn new(router: BroadcastRouter, max_file_size: u64) -> Self {
        Self {
            router,
            max_file_size,
        }
    }

    /// Read one announced payload off the sender and relay it
    ///
    /// Returns the number of peers the file was delivered to.
    ///
    /// # Errors
    ///
    /// Fails with `ProtocolError::PayloadTooLarge` before reading a single
    /// payload byte if the announced length exceeds the configured cap.
    /// The sender's stream still holds the unread payload at that point,
    /// so the caller must drop the connection rather than try to resync.
    /// Read failures mid-payload surface as `NetworkError::ConnectionReset`.
    pub async fn relay_file<R>(
        &self,
        source: ConnId,
        reader: &mut FrameReader<R>,
        filename: &str,
        len: u64,
    ) -> Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        // Enforce the cap before allocating or consuming anything
        if len > self.max_file_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: self.max_file_size,
            }
            .into());
        }

        let payload = reader.read_payload(len as usize).await?;
        debug!(conn_id = %source, filename = %filename, len, "relaying file");

        let header = Frame::FileHeader {
            filename: filename.to_string(),
            len,
        };
        self.router
            .send_file_to_all_except(source, &header, &payload)
            .await
    }
}
