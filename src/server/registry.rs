//! Connection registry and per-connection write gate
//!
//! The registry is the single authoritative table of live peers, one map
//! under one mutual-exclusion lock. The lock is held only for in-memory map
//! work; anything that touches the network happens on a point-in-time
//! snapshot taken first, so one stalled peer can never block registry
//! access for the rest.

use crate::error::{NetworkError, RegistryError, Result};
use crate::protocol::{Frame, FrameWriter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio::sync::{watch, Mutex as AsyncMutex};

/// Opaque connection handle
///
/// Allocated by the acceptor from a monotonic counter; never reused for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    /// Wrap a raw counter value
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The write side of one connection
///
/// Owns the stream's write half behind an async lock so that all writes
/// directed at this peer are serialized: two frames destined for the same
/// peer can never interleave their bytes on the wire, no matter how many
/// broadcasts and direct replies race. A file header and its payload go out
/// under a single lock hold, which is what lets a transfer be one atomic
/// byte run per target.
pub struct PeerWriter {
    writer: Arc<AsyncMutex<FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>>>,
    addr: SocketAddr,
    closed_tx: watch::Sender<bool>,
}

impl PeerWriter {
    /// Wrap the write half of an accepted stream
    pub fn new(
        stream: impl AsyncWrite + Send + Unpin + 'static,
        addr: SocketAddr,
        max_frame_size: usize,
    ) -> Self {
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(stream);
        let (closed_tx, _) = watch::channel(false);
        Self {
            writer: Arc::new(AsyncMutex::new(FrameWriter::with_max_frame_size(
                boxed,
                max_frame_size,
            ))),
            addr,
            closed_tx,
        }
    }

    /// Remote address of this connection
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Encode and send one frame
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let mut writer = self.writer.lock().await;
        writer.write_frame(frame).await
    }

    /// Send pre-encoded frame bytes
    ///
    /// The broadcast path encodes a frame once and fans the same bytes out
    /// to every target through this.
    pub async fn send_encoded(&self, frame_bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let mut writer = self.writer.lock().await;
        writer.write_raw(frame_bytes).await
    }

    /// Send pre-encoded header bytes and a raw payload as one write unit
    ///
    /// The write lock is held across both, so no other frame for this peer
    /// can land between the header and its payload.
    pub async fn send_encoded_with_payload(
        &self,
        frame_bytes: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let mut writer = self.writer.lock().await;
        writer.write_raw_with_payload(frame_bytes, payload).await
    }

    /// Close the write side, exactly once
    ///
    /// The first caller raises the close signal and hands the stream
    /// shutdown to a background task; later calls are no-ops. The shutdown
    /// has to wait its turn on the write gate, and a write parked behind a
    /// stalled peer can hold that gate indefinitely, so the caller never
    /// waits on it. Shutting down the write half sends FIN, so the
    /// remote's read side sees end of stream.
    pub fn close(&self) {
        if self.closed_tx.send_replace(true) {
            return; // already closed
        }
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut writer = writer.lock().await;
            let _ = writer.shutdown().await; // Ignore errors during shutdown
        });
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Wait until [`close`](Self::close) runs
    ///
    /// The connection's read loop selects on this next to its pending read;
    /// it is how an eviction or a failed broadcast wakes a handler that is
    /// parked waiting for the peer's next frame.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        // The sender lives in self, so this can only end by seeing `true`
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn closed_error(&self) -> crate::error::RelayError {
        NetworkError::ConnectionClosed {
            peer: self.addr.to_string(),
        }
        .into()
    }
}

impl fmt::Debug for PeerWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerWriter")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One live peer, as the registry records it
///
/// Owned by the registry once registered; handlers keep only the reader
/// half and a clone of the shared writer. Snapshots hand out copies of this
/// record, never references into the map.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// Connection handle
    pub id: ConnId,
    /// Remote address
    pub addr: SocketAddr,
    /// Display name announced at join (unique only by convention)
    pub username: String,
    /// When this peer last sent a frame
    pub last_active: Instant,
    writer: Arc<PeerWriter>,
}

impl PeerConnection {
    /// The per-connection write gate
    pub fn writer(&self) -> &Arc<PeerWriter> {
        &self.writer
    }

    /// How long this peer has been idle
    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

/// Concurrency-safe directory of live peer connections
///
/// # Example
///
/// ```
/// use chatrelay::server::ConnectionRegistry;
///
/// let registry = ConnectionRegistry::new();
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: Mutex<HashMap<ConnId, PeerConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new peer
    ///
    /// # Errors
    ///
    /// Fails with `RegistryError::DuplicateHandle` if the handle is already
    /// present. Handles are allocated from a monotonic counter, so this
    /// only fires on a handler bug; the check keeps the at-most-once
    /// invariant explicit.
    pub fn register(
        &self,
        id: ConnId,
        addr: SocketAddr,
        username: String,
        writer: Arc<PeerWriter>,
    ) -> Result<PeerConnection> {
        let mut peers = self.peers.lock();
        if peers.contains_key(&id) {
            return Err(RegistryError::DuplicateHandle { id: id.as_u64() }.into());
        }
        let peer = PeerConnection {
            id,
            addr,
            username,
            last_active: Instant::now(),
            writer,
        };
        peers.insert(id, peer.clone());
        Ok(peer)
    }

    /// Remove a peer and close its socket
    ///
    /// Idempotent: returns `true` if the peer was present, `false` if it
    /// was already gone. The socket close happens after the registry lock
    /// is released and never waits on the peer's write gate.
    pub fn unregister(&self, id: ConnId) -> bool {
        let removed = self.peers.lock().remove(&id);
        match removed {
            Some(peer) => {
                peer.writer.close();
                true
            },
            None => false,
        }
    }

    /// Refresh a peer's last-activity timestamp
    ///
    /// No-op if the handle is absent (the connection is already gone).
    pub fn touch(&self, id: ConnId) {
        if let Some(peer) = self.peers.lock().get_mut(&id) {
            peer.last_active = Instant::now();
        }
    }

    /// Point-in-time copy of every live peer, ordered by handle
    ///
    /// Callers iterate the copy for I/O without holding the registry lock;
    /// handle order is registration order because handles are monotonic.
    pub fn snapshot(&self) -> Vec<PeerConnection> {
        let mut peers: Vec<PeerConnection> = self.peers.lock().values().cloned().collect();
        peers.sort_by_key(|peer| peer.id);
        peers
    }

    /// Currently registered display names, first-registered order
    ///
    /// Names are unique only by convention, so accidental duplicates are
    /// collapsed here rather than listed twice.
    pub fn usernames(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.snapshot()
            .into_iter()
            .filter(|peer| seen.insert(peer.username.clone()))
            .map(|peer| peer.username)
            .collect()
    }

    /// Remove every peer idle longer than `threshold`
    ///
    /// The idle check runs against the live map under the lock, not a
    /// stale snapshot, so a peer that refreshed its activity moments ago is
    /// never evicted. Evicted sockets are closed after the lock is
    /// released; the removed records are returned for logging. A sweep
    /// never waits on an evicted peer's write gate, so one stalled
    /// consumer cannot wedge eviction for everyone else.
    pub fn evict_idle(&self, threshold: Duration) -> Vec<PeerConnection> {
        let now = Instant::now();
        let evicted: Vec<PeerConnection> = {
            let mut peers = self.peers.lock();
            let expired: Vec<ConnId> = peers
                .iter()
                .filter(|(_, peer)| now.duration_since(peer.last_active) > threshold)
                .map(|(id, _)| *id)
                .collect();
            expired.iter().filter_map(|id| peers.remove(id)).collect()
        };
        for peer in &evicted {
            peer.writer.close();
        }
        evicted
    }

    /// Whether a handle is currently registered
    pub fn contains(&self, id: ConnId) -> bool {
        self.peers.lock().contains_key(&id)
    }

    /// Number of live peers
    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    /// Whether no peers are registered
    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Remove and close every peer
    pub fn close_all(&self) {
        let drained: Vec<PeerConnection> = {
            let mut peers = self.peers.lock();
            peers.drain().map(|(_, peer)| peer).collect()
        };
        for peer in &drained {
            peer.writer.close();
        }
    }
}
