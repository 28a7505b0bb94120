//! Common test helpers and utilities
//!
//! Spawns real relay servers on loopback sockets and provides a raw framed
//! peer for driving them from tests.

// Each test binary compiles this module separately and uses its own subset
// of the helpers
#![allow(dead_code)]

use chatrelay::protocol::{Frame, FrameReader, FrameWriter};
use chatrelay::server::ConnectionRegistry;
use chatrelay::{RelayServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// A server configuration bound to an ephemeral loopback port
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

/// Bind and run a relay server, returning its address and registry
pub async fn spawn_relay(config: ServerConfig) -> (SocketAddr, Arc<ConnectionRegistry>) {
    let server = RelayServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry().clone();
    tokio::spawn(server.run());
    (addr, registry)
}

/// One raw framed connection to a test server
pub struct TestPeer {
    /// Reads frames the server sends this peer
    pub reader: FrameReader<OwnedReadHalf>,
    /// Writes frames to the server
    pub writer: FrameWriter<OwnedWriteHalf>,
}

impl TestPeer {
    /// Connect without joining
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    /// Read the next frame, failing the test if none arrives in time
    pub async fn expect_frame(&mut self) -> Frame {
        timeout(Duration::from_secs(2), self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed while a frame was expected")
    }

    /// Assert that no frame arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        let result = timeout(window, self.reader.read_frame()).await;
        assert!(result.is_err(), "expected silence, got {:?}", result);
    }

    /// Read until the connection is gone, failing the test if it stays open
    ///
    /// A reset counts as closed: a server that drops a peer with unread
    /// bytes still queued surfaces as an error on this side rather than a
    /// clean end of stream.
    pub async fn expect_closed(&mut self) {
        let result = timeout(Duration::from_secs(2), self.reader.read_frame())
            .await
            .expect("timed out waiting for the connection to close");
        if let Ok(frame) = result {
            assert_eq!(frame, None);
        }
    }
}

/// Connect a peer and complete the join exchange
pub async fn join_peer(addr: SocketAddr, username: &str) -> TestPeer {
    let mut peer = TestPeer::connect(addr).await;
    peer.writer
        .write_frame(&Frame::Join {
            username: username.to_string(),
        })
        .await
        .unwrap();
    peer
}

/// Block until the registry's roster equals `expected`
///
/// For tests that hold the server's registry directly; peers whose
/// registration is still in flight after their join frame was written are
/// waited out here.
pub async fn await_registry(registry: &Arc<ConnectionRegistry>, expected: &[&str]) {
    let expected: Vec<String> = expected.iter().map(|name| name.to_string()).collect();
    for _ in 0..200 {
        if registry.usernames() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "registry roster never reached {:?}, last saw {:?}",
        expected,
        registry.usernames()
    );
}

/// Block until the server's roster reaches `expected`, as seen over the wire
///
/// Registration happens asynchronously after the join frame is written, so
/// tests that depend on who is registered use this as a barrier instead of
/// sleeping.
pub async fn await_roster(peer: &mut TestPeer, expected: &[&str]) {
    let expected: Vec<String> = expected.iter().map(|name| name.to_string()).collect();
    for _ in 0..200 {
        peer.writer
            .write_frame(&Frame::OnlineUsersRequest)
            .await
            .unwrap();
        match peer.expect_frame().await {
            Frame::OnlineUsersResponse { usernames } => {
                if usernames == expected {
                    return;
                }
            },
            other => panic!("expected a roster, got {:?}", other),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("roster never reached {:?}", expected);
}
