//! Per-connection session loop
//!
//! One handler task per accepted socket. The handler owns the read half
//! outright; the write half goes behind a shared [`PeerWriter`] so that
//! broadcasts from other handlers and direct replies from this one share a
//! single write gate. The loop selects between the next inbound frame and
//! the writer's close signal, which is how an eviction or a failed
//! broadcast elsewhere wakes a handler parked on a quiet socket.

use crate::error::{NetworkError, ProtocolError, Result};
use crate::protocol::{Frame, FrameReader};
use crate::server::registry::{ConnId, PeerConnection, PeerWriter};
use crate::server::ServerContext;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// What a dispatched frame means for the session
enum SessionState {
    /// Keep reading frames
    Active,
    /// The peer asked to leave; tear the connection down cleanly
    Closed,
}

/// Drive one accepted connection from join to teardown
pub(crate) async fn run<S>(ctx: Arc<ServerContext>, id: ConnId, stream: S, addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::with_max_frame_size(read_half, ctx.config.max_frame_size);

    // Nothing is registered until the peer announces itself
    let username = match await_join(&mut reader, ctx.config.join_timeout).await {
        Ok(Some(username)) => username,
        Ok(None) => {
            debug!(conn_id = %id, addr = %addr, "peer disconnected before joining");
            return;
        },
        Err(e) => {
            warn!(conn_id = %id, addr = %addr, error = %e, "rejecting connection before join");
            // Dropping both halves closes the socket
            return;
        },
    };

    let writer = Arc::new(PeerWriter::new(write_half, addr, ctx.config.max_frame_size));
    let peer = match ctx
        .registry
        .register(id, addr, username.clone(), writer.clone())
    {
        Ok(peer) => peer,
        Err(e) => {
            warn!(conn_id = %id, addr = %addr, error = %e, "failed to register connection");
            writer.close();
            return;
        },
    };
    info!(
        conn_id = %id,
        username = %username,
        addr = %addr,
        online = ctx.registry.len(),
        "peer joined"
    );

    let result = session_loop(&ctx, &peer, &mut reader).await;
    if let Err(e) = &result {
        warn!(conn_id = %id, username = %username, error = %e, "closing connection after error");
    }

    ctx.registry.unregister(id);
    info!(
        conn_id = %id,
        username = %username,
        online = ctx.registry.len(),
        "peer left"
    );
}

/// Wait for the opening frame, which must be a join
///
/// Returns `Ok(None)` when the peer hangs up cleanly before announcing
/// itself.
async fn await_join<R>(reader: &mut FrameReader<R>, join_timeout: Duration) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let frame = match timeout(join_timeout, reader.read_frame()).await {
        Ok(result) => result?,
        Err(_) => return Err(NetworkError::JoinTimeout.into()),
    };
    match frame {
        Some(Frame::Join { username }) => Ok(Some(username)),
        Some(other) => Err(ProtocolError::UnexpectedFrame {
            kind: other.kind().to_string(),
        }
        .into()),
        None => Ok(None),
    }
}

/// Read and dispatch frames until the peer leaves or fails
async fn session_loop<R>(
    ctx: &ServerContext,
    peer: &PeerConnection,
    reader: &mut FrameReader<R>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        // The close branch is terminal, so abandoning a partial read on
        // that path is fine; the stream is never read again.
        let frame = tokio::select! {
            _ = peer.writer().closed() => {
                debug!(conn_id = %peer.id, "write side closed, ending session");
                return Ok(());
            },
            result = reader.read_frame() => result?,
        };
        let frame = match frame {
            Some(frame) => frame,
            None => {
                debug!(conn_id = %peer.id, "peer hung up");
                return Ok(());
            },
        };
        match dispatch(ctx, peer, reader, frame).await? {
            SessionState::Active => {},
            SessionState::Closed => return Ok(()),
        }
    }
}

/// Apply one inbound frame
async fn dispatch<R>(
    ctx: &ServerContext,
    peer: &PeerConnection,
    reader: &mut FrameReader<R>,
    frame: Frame,
) -> Result<SessionState>
where
    R: AsyncRead + Unpin,
{
    match frame {
        frame @ Frame::Text { .. } => {
            ctx.registry.touch(peer.id);
            let delivered = ctx.router.send_to_all_except(peer.id, &frame).await?;
            debug!(conn_id = %peer.id, delivered, "relayed text");
            Ok(SessionState::Active)
        },
        Frame::FileHeader { filename, len } => {
            ctx.registry.touch(peer.id);
            let delivered = ctx
                .transfer
                .relay_file(peer.id, reader, &filename, len)
                .await?;
            info!(
                conn_id = %peer.id,
                username = %peer.username,
                filename = %filename,
                len,
                delivered,
                "relayed file"
            );
            Ok(SessionState::Active)
        },
        Frame::OnlineUsersRequest => {
            ctx.registry.touch(peer.id);
            let response = Frame::OnlineUsersResponse {
                usernames: ctx.registry.usernames(),
            };
            peer.writer().send_frame(&response).await?;
            Ok(SessionState::Active)
        },
        Frame::Quit => {
            debug!(conn_id = %peer.id, "peer requested quit");
            Ok(SessionState::Closed)
        },
        other => Err(ProtocolError::UnexpectedFrame {
            kind: other.kind().to_string(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::FrameWriter;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    fn test_ctx() -> Arc<ServerContext> {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            join_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        Arc::new(ServerContext::new(config))
    }

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    struct TestClient {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    /// Spawn a handler over an in-memory stream and return its client end
    fn spawn_handler(ctx: &Arc<ServerContext>, id: u64) -> TestClient {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let port = 9000 + id as u16;
        tokio::spawn(run(ctx.clone(), ConnId::new(id), server_end, test_addr(port)));
        let (read_half, write_half) = tokio::io::split(client_end);
        TestClient {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    async fn join(client: &mut TestClient, username: &str) {
        client
            .writer
            .write_frame(&Frame::Join {
                username: username.to_string(),
            })
            .await
            .unwrap();
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_join_registers_peer() {
        let ctx = test_ctx();
        let mut client = spawn_handler(&ctx, 1);

        join(&mut client, "alice").await;
        wait_until(|| ctx.registry.len() == 1).await;
        assert_eq!(ctx.registry.usernames(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_first_frame_must_be_join() {
        let ctx = test_ctx();
        let mut client = spawn_handler(&ctx, 1);

        client
            .writer
            .write_frame(&Frame::Text {
                sender: "alice".to_string(),
                text: "sneaky".to_string(),
            })
            .await
            .unwrap();

        // The server hangs up without ever registering the peer
        assert_eq!(client.reader.read_frame().await.unwrap(), None);
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_before_join() {
        let ctx = test_ctx();
        let mut client = spawn_handler(&ctx, 1);

        // Send nothing; the join timeout closes the socket
        let frame = timeout(Duration::from_secs(2), client.reader.read_frame())
            .await
            .expect("join timeout never fired")
            .unwrap();
        assert_eq!(frame, None);
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_quit_unregisters_and_closes() {
        let ctx = test_ctx();
        let mut client = spawn_handler(&ctx, 1);

        join(&mut client, "alice").await;
        wait_until(|| ctx.registry.len() == 1).await;

        client.writer.write_frame(&Frame::Quit).await.unwrap();
        wait_until(|| ctx.registry.is_empty()).await;
        assert_eq!(client.reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_online_users_request_returns_roster() {
        let ctx = test_ctx();
        let mut alice = spawn_handler(&ctx, 1);
        let mut bob = spawn_handler(&ctx, 2);

        join(&mut alice, "alice").await;
        join(&mut bob, "bob").await;
        wait_until(|| ctx.registry.len() == 2).await;

        bob.writer
            .write_frame(&Frame::OnlineUsersRequest)
            .await
            .unwrap();
        let frame = bob.reader.read_frame().await.unwrap();
        assert_eq!(
            frame,
            Some(Frame::OnlineUsersResponse {
                usernames: vec!["alice".to_string(), "bob".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_text_is_relayed_to_other_peer_only() {
        let ctx = test_ctx();
        let mut alice = spawn_handler(&ctx, 1);
        let mut bob = spawn_handler(&ctx, 2);

        join(&mut alice, "alice").await;
        join(&mut bob, "bob").await;
        wait_until(|| ctx.registry.len() == 2).await;

        let message = Frame::Text {
            sender: "alice".to_string(),
            text: "hello".to_string(),
        };
        alice.writer.write_frame(&message).await.unwrap();

        assert_eq!(bob.reader.read_frame().await.unwrap(), Some(message));
        let echo = timeout(Duration::from_millis(50), alice.reader.read_frame()).await;
        assert!(echo.is_err());
    }

    #[tokio::test]
    async fn test_registry_unregister_wakes_idle_handler() {
        let ctx = test_ctx();
        let mut client = spawn_handler(&ctx, 1);

        join(&mut client, "alice").await;
        wait_until(|| ctx.registry.len() == 1).await;

        // Close from outside the handler, as the reaper would
        ctx.registry.unregister(ConnId::new(1));
        let frame = timeout(Duration::from_secs(2), client.reader.read_frame())
            .await
            .expect("handler never noticed the close")
            .unwrap();
        assert_eq!(frame, None);
    }

    #[tokio::test]
    async fn test_oversized_frame_announcement_drops_peer() {
        let ctx = test_ctx();
        let mut client = spawn_handler(&ctx, 1);

        join(&mut client, "alice").await;
        wait_until(|| ctx.registry.len() == 1).await;

        // A hostile length prefix far beyond the frame cap
        client
            .writer
            .write_raw(&[0xFF, 0xFF, 0xFF, 0xFF, 0x02])
            .await
            .unwrap();
        wait_until(|| ctx.registry.is_empty()).await;
        assert_eq!(client.reader.read_frame().await.unwrap(), None);
    }
}
