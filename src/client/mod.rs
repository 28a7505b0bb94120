//! Relay client session
//!
//! A [`PeerSession`] dials the server, announces itself and then runs two
//! concurrent loops over one socket: the send loop turns application
//! commands into outbound frames, the receive loop turns inbound frames
//! into application events. File payloads are streamed to disk in bounded
//! chunks, so a large incoming file never has to fit in memory.

mod events;

pub use events::{ClientCommand, SessionEvent};

use crate::config::ClientConfig;
use crate::error::{NetworkError, ProtocolError, RelayError, Result};
use crate::protocol::{Frame, FrameReader, FrameWriter, PAYLOAD_CHUNK_SIZE};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One joined connection to a relay server
///
/// # Example
///
/// ```no_run
/// use chatrelay::{ClientCommand, ClientConfig, PeerSession, SessionEvent};
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig {
///     username: "alice".to_string(),
///     ..Default::default()
/// };
/// let session = PeerSession::connect(config).await?;
///
/// let (commands, command_rx) = mpsc::channel(16);
/// let (event_tx, mut events) = mpsc::channel(64);
/// tokio::spawn(session.run(command_rx, event_tx));
///
/// commands.send(ClientCommand::SendText("hello".to_string())).await?;
/// while let Some(event) = events.recv().await {
///     if let SessionEvent::Disconnected { reason } = event {
///         println!("session over: {}", reason);
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PeerSession {
    config: ClientConfig,
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    server_addr: SocketAddr,
}

impl PeerSession {
    /// Dial the server and announce the configured username
    ///
    /// The join frame is sent before this returns, so a successfully
    /// connected session is already visible in the server's roster.
    ///
    /// # Errors
    ///
    /// Fails with `NetworkError::ConnectionFailed` when the server cannot
    /// be reached, or a configuration error when required fields are
    /// missing.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let address = config.server_addr();
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| NetworkError::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        let server_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let reader = FrameReader::with_max_frame_size(read_half, config.max_frame_size);
        let mut writer = FrameWriter::with_max_frame_size(write_half, config.max_frame_size);

        writer
            .write_frame(&Frame::Join {
                username: config.username.clone(),
            })
            .await?;
        info!(server = %server_addr, username = %config.username, "joined relay");

        Ok(Self {
            config,
            reader,
            writer,
            server_addr,
        })
    }

    /// Address of the server this session is joined to
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Drive the session until it ends
    ///
    /// Commands arriving on `commands` become outbound frames; inbound
    /// frames become events on `events`. The session ends when a
    /// [`ClientCommand::Quit`] arrives, the command channel closes, or the
    /// server goes away; the last event emitted is always
    /// [`SessionEvent::Disconnected`] unless the application stopped
    /// listening first.
    pub async fn run(
        self,
        commands: mpsc::Receiver<ClientCommand>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<()> {
        let PeerSession {
            config,
            reader,
            writer,
            server_addr,
        } = self;

        tokio::pin! {
            let send_fut = send_loop(&config, writer, commands);
            let recv_fut = receive_loop(&config, reader, events);
        }

        tokio::select! {
            send_result = &mut send_fut => {
                // We quit; wait briefly for the server's goodbye so the
                // disconnect event still reaches the application
                debug!(server = %server_addr, "send side finished, draining inbound");
                let _ = timeout(Duration::from_secs(5), &mut recv_fut).await;
                send_result
            },
            recv_result = &mut recv_fut => recv_result,
        }
    }
}

/// Turn application commands into outbound frames
async fn send_loop(
    config: &ClientConfig,
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut commands: mpsc::Receiver<ClientCommand>,
) -> Result<()> {
    while let Some(command) = commands.recv().await {
        match command {
            ClientCommand::SendText(text) => {
                let frame = Frame::Text {
                    sender: config.username.clone(),
                    text,
                };
                writer.write_frame(&frame).await?;
            },
            ClientCommand::SendFile(path) => {
                if let Err(e) = send_file(config, &mut writer, &path).await {
                    match e {
                        // Local problems skip this file; the session lives on
                        RelayError::Io(_) | RelayError::Protocol(_) => {
                            warn!(path = %path.display(), error = %e, "file not sent");
                        },
                        other => return Err(other),
                    }
                }
            },
            ClientCommand::RequestOnlineUsers => {
                writer.write_frame(&Frame::OnlineUsersRequest).await?;
            },
            ClientCommand::Quit => {
                writer.write_frame(&Frame::Quit).await?;
                writer.shutdown().await?;
                return Ok(());
            },
        }
    }

    // Command channel closed without an explicit quit; leave politely
    let _ = writer.write_frame(&Frame::Quit).await;
    let _ = writer.shutdown().await;
    Ok(())
}

/// Read one local file and send it as header plus payload
async fn send_file(
    config: &ClientConfig,
    writer: &mut FrameWriter<OwnedWriteHalf>,
    path: &Path,
) -> Result<()> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        )
        .into());
    }
    if metadata.len() > config.max_file_size {
        return Err(ProtocolError::PayloadTooLarge {
            size: metadata.len(),
            max: config.max_file_size,
        }
        .into());
    }
    let filename = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name",
            )
            .into());
        },
    };

    let payload = tokio::fs::read(path).await?;
    // The file may have grown between the stat and the read
    if payload.len() as u64 > config.max_file_size {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len() as u64,
            max: config.max_file_size,
        }
        .into());
    }

    let header = Frame::FileHeader {
        filename: filename.clone(),
        len: payload.len() as u64,
    };
    writer.write_frame_with_payload(&header, &payload).await?;
    info!(filename = %filename, len = payload.len(), "sent file");
    Ok(())
}

/// Turn inbound frames into application events
async fn receive_loop(
    config: &ClientConfig,
    mut reader: FrameReader<OwnedReadHalf>,
    events: mpsc::Sender<SessionEvent>,
) -> Result<()> {
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let _ = events
                    .send(SessionEvent::Disconnected {
                        reason: "server closed the connection".to_string(),
                    })
                    .await;
                return Ok(());
            },
            Err(e) => {
                let _ = events
                    .send(SessionEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                return Err(e);
            },
        };

        let event = match apply_inbound(config, &mut reader, frame).await {
            Ok(event) => event,
            Err(e) => {
                let _ = events
                    .send(SessionEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;
                return Err(e);
            },
        };
        if events.send(event).await.is_err() {
            // Nobody is listening anymore
            return Ok(());
        }
    }
}

/// Translate one inbound frame, saving file payloads as they stream past
async fn apply_inbound<R>(
    config: &ClientConfig,
    reader: &mut FrameReader<R>,
    frame: Frame,
) -> Result<SessionEvent>
where
    R: AsyncRead + Unpin,
{
    match frame {
        Frame::Text { sender, text } => Ok(SessionEvent::Message { sender, text }),
        Frame::OnlineUsersResponse { usernames } => Ok(SessionEvent::OnlineUsers(usernames)),
        Frame::FileHeader { filename, len } => {
            let (path, saved_name) = save_file(config, reader, &filename, len).await?;
            Ok(SessionEvent::FileReceived {
                filename: saved_name,
                path,
                len,
            })
        },
        other => Err(ProtocolError::UnexpectedFrame {
            kind: other.kind().to_string(),
        }
        .into()),
    }
}

/// Stream an announced payload into the download directory
async fn save_file<R>(
    config: &ClientConfig,
    reader: &mut FrameReader<R>,
    announced: &str,
    len: u64,
) -> Result<(PathBuf, String)>
where
    R: AsyncRead + Unpin,
{
    if len > config.max_file_size {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: config.max_file_size,
        }
        .into());
    }
    let filename = sanitize_filename(announced)?;
    tokio::fs::create_dir_all(&config.download_dir).await?;
    let path = config.download_dir.join(&filename);
    let mut file = tokio::fs::File::create(&path).await?;

    let mut remaining = len;
    let mut buf = [0u8; PAYLOAD_CHUNK_SIZE];
    while remaining > 0 {
        let want = remaining.min(PAYLOAD_CHUNK_SIZE as u64) as usize;
        let n = reader.read_payload_chunk(&mut buf[..want]).await?;
        file.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    file.flush().await?;
    info!(filename = %filename, len, path = %path.display(), "saved received file");
    Ok((path, filename))
}

/// Reduce an announced filename to a bare name safe to create locally
///
/// Only the final path component is kept, so a name like `../evil.txt`
/// lands inside the download directory as `evil.txt`.
fn sanitize_filename(announced: &str) -> Result<String> {
    let name = Path::new(announced)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(ProtocolError::MalformedFrame {
            reason: format!("unusable filename {:?}", announced),
        }
        .into());
    }
    Ok(name)
}
