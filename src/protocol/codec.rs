//! Streaming frame codec
//!
//! [`FrameReader`] and [`FrameWriter`] carry [`Frame`]s over any byte
//! stream. The stream gives no message boundaries: one read may deliver a
//! fraction of a frame or several frames back to back. Reassembly is driven
//! entirely by the explicit length fields - the reader performs exact-length
//! reads for the 4-byte prefix and then the body, so partial and coalesced
//! delivery are both handled without any alignment assumption.

use crate::error::{NetworkError, ProtocolError, Result};
use crate::protocol::{Frame, DEFAULT_MAX_FRAME_SIZE, PAYLOAD_CHUNK_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Decodes frames from a byte stream
///
/// Wraps the stream in a buffered reader; a frame's length prefix is capped
/// before its body is allocated, so a hostile prefix cannot commit memory.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the default frame size cap
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a reader with an explicit frame size cap
    pub fn with_max_frame_size(inner: R, max_frame_size: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            max_frame_size,
        }
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    /// A stream that ends partway through a frame yields
    /// `NetworkError::ConnectionReset` instead - the remote vanished with a
    /// frame in flight.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use chatrelay::protocol::FrameReader;
    /// # use tokio::net::tcp::OwnedReadHalf;
    ///
    /// # async fn example(mut reader: FrameReader<OwnedReadHalf>) -> chatrelay::Result<()> {
    /// while let Some(frame) = reader.read_frame().await? {
    ///     println!("got a {} frame", frame.kind());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        // Read the first prefix byte separately: zero bytes here is a clean
        // end of stream, anything short after it is a mid-frame cut
        let mut len_bytes = [0u8; 4];
        let n = self
            .reader
            .read(&mut len_bytes[..1])
            .await
            .map_err(|e| NetworkError::ReceiveFailed {
                reason: format!("Failed to read length prefix: {}", e),
            })?;
        if n == 0 {
            return Ok(None);
        }

        self.reader
            .read_exact(&mut len_bytes[1..])
            .await
            .map_err(reset_on_eof("length prefix"))?;

        let len = u32::from_be_bytes(len_bytes) as usize;

        // Validate length before allocating
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            }
            .into());
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(reset_on_eof("frame body"))?;

        Frame::parse(&body).map(Some)
    }

    /// Read an exact-length raw payload following a file header
    ///
    /// Accumulates exactly `len` bytes in chunks, across as many underlying
    /// reads as the stream requires. The caller is responsible for checking
    /// `len` against its transfer size policy before committing memory here.
    ///
    /// # Errors
    ///
    /// A stream that ends short of `len` bytes yields
    /// `NetworkError::ConnectionReset`.
    pub async fn read_payload(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(len);
        let mut chunk = [0u8; PAYLOAD_CHUNK_SIZE];
        let mut remaining = len;
        while remaining > 0 {
            let take = PAYLOAD_CHUNK_SIZE.min(remaining);
            let n = self.read_payload_chunk(&mut chunk[..take]).await?;
            payload.extend_from_slice(&chunk[..n]);
            remaining -= n;
        }
        Ok(payload)
    }

    /// Read up to `buf.len()` payload bytes, at least one
    ///
    /// Low-level building block for callers that stream a payload somewhere
    /// (for example to disk) instead of accumulating it.
    ///
    /// # Errors
    ///
    /// End of stream before any byte is read yields
    /// `NetworkError::ConnectionReset` - a payload read is by definition
    /// mid-transfer.
    pub async fn read_payload_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self
            .reader
            .read(buf)
            .await
            .map_err(|e| NetworkError::ReceiveFailed {
                reason: format!("Failed to read payload: {}", e),
            })?;
        if n == 0 {
            return Err(NetworkError::ConnectionReset.into());
        }
        Ok(n)
    }
}

/// Encodes frames onto a byte stream
///
/// Every write is flushed before returning, so a completed call means the
/// frame has left this side's buffers.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a writer with the default frame size cap
    pub fn new(inner: W) -> Self {
        Self::with_max_frame_size(inner, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a writer with an explicit frame size cap
    pub fn with_max_frame_size(inner: W, max_frame_size: usize) -> Self {
        Self {
            writer: inner,
            max_frame_size,
        }
    }

    /// Encode and write one frame
    ///
    /// The frame is size-checked against the cap before any byte is
    /// written, so an over-long frame fails cleanly without desynchronizing
    /// the stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let body = frame.encode_body()?;
        if body.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        self.writer
            .write_all(&(body.len() as u32).to_be_bytes())
            .await
            .map_err(|e| NetworkError::SendFailed {
                reason: format!("Failed to write length prefix: {}", e),
            })?;
        self.writer
            .write_all(&body)
            .await
            .map_err(|e| NetworkError::SendFailed {
                reason: format!("Failed to write frame body: {}", e),
            })?;
        self.flush().await
    }

    /// Write one frame followed by its raw payload, flushed once
    ///
    /// Used for file transfers: the header and the payload leave as one
    /// contiguous byte run.
    pub async fn write_frame_with_payload(&mut self, header: &Frame, payload: &[u8]) -> Result<()> {
        let bytes = header.encode()?;
        self.write_raw_with_payload(&bytes, payload).await
    }

    /// Write pre-encoded frame bytes
    ///
    /// Used by the broadcast path, which encodes a frame once and fans the
    /// same bytes out to every target.
    pub async fn write_raw(&mut self, frame_bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(frame_bytes)
            .await
            .map_err(|e| NetworkError::SendFailed {
                reason: format!("Failed to write frame: {}", e),
            })?;
        self.flush().await
    }

    /// Write pre-encoded frame bytes followed by a raw payload, flushed once
    pub async fn write_raw_with_payload(
        &mut self,
        frame_bytes: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        self.writer
            .write_all(frame_bytes)
            .await
            .map_err(|e| NetworkError::SendFailed {
                reason: format!("Failed to write file header: {}", e),
            })?;
        self.writer
            .write_all(payload)
            .await
            .map_err(|e| NetworkError::SendFailed {
                reason: format!("Failed to write file payload: {}", e),
            })?;
        self.flush().await
    }

    /// Shut down the write side of the stream
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| NetworkError::SendFailed {
                reason: format!("Failed to shut down stream: {}", e),
            })?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| NetworkError::SendFailed {
                reason: format!("Failed to flush: {}", e),
            })?;
        Ok(())
    }
}

/// Map a mid-frame `UnexpectedEof` to `ConnectionReset`
fn reset_on_eof(what: &'static str) -> impl Fn(std::io::Error) -> NetworkError {
    move |e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetworkError::ConnectionReset
        } else {
            NetworkError::ReceiveFailed {
                reason: format!("Failed to read {}: {}", what, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    async fn write_to_buffer(frame: &Frame) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut writer = FrameWriter::new(&mut buffer);
        writer.write_frame(frame).await.unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_buffer() {
        let frame = Frame::Text {
            sender: "alice".to_string(),
            text: "hello".to_string(),
        };

        let buffer = write_to_buffer(&frame).await;

        // Verify format: [4 byte length][tag][fields]
        let body_len = u32::from_be_bytes(buffer[0..4].try_into().unwrap()) as usize;
        assert_eq!(buffer.len(), 4 + body_len);

        let mut reader = FrameReader::new(&buffer[..]);
        let received = reader.read_frame().await.unwrap();
        assert_eq!(received, Some(frame));
    }

    #[tokio::test]
    async fn test_coalesced_frames_read_one_at_a_time() {
        let first = Frame::Join {
            username: "alice".to_string(),
        };
        let second = Frame::OnlineUsersRequest;
        let third = Frame::Quit;

        // All three frames delivered as one contiguous buffer
        let mut buffer = write_to_buffer(&first).await;
        buffer.extend(write_to_buffer(&second).await);
        buffer.extend(write_to_buffer(&third).await);

        let mut reader = FrameReader::new(&buffer[..]);
        assert_eq!(reader.read_frame().await.unwrap(), Some(first));
        assert_eq!(reader.read_frame().await.unwrap(), Some(second));
        assert_eq!(reader.read_frame().await.unwrap(), Some(third));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clean_eof_on_frame_boundary() {
        let mut reader = FrameReader::new(&[][..]);
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_connection_reset() {
        let frame = Frame::Text {
            sender: "alice".to_string(),
            text: "truncated in flight".to_string(),
        };
        let buffer = write_to_buffer(&frame).await;

        // Cut the stream partway through the body
        let mut reader = FrameReader::new(&buffer[..buffer.len() - 4]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Network(NetworkError::ConnectionReset)
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_prefix_is_connection_reset() {
        let buffer = [0u8, 0];
        let mut reader = FrameReader::new(&buffer[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Network(NetworkError::ConnectionReset)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_allocation() {
        // A hostile length prefix with a tiny actual body
        let mut buffer = u32::MAX.to_be_bytes().to_vec();
        buffer.extend_from_slice(&[0u8; 16]);

        let mut reader = FrameReader::new(&buffer[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_writer_rejects_frame_over_cap() {
        let frame = Frame::Text {
            sender: "alice".to_string(),
            text: "x".repeat(1024),
        };

        let mut buffer = Vec::new();
        let mut writer = FrameWriter::with_max_frame_size(&mut buffer, 64);
        let err = writer.write_frame(&frame).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Protocol(ProtocolError::FrameTooLarge { .. })
        ));
        // Nothing reached the stream
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_payload_read_exact_length() {
        let header = Frame::FileHeader {
            filename: "blob.bin".to_string(),
            len: 5,
        };
        let payload = b"Hello";

        let mut buffer = Vec::new();
        let mut writer = FrameWriter::new(&mut buffer);
        writer
            .write_frame_with_payload(&header, payload)
            .await
            .unwrap();

        let mut reader = FrameReader::new(&buffer[..]);
        assert_eq!(reader.read_frame().await.unwrap(), Some(header));
        let received = reader.read_payload(5).await.unwrap();
        assert_eq!(received, payload);
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_payload_spanning_many_chunks() {
        let payload = vec![42u8; PAYLOAD_CHUNK_SIZE * 3 + 17];

        let mut buffer = Vec::new();
        let mut writer = FrameWriter::new(&mut buffer);
        let header = Frame::FileHeader {
            filename: "big.bin".to_string(),
            len: payload.len() as u64,
        };
        writer
            .write_frame_with_payload(&header, &payload)
            .await
            .unwrap();

        let mut reader = FrameReader::new(&buffer[..]);
        reader.read_frame().await.unwrap();
        let received = reader.read_payload(payload.len()).await.unwrap();
        assert_eq!(received.len(), payload.len());
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_short_payload_is_connection_reset() {
        let header = Frame::FileHeader {
            filename: "cut.bin".to_string(),
            len: 100,
        };

        let mut buffer = Vec::new();
        let mut writer = FrameWriter::new(&mut buffer);
        // Only 10 of the advertised 100 bytes ever arrive
        writer
            .write_frame_with_payload(&header, &[7u8; 10])
            .await
            .unwrap();

        let mut reader = FrameReader::new(&buffer[..]);
        reader.read_frame().await.unwrap();
        let err = reader.read_payload(100).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Network(NetworkError::ConnectionReset)
        ));
    }

    #[tokio::test]
    async fn test_frame_after_payload_stays_in_sync() {
        let header = Frame::FileHeader {
            filename: "a.bin".to_string(),
            len: 3,
        };
        let tail = Frame::Text {
            sender: "bob".to_string(),
            text: "after the file".to_string(),
        };

        let mut buffer = Vec::new();
        let mut writer = FrameWriter::new(&mut buffer);
        writer
            .write_frame_with_payload(&header, b"abc")
            .await
            .unwrap();
        writer.write_frame(&tail).await.unwrap();

        let mut reader = FrameReader::new(&buffer[..]);
        assert_eq!(reader.read_frame().await.unwrap(), Some(header));
        assert_eq!(reader.read_payload(3).await.unwrap(), b"abc");
        assert_eq!(reader.read_frame().await.unwrap(), Some(tail));
    }
}
