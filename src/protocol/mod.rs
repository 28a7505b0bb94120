//! Wire protocol
//!
//! Length-prefixed binary framing over a raw byte stream: a 4-byte
//! big-endian body length, a tag byte, then per-kind fields. File payloads
//! travel as raw byte runs announced by a `FileHeader` frame. The codec is
//! built directly on `AsyncRead`/`AsyncWrite`; there is no higher-level
//! framing or session layer underneath it.

mod codec;
mod frame;

pub use codec::{FrameReader, FrameWriter};
pub use frame::{
    Frame, TAG_FILE_HEADER, TAG_JOIN, TAG_ONLINE_USERS_REQUEST, TAG_ONLINE_USERS_RESPONSE,
    TAG_QUIT, TAG_TEXT,
};

/// Default server port
pub const DEFAULT_PORT: u16 = 12345;

/// Default maximum frame body size in bytes (64 KiB)
///
/// Caps what a length prefix may advertise, so a hostile prefix cannot
/// commit memory. File payloads are not frames and are bounded separately
/// by [`DEFAULT_MAX_FILE_SIZE`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default maximum file transfer size in bytes (32 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 32 * 1024 * 1024;

/// Chunk size for payload accumulation and file saves
pub const PAYLOAD_CHUNK_SIZE: usize = 8 * 1024;
