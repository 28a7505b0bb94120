//! Commands into and events out of a peer session
//!
//! The session owns the socket; the application talks to it over two
//! channels. Commands flow in, events flow out, and neither side ever
//! touches the stream directly.

use std::path::PathBuf;

/// An instruction for a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Broadcast a line of text to every other peer
    SendText(String),
    /// Read a local file and broadcast it to every other peer
    SendFile(PathBuf),
    /// Ask the server who is currently online
    RequestOnlineUsers,
    /// Announce an orderly disconnect and end the session
    Quit,
}

/// Something that happened on the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Another peer sent a text line
    Message {
        /// Display name of the sending peer
        sender: String,
        /// The message text
        text: String,
    },
    /// The server answered an online-users request
    OnlineUsers(Vec<String>),
    /// A broadcast file arrived and was saved to disk
    FileReceived {
        /// Name the file was sent under
        filename: String,
        /// Where it was saved locally
        path: PathBuf,
        /// Payload length in bytes
        len: u64,
    },
    /// The session ended and no further events will follow
    Disconnected {
        /// Human-readable cause
        reason: String,
    },
}
