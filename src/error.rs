//! Error types for the relay
//!
//! Failures are grouped by concern: transport, wire protocol, registry and
//! configuration. Per-connection failures never escape the connection that
//! caused them; handlers convert them into an unregister of that one peer.

use thiserror::Error;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Binding the listen socket failed (fatal at startup)
    #[error("Failed to bind {address}: {reason}")]
    BindFailed {
        /// Address the listener tried to bind
        address: String,
        /// Underlying I/O error text
        reason: String,
    },

    /// Connecting to the server failed
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed {
        /// Address the client tried to reach
        address: String,
        /// Underlying I/O error text
        reason: String,
    },

    /// The stream ended in the middle of a frame or payload
    #[error("Connection reset by peer")]
    ConnectionReset,

    /// Writing to a connection that was already closed
    #[error("Connection to {peer} is closed")]
    ConnectionClosed {
        /// Remote address of the closed connection
        peer: String,
    },

    /// A write to the peer failed
    #[error("Send failed: {reason}")]
    SendFailed {
        /// Underlying I/O error text
        reason: String,
    },

    /// A read from the peer failed
    #[error("Receive failed: {reason}")]
    ReceiveFailed {
        /// Underlying I/O error text
        reason: String,
    },

    /// The peer never completed the join exchange in time
    #[error("Timed out waiting for the join frame")]
    JoinTimeout,
}

/// Wire protocol errors
///
/// All of these are fatal for the offending connection only: after a
/// malformed or oversized frame the stream position is unreliable, so the
/// connection is dropped rather than resynchronized.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A frame's length prefix exceeds the configured maximum
    #[error("Frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Length the prefix advertised
        size: usize,
        /// Configured frame size cap
        max: usize,
    },

    /// A file header advertised a payload over the configured maximum
    #[error("File payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Payload length the header advertised
        size: u64,
        /// Configured transfer size cap
        max: u64,
    },

    /// The frame tag byte is not one the protocol defines
    #[error("Unknown frame tag {tag:#04x}")]
    UnknownTag {
        /// The unrecognized tag byte
        tag: u8,
    },

    /// A frame body was structurally invalid
    #[error("Malformed frame: {reason}")]
    MalformedFrame {
        /// What was wrong with the body
        reason: String,
    },

    /// A string field does not fit the wire encoding
    #[error("Field {field} of {len} bytes does not fit the wire encoding")]
    FieldTooLong {
        /// Name of the offending field
        field: String,
        /// Actual byte length of the field
        len: usize,
    },

    /// A well-formed frame arrived where the dialog does not allow it
    #[error("Unexpected {kind} frame")]
    UnexpectedFrame {
        /// Kind of the offending frame
        kind: String,
    },
}

/// Connection registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A connection handle was registered twice
    #[error("Connection {id} is already registered")]
    DuplicateHandle {
        /// The duplicated handle value
        id: u64,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required field was left empty
    #[error("Missing required configuration field: {field}")]
    MissingRequiredField {
        /// Name of the missing field
        field: String,
    },

    /// A field holds a value outside its valid range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field
        field: String,
        /// Why the value is invalid
        reason: String,
    },
}

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Transport-level errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors outside the framed transport (file saves, local reads)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;
