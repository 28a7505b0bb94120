//! # Chatrelay
//!
//! A multiplexed text and file relay over TCP: one central server, many
//! peers, every frame a peer sends rebroadcast to all the others.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chatrelay::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::bind(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export main types
pub use client::{ClientCommand, PeerSession, SessionEvent};
pub use config::{ClientConfig, ServerConfig};
pub use error::{
    ConfigError, NetworkError, ProtocolError, RegistryError, RelayError, Result,
};
pub use protocol::{Frame, FrameReader, FrameWriter};
pub use server::{
    BroadcastRouter, ConnId, ConnectionRegistry, FileTransferCoordinator, InactivityReaper,
    PeerConnection, PeerWriter, RelayServer,
};
