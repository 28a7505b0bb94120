//! Configuration for the relay server and client
//!
//! Plain structs with defaults matching the shipped binaries; both sides
//! validate before any socket is opened. There is no configuration file:
//! everything is set in code or through CLI flags.

use crate::protocol::{DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

/// Relay server configuration
///
/// Instances are usually built from `Default` with a few fields overridden:
///
/// ```
/// use chatrelay::ServerConfig;
///
/// let config = ServerConfig {
///     port: 0, // pick an ephemeral port
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to listen on
    pub host: String,

    /// Port to listen on
    ///
    /// If set to 0, a random available port will be selected.
    pub port: u16,

    /// Maximum accepted frame body size in bytes
    ///
    /// Frames advertising a larger length are rejected before allocation and
    /// the sending connection is dropped.
    pub max_frame_size: usize,

    /// Maximum accepted file transfer size in bytes
    ///
    /// File headers advertising a larger payload are rejected before any of
    /// the payload is read.
    pub max_file_size: u64,

    /// Period between inactivity sweeps
    pub sweep_interval: Duration,

    /// Idle time after which a peer is evicted
    pub idle_timeout: Duration,

    /// How long a new connection may take to send its join frame
    pub join_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            sweep_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300),
            join_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// The address string the listener will bind, `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if any validation check fails:
    /// - `host` must be non-empty
    /// - `max_frame_size` and `max_file_size` must be greater than 0
    /// - all durations must be greater than zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::ConfigError;

        if self.host.is_empty() {
            return Err(ConfigError::MissingRequiredField {
                field: "host".to_string(),
            }
            .into());
        }

        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_size".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_file_size".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        if self.idle_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "idle_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        if self.join_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "join_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        // Port 0 is valid (means random port)

        Ok(())
    }
}

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host to connect to
    pub host: String,

    /// Server port to connect to
    pub port: u16,

    /// Display name announced in the join frame
    ///
    /// Unique only by convention; the server does not enforce uniqueness.
    pub username: String,

    /// Directory where received files are saved
    ///
    /// Created on first use. Relative paths resolve against the working
    /// directory.
    pub download_dir: PathBuf,

    /// Maximum accepted frame body size in bytes
    pub max_frame_size: usize,

    /// Maximum accepted file transfer size in bytes
    pub max_file_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            download_dir: PathBuf::from("received_files"),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl ClientConfig {
    /// The address string the client will dial, `host:port`
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if any validation check fails:
    /// - `host` and `username` must be non-empty
    /// - `download_dir` must be non-empty
    /// - `max_frame_size` and `max_file_size` must be greater than 0
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::ConfigError;

        if self.host.is_empty() {
            return Err(ConfigError::MissingRequiredField {
                field: "host".to_string(),
            }
            .into());
        }

        if self.username.is_empty() {
            return Err(ConfigError::MissingRequiredField {
                field: "username".to_string(),
            }
            .into());
        }

        if self.download_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequiredField {
                field: "download_dir".to_string(),
            }
            .into());
        }

        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_size".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_file_size".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}
