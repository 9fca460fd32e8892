//! Error types for inferlink operations.

use std::time::Duration;

/// A specialized Result type for inferlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for inferlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Endpoint could not be parsed or the channel could not be set up.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Transport-level failure while establishing the channel.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Status returned by the server's RPC layer.
    #[error("server error: {0}")]
    Server(#[from] tonic::Status),

    /// `wait_for_server` gave up before the server reported ready.
    #[error("server startup timeout expired after {waited:?}")]
    StartupTimeout { waited: Duration },

    /// Tensor payload disagrees with its declared dtype/shape.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Shared-memory region could not be created, mapped, or accessed.
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O errors (TLS material, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry could plausibly succeed.
    ///
    /// Every status raised by the server's RPC layer counts as transient;
    /// local marshaling, configuration, and shared-memory failures do not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Server(_))
    }
}
