//! Error types for the communication layer.

use thiserror::Error;

/// Result type for communication operations.
pub type CommResult<T> = Result<T, CommError>;

/// Errors that can occur while moving messages between nodes.
#[derive(Debug, Error)]
pub enum CommError {
    /// The partner could not be reached right now; retrying may help.
    #[error("partner unreachable: {0}")]
    Unreachable(String),

    /// The endpoint or its transport has been shut down for good.
    #[error("message endpoint is dead")]
    EndpointDead,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Packet exceeds the maximum frame size.
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    /// Address cannot be used with this transport.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// A result was requested before the query completed.
    #[error("query incomplete: {0}")]
    QueryIncomplete(String),
}

impl CommError {
    /// Whether retrying the operation is pointless.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EndpointDead | Self::InvalidAddress(_))
    }
}
