//! Error types for amqpwire.

use thiserror::Error;

/// Main error type for all amqpwire operations.
#[derive(Debug, Error)]
pub enum AmqpwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration detected at construction time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error (malformed frame, unknown method, bad frame end).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The channel id already has a claimed handle.
    #[error("Channel {0} already claimed")]
    ChannelInUse(u16),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using AmqpwireError.
pub type Result<T> = std::result::Result<T, AmqpwireError>;
