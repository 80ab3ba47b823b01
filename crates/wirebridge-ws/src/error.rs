//! Error types for connection handling.
//!
//! This module defines the errors that can occur while running a connection:
//! transport failures, codec failures, handshake rejections, and limits.

use thiserror::Error;
use wirebridge_codec::{CloseCode, DecodeError, EncodeError, HandshakeError};

use crate::config::ConfigError;

/// Result type for connection operations.
pub type WsResult<T> = Result<T, WsError>;

/// Errors that can occur while running a connection.
#[derive(Debug, Error)]
pub enum WsError {
    /// The opening handshake was rejected.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The inbound byte stream could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// A frame could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    /// The connection was closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close status, if one was exchanged.
        code: Option<u16>,
        /// Reason for closing.
        reason: String,
    },

    /// Failed to write to the connection.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// Connection limit reached.
    #[error("connection limit reached: {0}")]
    ConnectionLimitReached(String),

    /// Connection not found.
    #[error("connection not found: {connection_id}")]
    ConnectionNotFound {
        /// The ID of the connection that was not found.
        connection_id: String,
    },

    /// Too many frames buffered while waiting for a missing sequence number.
    #[error("resequencer overflow: {pending} frames pending, waiting for #{expected}")]
    ResequenceOverflow {
        /// Sequence number the resequencer is waiting for.
        expected: u64,
        /// Number of frames already buffered.
        pending: usize,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Create a new connection closed error.
    pub fn connection_closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Create a new send failed error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed(reason.into())
    }

    /// Create a new connection limit reached error.
    pub fn connection_limit(reason: impl Into<String>) -> Self {
        Self::ConnectionLimitReached(reason.into())
    }

    /// Create a new connection not found error.
    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: connection_id.into(),
        }
    }

    /// Get the close code if this is a connection closed error.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::ConnectionClosed { code, .. } => *code,
            Self::Decode(err) => err.close_status(),
            Self::ResequenceOverflow { .. } => Some(CloseCode::InternalError.as_u16()),
            _ => None,
        }
    }

    /// Check if this error indicates the connection should be closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ConnectionLimitReached(_) | Self::ConnectionNotFound { .. } | Self::Config(_)
        )
    }

    /// Whether this is the peer hanging up between frames.
    pub fn is_soft_end(&self) -> bool {
        matches!(self, Self::Decode(err) if err.is_soft_end())
    }
}
