//! Error types for frame decoding, encoding and the opening handshake.

use thiserror::Error;

use crate::close::CloseCode;
use crate::frame::FrameKind;

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// A protocol violation detected while reading a frame header.
///
/// These are never recoverable: the connection must be closed with a
/// Close frame carrying [`ProtocolViolation::close_status`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A server received a frame without the mask bit set.
    #[error("Illegal: Expected masked data from client")]
    UnmaskedClientFrame,

    /// A client received a frame with the mask bit set.
    #[error("Illegal: Received masked data from server")]
    MaskedServerFrame,

    /// A 64-bit length field declared more than `i32::MAX` bytes.
    #[error("Max supported length exceeded: {0}")]
    LengthOverflow(u64),

    /// The declared payload length is above the configured frame limit.
    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Declared payload length.
        length: u64,
        /// Configured maximum.
        limit: usize,
    },

    /// An HTTP header line was longer than the configured limit.
    #[error("header line exceeds {0} bytes")]
    HeaderTooLong(usize),
}

impl ProtocolViolation {
    /// Close code to send to the peer for this violation.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::FrameTooLarge { .. } | Self::HeaderTooLong(_) => CloseCode::MessageTooBig,
            _ => CloseCode::Protocol,
        }
    }

    /// Close status to send to the peer for this violation.
    pub fn close_status(&self) -> u16 {
        self.close_code().as_u16()
    }
}

/// Errors that can occur while turning bytes into frames.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The peer broke the framing rules.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// The stream ended cleanly between two frames.
    #[error("Stream closed between payloads")]
    SoftEndOfStream,

    /// The stream ended while a frame was partially read.
    #[error("Socket closed during message assembly")]
    ClosedMidFrame,

    /// I/O error from the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Whether this is an end-of-stream signal rather than a real failure.
    ///
    /// Callers use this to avoid logging a peer hang-up as an error.
    pub fn is_soft_end(&self) -> bool {
        matches!(self, Self::SoftEndOfStream)
    }

    /// Close code to send before tearing the connection down, if any.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Protocol(violation) => Some(violation.close_code()),
            _ => None,
        }
    }

    /// Close status to send before tearing the connection down, if any.
    pub fn close_status(&self) -> Option<u16> {
        self.close_code().map(CloseCode::as_u16)
    }
}

/// Errors that can occur while turning frames into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The frame kind has no wire representation.
    #[error("frame of kind {0:?} cannot be written to the wire")]
    NotWritable(FrameKind),
}

/// Errors produced while answering the opening handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The frame handed to the handshake was not an HTTP header block.
    #[error("expected an HTTP header block, got {0:?}")]
    NotHeaders(FrameKind),

    /// The request line could not be parsed.
    #[error("malformed request line: {0}")]
    MalformedRequest(String),

    /// No `Sec-WebSocket-Key` header was present.
    #[error("No sec-websocket-key header detected")]
    MissingKey,

    /// `Sec-WebSocket-Version` was missing or not `13`.
    #[error("unsupported websocket version: {0:?}")]
    UnsupportedVersion(Option<String>),

    /// A request header line was longer than the configured limit.
    #[error("header line exceeds {0} bytes")]
    HeaderTooLong(usize),
}

impl HandshakeError {
    /// HTTP status code reported to the peer.
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            Self::UnsupportedVersion(_) => http::StatusCode::UPGRADE_REQUIRED,
            Self::HeaderTooLong(_) => http::StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            _ => http::StatusCode::BAD_REQUEST,
        }
    }

    /// Render the plain-text HTTP error response sent before closing.
    ///
    /// The text starts with `HTTP/1.1`, so the encoder writes it verbatim.
    pub fn to_response(&self) -> String {
        let status = self.status_code();
        let reason = status.canonical_reason().unwrap_or("Error");
        let mut response = format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason);
        if matches!(self, Self::UnsupportedVersion(_)) {
            response.push_str("Sec-WebSocket-Version: 13\r\n");
        }
        let body = format!("{reason}: {self}");
        response.push_str("Content-Type: text/plain\r\n");
        response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        response.push_str(&body);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_close_status() {
        assert_eq!(ProtocolViolation::UnmaskedClientFrame.close_status(), 1002);
        assert_eq!(ProtocolViolation::LengthOverflow(u64::MAX).close_status(), 1002);
        assert_eq!(
            ProtocolViolation::FrameTooLarge { length: 10, limit: 5 }.close_status(),
            1009
        );
    }

    #[test]
    fn test_soft_end_is_distinguishable() {
        assert!(DecodeError::SoftEndOfStream.is_soft_end());
        assert!(!DecodeError::ClosedMidFrame.is_soft_end());
        assert_eq!(DecodeError::SoftEndOfStream.close_status(), None);
    }

    #[test]
    fn test_missing_key_response() {
        let response = HandshakeError::MissingKey.to_response();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("Bad Request: No sec-websocket-key header detected"));
    }

    #[test]
    fn test_unsupported_version_response() {
        let response = HandshakeError::UnsupportedVersion(Some("8".into())).to_response();
        assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[test]
    fn test_header_too_long_response() {
        let response = HandshakeError::HeaderTooLong(2048).to_response();
        assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
        assert!(response.ends_with("header line exceeds 2048 bytes"));
    }
}
