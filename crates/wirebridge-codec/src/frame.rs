//! The decoded frame model.
//!
//! A [`Frame`] is what the decoder hands upward and what the encoder accepts.
//! Besides the wire frame kinds it also carries diagnostic kinds
//! ([`FrameKind::Invalid`], [`FrameKind::InvalidUtf8`],
//! [`FrameKind::FragmentedControl`]) so that protocol violations flow through
//! the same pipeline as ordinary traffic and the connection layer decides how
//! to react.

use std::fmt;

use bytes::Bytes;

/// Which end of the connection this codec instance speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Accepts connections: expects masked input, writes unmasked output.
    #[default]
    Server,
    /// Opens connections: expects unmasked input, writes masked output.
    Client,
}

impl Role {
    /// Whether frames written by this role carry a mask.
    pub fn masks_outbound(self) -> bool {
        matches!(self, Self::Client)
    }
}

/// Classification of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Text data message.
    Text,
    /// Binary data message.
    Binary,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
    /// Close control frame.
    Close,
    /// HTTP header block read before the first frame.
    Headers,
    /// Reserved opcode or out-of-sequence continuation.
    Invalid,
    /// Text message whose bytes are not valid UTF-8.
    InvalidUtf8,
    /// Control frame received without the FIN bit.
    FragmentedControl,
}

impl FrameKind {
    /// Whether this is a control frame kind.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Ping | Self::Pong | Self::Close)
    }

    /// Whether this kind signals a protocol violation.
    pub fn is_violation(self) -> bool {
        matches!(
            self,
            Self::Invalid | Self::InvalidUtf8 | Self::FragmentedControl
        )
    }

    /// Wire opcode for kinds that can be written.
    pub fn opcode(self) -> Option<u8> {
        match self {
            Self::Text => Some(0x1),
            Self::Binary => Some(0x2),
            Self::Close => Some(0x8),
            Self::Ping => Some(0x9),
            Self::Pong => Some(0xA),
            _ => None,
        }
    }
}

/// A decoded WebSocket message unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    payload: Option<String>,
    binary: Option<Bytes>,
    status: Option<u16>,
    rsv: u8,
    acceptable: bool,
}

impl Frame {
    fn new(kind: FrameKind, payload: Option<String>, binary: Option<Bytes>) -> Self {
        Self {
            kind,
            payload,
            binary,
            status: None,
            rsv: 0,
            acceptable: true,
        }
    }

    /// Create a text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Text, Some(text.into()), None)
    }

    /// Create a binary frame.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Binary, None, Some(data.into()))
    }

    /// Create a ping frame.
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Ping, None, Some(data.into()))
    }

    /// Create a pong frame echoing a ping's bytes.
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Pong, None, Some(data.into()))
    }

    /// Create a pong frame carrying text, as produced by the decoder.
    pub fn pong_text(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Pong, Some(text.into()), None)
    }

    /// Create a close frame. A missing status is written as 1000.
    pub fn close(status: Option<u16>, reason: impl Into<String>) -> Self {
        let mut frame = Self::new(FrameKind::Close, Some(reason.into()), None);
        frame.status = status;
        frame
    }

    /// Create a header block frame from raw HTTP header text.
    pub fn headers(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Headers, Some(text.into()), None)
    }

    /// Create a pre-formatted HTTP response, written to the wire verbatim.
    pub fn raw_http(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Headers, Some(text.into()), None)
    }

    /// Create a diagnostic frame for a reserved or misplaced opcode.
    pub fn invalid(reason: impl Into<String>, raw: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Invalid, Some(reason.into()), Some(raw.into()))
    }

    /// Create a diagnostic frame for a text message that failed UTF-8 validation.
    pub fn invalid_utf8(raw: impl Into<Bytes>) -> Self {
        Self::new(
            FrameKind::InvalidUtf8,
            Some("Invalid UTF-8".to_string()),
            Some(raw.into()),
        )
    }

    /// Create a diagnostic frame for a control frame missing its FIN bit.
    pub fn fragmented_control(raw: impl Into<Bytes>) -> Self {
        Self::new(
            FrameKind::FragmentedControl,
            Some("Fragmented control frame".to_string()),
            Some(raw.into()),
        )
    }

    /// Set the reserved bits observed on the wire.
    pub fn with_rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv;
        self
    }

    /// Mark whether a received Close frame may be answered with an echo.
    pub fn with_acceptable(mut self, acceptable: bool) -> Self {
        self.acceptable = acceptable;
        self
    }

    /// The frame classification.
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Text content, if any.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Raw byte content, if any.
    pub fn binary_data(&self) -> Option<&Bytes> {
        self.binary.as_ref()
    }

    /// Close status code, if any.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Reserved bits observed on the wire (0 when none set).
    pub fn rsv(&self) -> u8 {
        self.rsv
    }

    /// Whether a received Close frame is well formed enough to echo.
    ///
    /// Always true for frames that were not decoded as Close.
    pub fn is_acceptable(&self) -> bool {
        self.acceptable
    }

    /// Whether the frame carries content (text or bytes).
    pub fn is_complete(&self) -> bool {
        self.payload.is_some() || self.binary.is_some()
    }

    /// Whether this is a pre-formatted HTTP message to be written verbatim.
    pub fn is_raw_http(&self) -> bool {
        self.payload
            .as_deref()
            .is_some_and(|p| p.starts_with("HTTP/1.1"))
    }

    /// Length of the content that would be put on the wire.
    pub fn content_len(&self) -> usize {
        match (&self.binary, &self.payload) {
            (Some(data), _) => data.len(),
            (None, Some(text)) => text.len(),
            (None, None) => 0,
        }
    }

    /// Bytes that would be put on the wire, preferring binary content.
    pub fn content_bytes(&self) -> Bytes {
        match (&self.binary, &self.payload) {
            (Some(data), _) => data.clone(),
            (None, Some(text)) => Bytes::copy_from_slice(text.as_bytes()),
            (None, None) => Bytes::new(),
        }
    }

    /// Consume the frame, returning its text content.
    pub fn into_payload(self) -> Option<String> {
        self.payload
    }

    /// Consume the frame, returning its byte content.
    pub fn into_binary(self) -> Option<Bytes> {
        self.binary
    }
}

const DISPLAY_LIMIT: usize = 100;

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " status={status}")?;
        }
        if self.rsv != 0 {
            write!(f, " rsv={}", self.rsv)?;
        }
        match (&self.payload, &self.binary) {
            (Some(text), _) => {
                let shown: String = text.chars().take(DISPLAY_LIMIT).collect();
                write!(f, " payload={shown:?}")?;
                if text.chars().count() > DISPLAY_LIMIT {
                    write!(f, "...")?;
                }
            }
            (None, Some(data)) => write!(f, " binary=[{} bytes]", data.len())?,
            (None, None) => {}
        }
        Ok(())
    }
}
