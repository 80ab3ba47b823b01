//! Per-connection parser state.
//!
//! A [`ParserState`] lives inside the connection's decoder. It holds the
//! partially read frame between reads, the fragments of a message still being
//! reassembled, and what was learned from the HTTP header block. The
//! [`SessionFlags`] it carries are shared with the connection layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

/// Flags shared between a connection's decoder and its interceptor.
#[derive(Debug, Default)]
pub struct SessionFlags {
    close_initiated: AtomicBool,
    expecting_pong: AtomicBool,
}

impl SessionFlags {
    /// Create a fresh set of flags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this side has sent, or decided not to answer, a Close frame.
    pub fn close_initiated(&self) -> bool {
        self.close_initiated.load(Ordering::Acquire)
    }

    /// Mark the close handshake as started by this side.
    pub fn set_close_initiated(&self) {
        self.close_initiated.store(true, Ordering::Release);
    }

    /// Whether an unsolicited ping is awaiting its pong.
    pub fn expecting_pong(&self) -> bool {
        self.expecting_pong.load(Ordering::Acquire)
    }

    /// Record that a ping is (or is no longer) outstanding.
    pub fn set_expecting_pong(&self, expecting: bool) {
        self.expecting_pong.store(expecting, Ordering::Release);
    }
}

/// Data message type established by the first fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageKind {
    Text,
    Binary,
}

/// What the opcode byte announced for the frame being read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Announced {
    /// First (or only) frame of a data message.
    Start(MessageKind),
    /// Continuation of the message in progress.
    Continuation(MessageKind),
    Close,
    Ping,
    Pong,
    FragmentedControl,
    Invalid(String),
}

/// A frame whose header and payload are being read.
#[derive(Debug)]
pub(crate) struct PartialFrame {
    pub(crate) fin: bool,
    pub(crate) rsv: u8,
    pub(crate) announced: Announced,
    pub(crate) length: u64,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload: BytesMut,
}

impl PartialFrame {
    pub(crate) fn remaining(&self) -> usize {
        // length is capped at i32::MAX before the payload step is entered
        self.length as usize - self.payload.len()
    }

    /// Append wire bytes, unmasking with `mask[i % 4]` as they are copied.
    pub(crate) fn extend_payload(&mut self, chunk: &[u8]) {
        match self.mask {
            Some(mask) => {
                let offset = self.payload.len();
                self.payload.extend(
                    chunk
                        .iter()
                        .enumerate()
                        .map(|(i, byte)| byte ^ mask[(offset + i) % 4]),
                );
            }
            None => self.payload.extend_from_slice(chunk),
        }
    }
}

/// Position of the decoder inside the byte stream.
#[derive(Debug, Default)]
pub(crate) enum Step {
    /// Reading CRLF-terminated HTTP header lines.
    Headers,
    #[default]
    ReadingOpcode,
    ReadingLengthMarker(PartialFrame),
    ReadingExtendedLength {
        frame: PartialFrame,
        remaining: u8,
    },
    ReadingMask {
        frame: PartialFrame,
        key: [u8; 4],
        filled: usize,
    },
    ReadingPayload(PartialFrame),
}

impl Step {
    /// Whether this step can make progress without more input.
    pub(crate) fn needs_input(&self) -> bool {
        !matches!(self, Self::ReadingPayload(frame) if frame.remaining() == 0)
    }

    pub(crate) fn is_between_frames(&self) -> bool {
        matches!(self, Self::Headers | Self::ReadingOpcode)
    }
}

/// Mutable decoding state for one connection.
#[derive(Debug)]
pub struct ParserState {
    pub(crate) step: Step,
    pub(crate) fragments: Vec<Bytes>,
    pub(crate) message: Option<MessageKind>,
    pub(crate) fragment_rsv: u8,
    pub(crate) header_line: BytesMut,
    pub(crate) header_text: String,
    path: Option<String>,
    query_string: Option<String>,
    flags: Arc<SessionFlags>,
}

impl ParserState {
    /// Create state for a new connection.
    ///
    /// When `expect_headers` is set, the stream is expected to open with an
    /// HTTP header block before any frame.
    pub fn new(expect_headers: bool, flags: Arc<SessionFlags>) -> Self {
        Self {
            step: if expect_headers {
                Step::Headers
            } else {
                Step::ReadingOpcode
            },
            fragments: Vec::new(),
            message: None,
            fragment_rsv: 0,
            header_line: BytesMut::new(),
            header_text: String::new(),
            path: None,
            query_string: None,
            flags,
        }
    }

    /// Fragments of the message being reassembled, in arrival order.
    pub fn fragments(&self) -> &[Bytes] {
        &self.fragments
    }

    /// Whether a frame has been partly read and awaits more input.
    pub fn has_pending_frame(&self) -> bool {
        !self.step.is_between_frames()
            || !self.header_line.is_empty()
            || !self.header_text.is_empty()
    }

    /// Whether a fragmented message is in progress.
    pub fn in_message(&self) -> bool {
        self.message.is_some()
    }

    /// Request path from the header block, if one was read.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Query string from the request line.
    ///
    /// `None` when the target had no `?`, `Some("")` when it ended with one.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Flags shared with the connection layer.
    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    pub(crate) fn record_target(&mut self, target: &str) {
        match target.split_once('?') {
            Some((path, query)) => {
                self.path = Some(path.to_string());
                self.query_string = Some(query.to_string());
            }
            None => {
                self.path = Some(target.to_string());
                self.query_string = None;
            }
        }
    }
}
