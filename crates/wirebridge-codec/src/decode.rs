//! Resumable frame decoder.
//!
//! [`FrameDecoder::decode`] consumes whatever bytes are available and either
//! returns a complete [`Frame`] or stores its progress in the
//! [`ParserState`] and asks for more input. The header of each frame is read
//! one byte at a time through an explicit step machine:
//!
//! ```text
//! ReadingOpcode -> ReadingLengthMarker -> [ReadingExtendedLength] -> [ReadingMask] -> ReadingPayload
//! ```
//!
//! Non-final data fragments are absorbed into the state and never returned;
//! control frames arriving between fragments are returned as they complete.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::close::is_acceptable_status;
use crate::error::{DecodeResult, ProtocolViolation};
use crate::frame::{Frame, Role};
use crate::state::{Announced, MessageKind, ParserState, PartialFrame, SessionFlags, Step};

/// Default limit for a single HTTP header line.
pub const DEFAULT_MAX_HEADER_LINE: usize = 2048;

/// Default limit for a single frame payload (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest length accepted in a 64-bit length field.
const MAX_SUPPORTED_LENGTH: u64 = 0x7FFF_FFFF;

/// Largest payload a Close frame may carry.
const MAX_CONTROL_PAYLOAD: usize = 125;

/// Decoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Reject text messages that are not valid UTF-8 (default: false).
    pub validate_utf8: bool,
    /// Expect an HTTP header block before the first frame (default: true).
    pub expect_headers: bool,
    /// Maximum length of one header line in bytes (default: 2048).
    pub max_header_line: usize,
    /// Maximum payload length of one frame in bytes (default: 16 MB).
    pub max_frame_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            validate_utf8: false,
            expect_headers: true,
            max_header_line: DEFAULT_MAX_HEADER_LINE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl DecoderConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether text payloads are validated as UTF-8.
    pub fn validate_utf8(mut self, validate: bool) -> Self {
        self.validate_utf8 = validate;
        self
    }

    /// Set whether the stream opens with an HTTP header block.
    pub fn expect_headers(mut self, expect: bool) -> Self {
        self.expect_headers = expect;
        self
    }

    /// Set the maximum header line length.
    pub fn max_header_line(mut self, size: usize) -> Self {
        self.max_header_line = size;
        self
    }

    /// Set the maximum frame payload length.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

/// Turns a byte stream into [`Frame`]s for one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    role: Role,
    config: DecoderConfig,
    state: ParserState,
}

impl FrameDecoder {
    /// Create a decoder with its own session flags.
    pub fn new(role: Role, config: DecoderConfig) -> Self {
        Self::with_flags(role, config, Arc::new(SessionFlags::new()))
    }

    /// Create a decoder sharing `flags` with the connection layer.
    pub fn with_flags(role: Role, config: DecoderConfig, flags: Arc<SessionFlags>) -> Self {
        let state = ParserState::new(config.expect_headers, flags);
        Self {
            role,
            config,
            state,
        }
    }

    /// The role this decoder reads for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The decoder configuration.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Per-connection parser state.
    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Decode the next complete frame from `src`.
    ///
    /// Consumed bytes are removed from `src`. Returns `Ok(None)` once `src` is
    /// exhausted without completing a frame; progress is kept for the next
    /// call.
    pub fn decode(&mut self, src: &mut BytesMut) -> DecodeResult<Option<Frame>> {
        loop {
            if matches!(self.state.step, Step::Headers) {
                return self.decode_headers(src);
            }
            let Some(partial) = self.decode_frame(src)? else {
                return Ok(None);
            };
            if let Some(frame) = self.finish(partial) {
                return Ok(Some(frame));
            }
        }
    }

    /// Read header lines until the blank line that ends the block.
    fn decode_headers(&mut self, src: &mut BytesMut) -> DecodeResult<Option<Frame>> {
        let limit = self.config.max_header_line;
        loop {
            let Some(newline) = src.iter().position(|b| *b == b'\n') else {
                if self.state.header_line.len() + src.len() > limit {
                    return Err(ProtocolViolation::HeaderTooLong(limit).into());
                }
                self.state.header_line.extend_from_slice(src);
                src.clear();
                return Ok(None);
            };

            let chunk = src.split_to(newline + 1);
            self.state.header_line.extend_from_slice(&chunk);
            let line = self.state.header_line.split();
            let line = strip_line_ending(&line);
            if line.len() > limit {
                return Err(ProtocolViolation::HeaderTooLong(limit).into());
            }

            if line.is_empty() {
                self.state.step = Step::ReadingOpcode;
                let text = std::mem::take(&mut self.state.header_text);
                debug!(
                    path = self.state.path().unwrap_or_default(),
                    "Header block complete"
                );
                return Ok(Some(Frame::headers(text)));
            }

            let line = String::from_utf8_lossy(line);
            if self.state.header_text.is_empty() {
                if let Some(target) = line.split_whitespace().nth(1) {
                    self.state.record_target(target);
                }
            }
            trace!(line = %line, "Header line");
            self.state.header_text.push_str(&line);
            self.state.header_text.push_str("\r\n");
        }
    }

    /// Drive the header step machine until a whole frame has been read.
    fn decode_frame(&mut self, src: &mut BytesMut) -> DecodeResult<Option<PartialFrame>> {
        loop {
            if src.is_empty() && self.state.step.needs_input() {
                return Ok(None);
            }
            let next = match std::mem::take(&mut self.state.step) {
                Step::Headers => {
                    self.state.step = Step::Headers;
                    return Ok(None);
                }
                Step::ReadingOpcode => Step::ReadingLengthMarker(self.announce(src.get_u8())),
                Step::ReadingLengthMarker(mut frame) => {
                    let byte = src.get_u8();
                    let masked = byte & 0x80 != 0;
                    match self.role {
                        Role::Server if !masked => {
                            return Err(ProtocolViolation::UnmaskedClientFrame.into())
                        }
                        Role::Client if masked => {
                            return Err(ProtocolViolation::MaskedServerFrame.into())
                        }
                        _ => {}
                    }
                    match byte & 0x7f {
                        126 => Step::ReadingExtendedLength {
                            frame,
                            remaining: 2,
                        },
                        127 => Step::ReadingExtendedLength {
                            frame,
                            remaining: 8,
                        },
                        length => {
                            frame.length = u64::from(length);
                            self.length_known(frame)?
                        }
                    }
                }
                Step::ReadingExtendedLength {
                    mut frame,
                    remaining,
                } => {
                    frame.length = (frame.length << 8) | u64::from(src.get_u8());
                    if remaining == 1 {
                        self.length_known(frame)?
                    } else {
                        Step::ReadingExtendedLength {
                            frame,
                            remaining: remaining - 1,
                        }
                    }
                }
                Step::ReadingMask {
                    mut frame,
                    mut key,
                    filled,
                } => {
                    key[filled] = src.get_u8();
                    if filled == 3 {
                        frame.mask = Some(key);
                        Step::ReadingPayload(frame)
                    } else {
                        Step::ReadingMask {
                            frame,
                            key,
                            filled: filled + 1,
                        }
                    }
                }
                Step::ReadingPayload(mut frame) => {
                    let take = frame.remaining().min(src.len());
                    let chunk = src.split_to(take);
                    frame.extend_payload(&chunk);
                    if frame.remaining() == 0 {
                        return Ok(Some(frame));
                    }
                    Step::ReadingPayload(frame)
                }
            };
            self.state.step = next;
        }
    }

    /// Classify a frame from its first byte.
    fn announce(&self, byte: u8) -> PartialFrame {
        let fin = byte & 0x80 != 0;
        let rsv = (byte >> 4) & 0x07;
        let opcode = byte & 0x0f;
        let announced = match opcode {
            0x0 => match self.state.message {
                Some(kind) => Announced::Continuation(kind),
                None => Announced::Invalid("Unexpected continuation frame".to_string()),
            },
            0x1 | 0x2 if self.state.message.is_some() => {
                Announced::Invalid("Expected continuation frame".to_string())
            }
            0x1 => Announced::Start(MessageKind::Text),
            0x2 => Announced::Start(MessageKind::Binary),
            0x8..=0xA if !fin => Announced::FragmentedControl,
            0x8 => Announced::Close,
            0x9 => Announced::Ping,
            0xA => Announced::Pong,
            reserved => Announced::Invalid(format!("Reserved opcode {reserved:x}")),
        };
        trace!(fin, rsv, opcode, "Frame header");
        PartialFrame {
            fin,
            rsv,
            announced,
            length: 0,
            mask: None,
            payload: BytesMut::new(),
        }
    }

    /// Validate a completed length field and pick the next step.
    fn length_known(&self, mut frame: PartialFrame) -> DecodeResult<Step> {
        if frame.length > MAX_SUPPORTED_LENGTH {
            return Err(ProtocolViolation::LengthOverflow(frame.length).into());
        }
        if frame.length > self.config.max_frame_size as u64 {
            return Err(ProtocolViolation::FrameTooLarge {
                length: frame.length,
                limit: self.config.max_frame_size,
            }
            .into());
        }
        frame.payload.reserve(frame.remaining().min(64 * 1024));
        Ok(match self.role {
            Role::Server => Step::ReadingMask {
                frame,
                key: [0; 4],
                filled: 0,
            },
            Role::Client => Step::ReadingPayload(frame),
        })
    }

    /// Turn a fully read frame into a [`Frame`], or absorb it as a fragment.
    fn finish(&mut self, partial: PartialFrame) -> Option<Frame> {
        let PartialFrame {
            fin,
            rsv,
            announced,
            payload,
            ..
        } = partial;
        let bytes = payload.freeze();

        let frame = match announced {
            Announced::FragmentedControl => Frame::fragmented_control(bytes),
            Announced::Invalid(reason) => Frame::invalid(reason, bytes),
            Announced::Ping => Frame::ping(bytes),
            Announced::Pong => Frame::pong_text(String::from_utf8_lossy(&bytes)),
            Announced::Close => self.close_frame(&bytes),
            Announced::Start(kind) | Announced::Continuation(kind) => {
                if !fin {
                    self.state.message = Some(kind);
                    self.state.fragment_rsv |= rsv;
                    self.state.fragments.push(bytes);
                    trace!(
                        fragments = self.state.fragments.len(),
                        "Fragment absorbed"
                    );
                    return None;
                }
                let data = self.reassemble(bytes);
                let rsv = rsv | std::mem::take(&mut self.state.fragment_rsv);
                self.state.message = None;
                return Some(self.data_frame(kind, data).with_rsv(rsv));
            }
        };
        Some(frame.with_rsv(rsv))
    }

    /// Join pending fragments with the final chunk and clear them.
    fn reassemble(&mut self, last: Bytes) -> Bytes {
        if self.state.fragments.is_empty() {
            return last;
        }
        let total = self.state.fragments.iter().map(Bytes::len).sum::<usize>() + last.len();
        let mut joined = BytesMut::with_capacity(total);
        for fragment in self.state.fragments.drain(..) {
            joined.extend_from_slice(&fragment);
        }
        joined.extend_from_slice(&last);
        joined.freeze()
    }

    fn data_frame(&self, kind: MessageKind, data: Bytes) -> Frame {
        match kind {
            MessageKind::Binary => Frame::binary(data),
            MessageKind::Text if self.config.validate_utf8 => {
                match std::str::from_utf8(&data) {
                    Ok(text) => Frame::text(text),
                    Err(_) => Frame::invalid_utf8(data),
                }
            }
            MessageKind::Text => Frame::text(String::from_utf8_lossy(&data)),
        }
    }

    /// Build a Close frame, recording whether it is acceptable to echo.
    ///
    /// Session flags are left alone: frames decoded ahead of this one must
    /// still be handled as if the connection were open.
    fn close_frame(&self, bytes: &Bytes) -> Frame {
        let status = (bytes.len() >= 2).then(|| u16::from_be_bytes([bytes[0], bytes[1]]));
        let reason_bytes = bytes.get(2..).unwrap_or_default();
        let reason = String::from_utf8_lossy(reason_bytes);

        let reason_invalid =
            self.config.validate_utf8 && std::str::from_utf8(reason_bytes).is_err();
        let unacceptable = bytes.len() == 1
            || bytes.len() > MAX_CONTROL_PAYLOAD
            || reason_invalid
            || status.is_some_and(|s| !is_acceptable_status(s));
        if unacceptable {
            debug!(
                length = bytes.len(),
                status = status.unwrap_or_default(),
                "Unacceptable close frame"
            );
        }

        Frame::close(status, reason).with_acceptable(!unacceptable)
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
