//! RFC 6455 frame codec for raw byte streams.
//!
//! This crate turns a bidirectional byte stream into WebSocket frames and
//! back. It does not own sockets or tasks; it is driven by a connection layer
//! such as `wirebridge-ws`.
//!
//! # Features
//!
//! - **Resumable decoding**: partial reads leave progress in a per-connection
//!   [`ParserState`] and decoding picks up where it stopped
//! - **Fragment reassembly** with control frames allowed between fragments
//! - **Diagnostic frames** for protocol violations instead of hard errors,
//!   so the connection layer can answer with the right close status
//! - **Opening handshake** parsing and `Sec-WebSocket-Accept` generation
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use wirebridge_codec::{DecoderConfig, Frame, FrameDecoder, FrameEncoder, Role};
//!
//! let mut wire = BytesMut::new();
//! FrameEncoder::new(Role::Client)
//!     .encode(&Frame::text("hello"), &mut wire)
//!     .unwrap();
//!
//! let mut decoder = FrameDecoder::new(Role::Server, DecoderConfig::new().expect_headers(false));
//! let frame = decoder.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(frame.payload(), Some("hello"));
//! ```

pub mod close;
pub mod decode;
pub mod encode;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod reader;
pub mod state;

pub use close::{is_acceptable_status, CloseCode};
pub use decode::{DecoderConfig, FrameDecoder};
pub use encode::{apply_mask, FrameEncoder, DEFAULT_CLOSE_STATUS};
pub use error::{DecodeError, DecodeResult, EncodeError, HandshakeError, ProtocolViolation};
pub use frame::{Frame, FrameKind, Role};
pub use handshake::{compute_accept_key, generate_handshake, Handshake, UpgradeRequest};
pub use reader::FrameReader;
pub use state::{ParserState, SessionFlags};
