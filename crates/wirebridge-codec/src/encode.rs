//! Frame encoder.
//!
//! Every frame is written with the FIN bit set; outbound messages are never
//! fragmented. Frames whose text starts with `HTTP/1.1` are pre-formatted
//! handshake responses and are copied to the output untouched.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::frame::{Frame, FrameKind, Role};

const FIN: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// Status written when a Close frame carries none.
pub const DEFAULT_CLOSE_STATUS: u16 = 1000;

/// XOR `data` in place with `mask[i % 4]`.
///
/// Applying the same mask twice restores the input.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Mask key derived from the current time (low 32 bits of epoch milliseconds).
pub fn clock_mask() -> [u8; 4] {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    (millis as u32).to_be_bytes()
}

/// Writes [`Frame`]s in wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    role: Role,
}

impl FrameEncoder {
    /// Create an encoder for `role`.
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    /// The role this encoder writes for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Encode `frame` into `dst`, masking with a fresh key in the client role.
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let mask = self.role.masks_outbound().then(clock_mask);
        self.encode_with_mask(frame, mask, dst)
    }

    /// Encode `frame` into `dst` with an explicit mask key.
    ///
    /// For Close frames the status code is part of the masked payload.
    pub fn encode_with_mask(
        &self,
        frame: &Frame,
        mask: Option<[u8; 4]>,
        dst: &mut BytesMut,
    ) -> Result<(), EncodeError> {
        if frame.is_raw_http() {
            dst.extend_from_slice(frame.payload().unwrap_or_default().as_bytes());
            return Ok(());
        }
        let opcode = frame
            .kind()
            .opcode()
            .ok_or(EncodeError::NotWritable(frame.kind()))?;

        let content = frame.content_bytes();
        let close = frame.kind() == FrameKind::Close;
        let length = content.len() + if close { 2 } else { 0 };

        dst.reserve(length + 14);
        dst.put_u8(FIN | opcode);

        let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
        if length < 126 {
            dst.put_u8(mask_bit | length as u8);
        } else if length < 65536 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(length as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(length as u64);
        }
        if let Some(key) = mask {
            dst.put_slice(&key);
        }

        let start = dst.len();
        if close {
            dst.put_u16(frame.status().unwrap_or(DEFAULT_CLOSE_STATUS));
        }
        dst.extend_from_slice(&content);
        if let Some(key) = mask {
            apply_mask(&mut dst[start..], key);
        }
        Ok(())
    }
}
