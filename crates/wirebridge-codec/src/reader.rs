//! Async frame reader over any [`AsyncRead`].

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::decode::FrameDecoder;
use crate::error::{DecodeError, DecodeResult};
use crate::frame::Frame;

const READ_CHUNK: usize = 8192;

/// Reads frames from a byte stream using a [`FrameDecoder`].
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `reader` with `decoder`.
    pub fn new(reader: R, decoder: FrameDecoder) -> Self {
        Self {
            reader,
            decoder,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// The decoder driving this reader.
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Read the next complete frame.
    ///
    /// End of stream is reported as [`DecodeError::SoftEndOfStream`] when it
    /// falls between frames and [`DecodeError::ClosedMidFrame`] otherwise.
    pub async fn read_frame(&mut self) -> DecodeResult<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buffer)? {
                return Ok(frame);
            }
            self.buffer.reserve(READ_CHUNK);
            let read = self.reader.read_buf(&mut self.buffer).await?;
            if read == 0 {
                let state = self.decoder.state();
                if state.has_pending_frame() || state.in_message() || !self.buffer.is_empty() {
                    debug!("Stream ended inside a frame");
                    return Err(DecodeError::ClosedMidFrame);
                }
                return Err(DecodeError::SoftEndOfStream);
            }
        }
    }

    /// Consume the reader, returning the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
