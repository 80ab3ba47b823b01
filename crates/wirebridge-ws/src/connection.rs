//! Connection identity and the shared write handle.
//!
//! A [`ConnectionHandle`] is the write side of one live connection. It is
//! cheap to clone and is shared by the connection's dispatcher task, the
//! registry, the idle pinger and the application. Writes are serialized
//! through an async mutex so frames are never interleaved on the wire.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use wirebridge_codec::{Frame, FrameEncoder, SessionFlags};

use crate::error::{WsError, WsResult};

/// A unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a connection ID from a UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Type-erased write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LinkState {
    Open,
    Closing,
    Closed,
}

struct Inner {
    id: ConnectionId,
    writer: Mutex<Option<BoxedWriter>>,
    encoder: FrameEncoder,
    flags: Arc<SessionFlags>,
    connected_at: Instant,
    last_send: parking_lot::Mutex<Instant>,
    closing: AtomicBool,
    state_tx: watch::Sender<LinkState>,
}

/// Shared write handle for one connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Wrap the write half of a connection.
    pub fn new(
        id: ConnectionId,
        writer: BoxedWriter,
        encoder: FrameEncoder,
        flags: Arc<SessionFlags>,
    ) -> Self {
        let now = Instant::now();
        let (state_tx, _) = watch::channel(LinkState::Open);
        Self {
            inner: Arc::new(Inner {
                id,
                writer: Mutex::new(Some(writer)),
                encoder,
                flags,
                connected_at: now,
                last_send: parking_lot::Mutex::new(now),
                closing: AtomicBool::new(false),
                state_tx,
            }),
        }
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Flags shared with this connection's decoder.
    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.inner.flags
    }

    /// When the connection was accepted.
    pub fn connected_at(&self) -> Instant {
        self.inner.connected_at
    }

    /// When a frame was last written.
    pub fn last_send(&self) -> Instant {
        *self.inner.last_send.lock()
    }

    /// Time since a frame was last written.
    pub fn idle_duration(&self) -> Duration {
        self.last_send().elapsed()
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        *self.inner.state_tx.borrow() == LinkState::Closed
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        self.wait_for(LinkState::Closed).await;
    }

    /// Wait until [`send_close`](Self::send_close) or [`close`](Self::close) has been called.
    pub async fn closing(&self) {
        self.wait_for(LinkState::Closing).await;
    }

    async fn wait_for(&self, state: LinkState) {
        let mut rx = self.inner.state_tx.subscribe();
        let _ = rx.wait_for(|current| *current >= state).await;
    }

    /// Encode and write one frame.
    #[instrument(skip(self, frame), fields(connection_id = %self.inner.id, kind = ?frame.kind()))]
    pub async fn send(&self, frame: &Frame) -> WsResult<()> {
        let mut buf = BytesMut::with_capacity(frame.content_len() + 14);
        self.inner.encoder.encode(frame, &mut buf)?;

        let mut writer = self.inner.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(WsError::connection_closed(None, "connection already closed"));
        };
        stream
            .write_all(&buf)
            .await
            .map_err(|e| WsError::send_failed(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| WsError::send_failed(e.to_string()))?;
        *self.inner.last_send.lock() = Instant::now();
        Ok(())
    }

    /// Send a Close frame and mark the close handshake as started here.
    ///
    /// Does nothing if a close was already started by either side.
    pub async fn send_close(&self, status: u16, reason: &str) -> WsResult<()> {
        if self.inner.flags.close_initiated() {
            return Ok(());
        }
        self.inner.flags.set_close_initiated();
        self.inner.state_tx.send_if_modified(|state| {
            let open = *state == LinkState::Open;
            if open {
                *state = LinkState::Closing;
            }
            open
        });
        debug!(connection_id = %self.inner.id, status, reason, "Sending close frame");
        self.send(&Frame::close(Some(status), reason)).await
    }

    /// Shut the write half down and wake everything waiting on [`closed`](Self::closed).
    ///
    /// Idempotent.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            self.closed().await;
            return;
        }
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut stream) = writer {
            if let Err(e) = stream.shutdown().await {
                warn!(connection_id = %self.inner.id, error = %e, "Error shutting down stream");
            }
        }
        self.inner.state_tx.send_replace(LinkState::Closed);
        debug!(connection_id = %self.inner.id, "Connection closed");
    }

    /// Send an unsolicited ping and note that a pong is expected.
    pub async fn ping(&self) -> WsResult<()> {
        self.send(&Frame::ping(bytes::Bytes::new())).await?;
        self.inner.flags.set_expecting_pong(true);
        Ok(())
    }
}
