//! Accepting connections and running them.
//!
//! [`Endpoint::accept`] takes any duplex byte stream and starts two tasks
//! for it:
//!
//! ```text
//!  socket ──► reader task ──(seq, frame)──► dispatcher task ──► inbound channel
//!             FrameReader                   Resequencer
//!                                           Interceptor ──► replies ──► ConnectionHandle ──► socket
//!                                                       └─► events ──► broadcast channel
//! ```
//!
//! The reader only decodes. The dispatcher owns the interceptor, applies
//! each [`Reaction`](crate::Reaction), and tears the connection down when
//! the close handshake finishes, the peer disconnects, or a Close sent by
//! this side goes unanswered for the close timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};
use wirebridge_codec::{
    CloseCode, DecodeError, Frame, FrameDecoder, FrameEncoder, FrameReader, HandshakeError,
    ProtocolViolation, Role, SessionFlags,
};

use crate::config::WsConfig;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::WsResult;
use crate::event::{ConnectionEvent, InboundMessage};
use crate::interceptor::{Interceptor, Phase};
use crate::pinger::IdlePinger;
use crate::registry::ConnectionRegistry;
use crate::resequencer::Resequencer;
use crate::telemetry;

/// Accepts byte streams and runs the WebSocket protocol over them.
///
/// # Example
///
/// ```no_run
/// use tokio::net::TcpListener;
/// use wirebridge_ws::{Endpoint, WsConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let endpoint = Endpoint::new(WsConfig::default())?;
/// let pinger = endpoint.idle_pinger().spawn();
/// let listener = TcpListener::bind("127.0.0.1:9001").await?;
///
/// loop {
///     let (stream, _) = listener.accept().await?;
///     let mut accepted = endpoint.accept(stream)?;
///     tokio::spawn(async move {
///         while let Some(message) = accepted.recv().await {
///             if let Some(text) = message.text() {
///                 let _ = accepted.handle.send(&wirebridge_codec::Frame::text(text)).await;
///             }
///         }
///     });
/// #   break;
/// }
/// # pinger.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Endpoint {
    config: Arc<WsConfig>,
    registry: Arc<ConnectionRegistry>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// A connection that has been accepted and is running.
#[derive(Debug)]
pub struct Accepted {
    /// Write handle for the connection.
    pub handle: ConnectionHandle,
    /// Application data frames, in arrival order.
    pub inbound: mpsc::Receiver<InboundMessage>,
    /// The dispatcher task; finishes after teardown.
    pub task: JoinHandle<()>,
}

impl Accepted {
    /// The connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Receive the next application message. `None` after teardown.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.inbound.recv().await
    }
}

impl Endpoint {
    /// Create an endpoint from a validated configuration.
    pub fn new(config: WsConfig) -> WsResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        Ok(Self {
            config: Arc::new(config),
            registry,
            events,
        })
    }

    /// The endpoint configuration.
    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// The registry of live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// An idle pinger over this endpoint's registry using the configured interval.
    pub fn idle_pinger(&self) -> IdlePinger {
        IdlePinger::new(self.registry.clone(), self.config.ping_interval_duration())
    }

    /// Close every connection with 1001 and refuse new ones.
    pub async fn shutdown(&self) -> usize {
        self.registry.shutdown().await
    }

    /// Start running the protocol over `stream`.
    ///
    /// Must be called from within a Tokio runtime. Fails if the registry
    /// refuses the connection.
    #[instrument(skip_all)]
    pub fn accept<S>(&self, stream: S) -> WsResult<Accepted>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = ConnectionId::new();
        let role = self.config.role;
        let flags = Arc::new(SessionFlags::new());
        let (read_half, write_half) = tokio::io::split(stream);

        let handle = ConnectionHandle::new(
            id,
            Box::new(write_half),
            FrameEncoder::new(role),
            flags.clone(),
        );
        self.registry.register(handle.clone())?;

        let decoder = FrameDecoder::with_flags(role, self.config.decoder_config(), flags);
        let reader = FrameReader::new(read_half, decoder);
        let (frames_tx, frames_rx) = mpsc::channel(self.config.inbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity);

        tokio::spawn(read_loop(reader, handle.clone(), frames_tx));

        let dispatcher = Dispatcher {
            handle: handle.clone(),
            interceptor: Interceptor::new(id, role, self.config.expect_handshake),
            resequencer: Resequencer::new(0, self.config.max_pending_frames),
            inbound: inbound_tx,
            events: self.events.clone(),
            registry: self.registry.clone(),
            close_timeout: self.config.close_timeout_duration(),
            close_status: None,
            closed_published: false,
        };
        let task = tokio::spawn(dispatcher.run(frames_rx));

        info!(connection_id = %id, ?role, "Connection accepted");
        Ok(Accepted {
            handle,
            inbound: inbound_rx,
            task,
        })
    }
}

/// What the reader hands to the dispatcher.
#[derive(Debug)]
enum ReadEvent {
    Frame(u64, Frame),
    Failed(DecodeError),
}

async fn read_loop<R>(
    mut reader: FrameReader<R>,
    handle: ConnectionHandle,
    tx: mpsc::Sender<ReadEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut seq = 0u64;
    loop {
        let event = tokio::select! {
            () = handle.closed() => break,
            result = reader.read_frame() => match result {
                Ok(frame) => {
                    let event = ReadEvent::Frame(seq, frame);
                    seq += 1;
                    event
                }
                Err(e) => ReadEvent::Failed(e),
            },
        };
        let failed = matches!(event, ReadEvent::Failed(_));
        if tx.send(event).await.is_err() || failed {
            break;
        }
    }
    trace!(connection_id = %handle.id(), frames = seq, "Reader finished");
}

struct Dispatcher {
    handle: ConnectionHandle,
    interceptor: Interceptor,
    resequencer: Resequencer<Frame>,
    inbound: mpsc::Sender<InboundMessage>,
    events: broadcast::Sender<ConnectionEvent>,
    registry: Arc<ConnectionRegistry>,
    close_timeout: Duration,
    close_status: Option<u16>,
    closed_published: bool,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::Receiver<ReadEvent>) {
        let mut deadline: Option<Instant> = None;

        loop {
            if deadline.is_none() && self.handle.flags().close_initiated() {
                deadline = Some(Instant::now() + self.close_timeout);
                self.interceptor.mark_closing();
            }

            let close_wait = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let event = tokio::select! {
                event = rx.recv() => event,
                () = close_wait => {
                    debug!(connection_id = %self.handle.id(), "Close handshake timed out");
                    break;
                }
                () = self.handle.closing(), if deadline.is_none() => continue,
                () = self.handle.closed() => break,
            };

            let Some(event) = event else {
                break;
            };
            if !self.process(event).await {
                break;
            }
        }

        self.teardown().await;
    }

    /// Returns false once the connection should be torn down.
    async fn process(&mut self, event: ReadEvent) -> bool {
        match event {
            ReadEvent::Failed(err) => {
                self.on_read_error(err).await;
                false
            }
            ReadEvent::Frame(seq, frame) => {
                let ready = match self.resequencer.offer(seq, frame) {
                    Ok(ready) => ready,
                    Err(e) => {
                        warn!(connection_id = %self.handle.id(), error = %e, "Resequencing failed");
                        let code = CloseCode::InternalError;
                        let status = e.close_code().unwrap_or(code.as_u16());
                        self.close_with(status, code.reason()).await;
                        return false;
                    }
                };
                for frame in ready {
                    if !self.dispatch(frame).await {
                        return false;
                    }
                }
                true
            }
        }
    }

    #[instrument(skip_all, fields(connection_id = %self.handle.id(), kind = ?frame.kind()))]
    async fn dispatch(&mut self, frame: Frame) -> bool {
        telemetry::record_frame_received(frame.kind());
        let reaction = self.interceptor.on_frame(frame, self.handle.flags());

        if let Some(status) = reaction.violation {
            telemetry::record_protocol_violation(status);
            self.close_status.get_or_insert(status);
        }

        for reply in &reaction.replies {
            if let Err(e) = self.handle.send(reply).await {
                warn!(error = %e, "Failed to write reply");
                return false;
            }
        }

        for event in reaction.events {
            self.publish(event);
        }

        if let Some(frame) = reaction.deliver {
            let message = InboundMessage {
                connection_id: self.handle.id(),
                path: self.interceptor.path().map(str::to_string),
                query_string: self.interceptor.query_string().map(str::to_string),
                frame,
            };
            if self.inbound.send(message).await.is_err() {
                debug!("Inbound receiver dropped, discarding message");
            }
        }

        !reaction.close
    }

    async fn on_read_error(&mut self, err: DecodeError) {
        let id = self.handle.id();
        if let DecodeError::Protocol(ProtocolViolation::HeaderTooLong(limit)) = &err {
            if self.interceptor.phase() == Phase::AwaitingHandshake {
                self.reject_upgrade(HandshakeError::HeaderTooLong(*limit)).await;
                return;
            }
        }
        match err.close_code() {
            Some(code) => {
                let status = code.as_u16();
                warn!(connection_id = %id, error = %err, status, "Protocol error");
                telemetry::record_protocol_violation(status);
                self.close_with(status, code.reason()).await;
            }
            None if err.is_soft_end() => debug!(connection_id = %id, "Peer closed the stream"),
            None => match err {
                DecodeError::ClosedMidFrame => {
                    debug!(connection_id = %id, error = %err, "Stream ended inside a frame");
                }
                other => warn!(connection_id = %id, error = %other, "Read failed"),
            },
        }
    }

    /// Answer a broken upgrade request over HTTP instead of a Close frame.
    async fn reject_upgrade(&mut self, err: HandshakeError) {
        let id = self.handle.id();
        warn!(connection_id = %id, error = %err, "Upgrade request rejected");
        self.handle.flags().set_close_initiated();
        if self.interceptor.role() != Role::Server {
            return;
        }
        if let Err(e) = self.handle.send(&Frame::raw_http(err.to_response())).await {
            debug!(connection_id = %id, error = %e, "HTTP error response not sent");
        }
    }

    async fn close_with(&mut self, status: u16, reason: &str) {
        self.close_status.get_or_insert(status);
        if let Err(e) = self.handle.send_close(status, reason).await {
            debug!(connection_id = %self.handle.id(), error = %e, "Close frame not sent");
        }
    }

    fn publish(&mut self, event: ConnectionEvent) {
        if event.is_closed() {
            if self.closed_published {
                return;
            }
            self.closed_published = true;
        }
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn teardown(mut self) {
        let id = self.handle.id();
        self.interceptor.mark_closed();
        self.handle.close().await;
        self.registry.remove(&id);
        self.publish(ConnectionEvent::closed(id, self.close_status));
        info!(
            connection_id = %id,
            status = ?self.close_status,
            "Connection torn down"
        );
    }
}
