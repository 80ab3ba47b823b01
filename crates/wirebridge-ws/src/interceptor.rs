//! Per-connection protocol state machine.
//!
//! The [`Interceptor`] sits between the decoder and the application. It
//! answers control frames, performs the opening handshake, and decides when a
//! connection must close. It never touches the socket: every decision comes
//! back as a [`Reaction`] that the endpoint applies.
//!
//! Frames are classified in a fixed priority order:
//!
//! 1. any RSV bit set is a protocol violation
//! 2. a Close frame is echoed (unless this side already started closing or the frame is malformed) and ends the connection
//! 3. anything arriving while closing is dropped
//! 4. invalid and invalid-UTF-8 frames are protocol violations
//! 5. fragmented control frames are protocol violations
//! 6. a Ping is answered with a Pong carrying the same bytes
//! 7. a Pong is a liveness acknowledgement
//! 8. before the handshake, the frame is the upgrade request
//! 9. otherwise the frame goes to the application

use tracing::{debug, info, trace, warn};
use wirebridge_codec::{
    generate_handshake, CloseCode, Frame, FrameKind, Handshake, Role, SessionFlags,
    DEFAULT_CLOSE_STATUS,
};

use crate::connection::ConnectionId;
use crate::event::ConnectionEvent;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the HTTP upgrade exchange.
    AwaitingHandshake,
    /// Exchanging frames.
    Open,
    /// A Close frame was sent; waiting for the peer's.
    Closing,
    /// Finished.
    Closed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingHandshake => write!(f, "awaiting-handshake"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// What the endpoint should do in response to one frame.
#[derive(Debug, Default)]
pub struct Reaction {
    /// Frames to write back, in order.
    pub replies: Vec<Frame>,
    /// A data frame for the application.
    pub deliver: Option<Frame>,
    /// Events to publish.
    pub events: Vec<ConnectionEvent>,
    /// Tear the connection down once the replies are written.
    pub close: bool,
    /// Status of the Close frame sent for a protocol violation.
    pub violation: Option<u16>,
}

impl Reaction {
    /// Nothing to do.
    pub fn none() -> Self {
        Self::default()
    }

    fn reply(frame: Frame) -> Self {
        Self {
            replies: vec![frame],
            ..Self::default()
        }
    }

    fn deliver(frame: Frame) -> Self {
        Self {
            deliver: Some(frame),
            ..Self::default()
        }
    }

    /// Whether applying this reaction has no effect.
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.deliver.is_none() && self.events.is_empty() && !self.close
    }
}

/// Protocol state machine for one connection.
#[derive(Debug)]
pub struct Interceptor {
    connection_id: ConnectionId,
    role: Role,
    phase: Phase,
    shook: bool,
    path: Option<String>,
    query_string: Option<String>,
}

impl Interceptor {
    /// Create the state machine for a new connection.
    ///
    /// With `expect_handshake` off the connection starts [`Phase::Open`].
    pub fn new(connection_id: ConnectionId, role: Role, expect_handshake: bool) -> Self {
        Self {
            connection_id,
            role,
            phase: if expect_handshake {
                Phase::AwaitingHandshake
            } else {
                Phase::Open
            },
            shook: !expect_handshake,
            path: None,
            query_string: None,
        }
    }

    /// The connection this interceptor belongs to.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Which side of the connection this interceptor speaks for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the opening handshake has completed.
    pub fn is_shook(&self) -> bool {
        self.shook
    }

    /// Path of the upgrade request.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Query string of the upgrade request.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Record that the close handshake was started outside the interceptor.
    pub fn mark_closing(&mut self) {
        if self.phase != Phase::Closed {
            self.phase = Phase::Closing;
        }
    }

    /// Record that the connection is gone.
    pub fn mark_closed(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Classify one decoded frame and decide what to do with it.
    pub fn on_frame(&mut self, frame: Frame, flags: &SessionFlags) -> Reaction {
        if self.phase == Phase::Closed {
            trace!(connection_id = %self.connection_id, kind = ?frame.kind(), "Frame after close");
            return Reaction::none();
        }

        if frame.rsv() != 0 {
            return self.violation(CloseCode::Protocol, flags);
        }

        if frame.kind() == FrameKind::Close {
            return self.on_close(&frame, flags);
        }

        if flags.close_initiated() || self.phase == Phase::Closing {
            debug!(
                connection_id = %self.connection_id,
                kind = ?frame.kind(),
                "Dropping frame while closing"
            );
            self.phase = Phase::Closing;
            return Reaction::none();
        }

        match frame.kind() {
            FrameKind::Invalid | FrameKind::FragmentedControl => {
                debug!(
                    connection_id = %self.connection_id,
                    reason = frame.payload().unwrap_or_default(),
                    "Invalid frame"
                );
                self.violation(CloseCode::Protocol, flags)
            }
            FrameKind::InvalidUtf8 => {
                self.violation(CloseCode::InvalidPayload, flags)
            }
            FrameKind::Ping => self.on_ping(&frame, flags),
            FrameKind::Pong => {
                flags.set_expecting_pong(false);
                Reaction::none()
            }
            _ if !self.shook => self.on_handshake(&frame, flags),
            FrameKind::Text | FrameKind::Binary => Reaction::deliver(frame),
            other => {
                debug!(connection_id = %self.connection_id, kind = ?other, "Ignoring frame");
                Reaction::none()
            }
        }
    }

    fn on_close(&mut self, frame: &Frame, flags: &SessionFlags) -> Reaction {
        let status = frame.status();
        let mut reaction = Reaction::none();

        if flags.close_initiated() {
            debug!(connection_id = %self.connection_id, ?status, "Close acknowledged");
        } else if !frame.is_acceptable() {
            flags.set_close_initiated();
            debug!(connection_id = %self.connection_id, ?status, "Unacceptable close, not echoing");
        } else {
            flags.set_close_initiated();
            let echo = status.unwrap_or(DEFAULT_CLOSE_STATUS);
            debug!(connection_id = %self.connection_id, status = echo, "Echoing close");
            reaction
                .replies
                .push(Frame::close(Some(echo), frame.payload().unwrap_or_default()));
        }

        self.phase = Phase::Closed;
        reaction
            .events
            .push(ConnectionEvent::closed(self.connection_id, status));
        reaction.close = true;
        reaction
    }

    fn on_ping(&mut self, frame: &Frame, flags: &SessionFlags) -> Reaction {
        let data = frame.content_bytes();
        if data.len() > MAX_CONTROL_PAYLOAD {
            debug!(connection_id = %self.connection_id, len = data.len(), "Oversized ping");
            return self.violation(CloseCode::Protocol, flags);
        }
        trace!(connection_id = %self.connection_id, len = data.len(), "Answering ping");
        Reaction::reply(Frame::pong(data))
    }

    fn on_handshake(&mut self, frame: &Frame, flags: &SessionFlags) -> Reaction {
        match self.role {
            Role::Server => self.answer_upgrade(frame, flags),
            Role::Client => self.check_upgrade_response(frame, flags),
        }
    }

    fn answer_upgrade(&mut self, frame: &Frame, flags: &SessionFlags) -> Reaction {
        match generate_handshake(frame) {
            Ok(Handshake { request, response }) => {
                let path = request.path().to_string();
                let query_string = request.query_string().map(str::to_string);
                info!(
                    connection_id = %self.connection_id,
                    path = %path,
                    query = query_string.as_deref().unwrap_or_default(),
                    "Handshake complete"
                );
                self.shook = true;
                self.phase = Phase::Open;
                self.path = Some(path.clone());
                self.query_string.clone_from(&query_string);

                let mut reaction = Reaction::reply(response);
                reaction.events.push(ConnectionEvent::handshake_complete(
                    self.connection_id,
                    path,
                    query_string,
                ));
                reaction
            }
            Err(e) => {
                warn!(connection_id = %self.connection_id, error = %e, "Handshake failed");
                flags.set_close_initiated();
                self.phase = Phase::Closed;
                let mut reaction = Reaction::reply(Frame::raw_http(e.to_response()));
                reaction.close = true;
                reaction
            }
        }
    }

    fn check_upgrade_response(&mut self, frame: &Frame, flags: &SessionFlags) -> Reaction {
        let status_line = frame
            .payload()
            .and_then(|text| text.lines().next())
            .unwrap_or_default();
        let switching = frame.kind() == FrameKind::Headers
            && status_line.split_whitespace().nth(1) == Some("101");

        if switching {
            info!(connection_id = %self.connection_id, "Upgrade accepted by server");
            self.shook = true;
            self.phase = Phase::Open;
            let mut reaction = Reaction::none();
            reaction.events.push(ConnectionEvent::handshake_complete(
                self.connection_id,
                String::new(),
                None,
            ));
            reaction
        } else {
            warn!(connection_id = %self.connection_id, status_line, "Upgrade refused by server");
            flags.set_close_initiated();
            self.phase = Phase::Closed;
            Reaction {
                close: true,
                ..Reaction::default()
            }
        }
    }

    fn violation(&mut self, code: CloseCode, flags: &SessionFlags) -> Reaction {
        let (status, reason) = (code.as_u16(), code.reason());
        self.phase = Phase::Closing;
        if flags.close_initiated() {
            debug!(connection_id = %self.connection_id, status, "Violation while closing");
            return Reaction::none();
        }
        warn!(connection_id = %self.connection_id, status, reason, "Protocol violation");
        flags.set_close_initiated();
        let mut reaction = Reaction::reply(Frame::close(Some(status), reason));
        reaction.violation = Some(status);
        reaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConnectionEventKind;

    const UPGRADE: &str = "GET /chat?room=1 HTTP/1.1\r\n\
                           Host: server.example.com\r\n\
                           Upgrade: websocket\r\n\
                           Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                           Sec-WebSocket-Version: 13\r\n";

    fn open() -> (Interceptor, SessionFlags) {
        (
            Interceptor::new(ConnectionId::new(), Role::Server, false),
            SessionFlags::new(),
        )
    }

    fn assert_violation(reaction: &Reaction, status: u16) {
        assert_eq!(reaction.replies.len(), 1);
        assert_eq!(reaction.replies[0].kind(), FrameKind::Close);
        assert_eq!(reaction.replies[0].status(), Some(status));
        assert_eq!(reaction.violation, Some(status));
        assert!(reaction.deliver.is_none());
    }

    #[test]
    fn test_ping_answered_with_same_payload() {
        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::ping(&b"abc"[..]), &flags);

        assert_eq!(reaction.replies.len(), 1);
        let pong = &reaction.replies[0];
        assert_eq!(pong.kind(), FrameKind::Pong);
        assert_eq!(pong.content_bytes().as_ref(), b"abc");
        assert!(reaction.deliver.is_none());
        assert!(reaction.events.is_empty());
        assert!(!reaction.close);
        assert!(!flags.close_initiated());
        assert_eq!(interceptor.phase(), Phase::Open);
    }

    #[test]
    fn test_oversized_ping_is_violation() {
        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::ping(vec![0u8; 126]), &flags);

        assert_violation(&reaction, 1002);
        assert!(flags.close_initiated());
        assert_eq!(interceptor.phase(), Phase::Closing);
    }

    #[test]
    fn test_rsv_bits_are_violation() {
        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::text("x").with_rsv(0b100), &flags);
        assert_violation(&reaction, 1002);
    }

    #[test]
    fn test_invalid_frames() {
        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::invalid("Reserved opcode 3", &b""[..]), &flags);
        assert_violation(&reaction, 1002);

        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::invalid_utf8(&b"\xff"[..]), &flags);
        assert_violation(&reaction, 1007);
        assert_eq!(reaction.replies[0].payload(), Some("Invalid UTF-8"));

        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::fragmented_control(&b""[..]), &flags);
        assert_violation(&reaction, 1002);
    }

    #[test]
    fn test_close_is_echoed() {
        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::close(Some(1001), "bye"), &flags);

        assert_eq!(reaction.replies.len(), 1);
        assert_eq!(reaction.replies[0].status(), Some(1001));
        assert_eq!(reaction.replies[0].payload(), Some("bye"));
        assert!(reaction.close);
        assert_eq!(reaction.events.len(), 1);
        assert_eq!(
            reaction.events[0].kind,
            ConnectionEventKind::Closed { status: Some(1001) }
        );
        assert!(flags.close_initiated());
        assert_eq!(interceptor.phase(), Phase::Closed);
    }

    #[test]
    fn test_close_without_status_echoes_default() {
        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::close(None, ""), &flags);
        assert_eq!(reaction.replies[0].status(), Some(DEFAULT_CLOSE_STATUS));
    }

    #[test]
    fn test_unacceptable_close_is_not_echoed() {
        let (mut interceptor, flags) = open();
        let ping = interceptor.on_frame(Frame::ping(&b"abc"[..]), &flags);
        assert_eq!(ping.replies[0].kind(), FrameKind::Pong);
        let text = interceptor.on_frame(Frame::text("before"), &flags);
        assert!(text.deliver.is_some());

        let close = Frame::close(Some(1005), "").with_acceptable(false);
        let reaction = interceptor.on_frame(close, &flags);
        assert!(reaction.replies.is_empty());
        assert!(reaction.close);
        assert!(flags.close_initiated());
        assert_eq!(
            reaction.events[0].kind,
            ConnectionEventKind::Closed { status: Some(1005) }
        );
    }

    #[test]
    fn test_close_reply_not_echoed() {
        let (mut interceptor, flags) = open();
        interceptor.on_frame(Frame::ping(vec![0u8; 200]), &flags);

        let reaction = interceptor.on_frame(Frame::close(Some(1002), ""), &flags);
        assert!(reaction.replies.is_empty());
        assert!(reaction.close);
    }

    #[test]
    fn test_frames_dropped_while_closing() {
        let (mut interceptor, flags) = open();
        flags.set_close_initiated();

        assert!(interceptor.on_frame(Frame::text("late"), &flags).is_empty());
        assert!(interceptor.on_frame(Frame::ping(&b"p"[..]), &flags).is_empty());
        assert_eq!(interceptor.phase(), Phase::Closing);
    }

    #[test]
    fn test_pong_clears_expecting() {
        let (mut interceptor, flags) = open();
        flags.set_expecting_pong(true);
        let reaction = interceptor.on_frame(Frame::pong_text(""), &flags);
        assert!(reaction.is_empty());
        assert!(!flags.expecting_pong());
    }

    #[test]
    fn test_data_delivered_when_open() {
        let (mut interceptor, flags) = open();
        let reaction = interceptor.on_frame(Frame::text("hello"), &flags);
        assert_eq!(reaction.deliver.unwrap().payload(), Some("hello"));
        assert!(reaction.replies.is_empty());
    }

    #[test]
    fn test_handshake_then_data() {
        let id = ConnectionId::new();
        let mut interceptor = Interceptor::new(id, Role::Server, true);
        let flags = SessionFlags::new();
        assert_eq!(interceptor.phase(), Phase::AwaitingHandshake);

        let reaction = interceptor.on_frame(Frame::headers(UPGRADE), &flags);
        assert_eq!(reaction.replies.len(), 1);
        assert!(reaction.replies[0].is_raw_http());
        assert!(reaction.replies[0]
            .payload()
            .unwrap()
            .contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert_eq!(
            reaction.events,
            vec![ConnectionEvent::handshake_complete(
                id,
                "/chat",
                Some("room=1".to_string())
            )]
        );
        assert!(interceptor.is_shook());
        assert_eq!(interceptor.path(), Some("/chat"));
        assert_eq!(interceptor.query_string(), Some("room=1"));

        let reaction = interceptor.on_frame(Frame::binary(&b"\x01"[..]), &flags);
        assert!(reaction.deliver.is_some());
    }

    #[test]
    fn test_handshake_failure_answers_http_error() {
        let mut interceptor = Interceptor::new(ConnectionId::new(), Role::Server, true);
        let flags = SessionFlags::new();
        let reaction = interceptor.on_frame(Frame::headers("GET / HTTP/1.1\r\nHost: x\r\n"), &flags);

        assert!(reaction.close);
        assert_eq!(reaction.replies.len(), 1);
        let response = reaction.replies[0].payload().unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(!interceptor.is_shook());
        assert_eq!(interceptor.phase(), Phase::Closed);
    }

    #[test]
    fn test_control_frames_before_handshake() {
        let mut interceptor = Interceptor::new(ConnectionId::new(), Role::Server, true);
        let flags = SessionFlags::new();
        let reaction = interceptor.on_frame(Frame::ping(&b"early"[..]), &flags);
        assert_eq!(reaction.replies[0].kind(), FrameKind::Pong);
        assert!(!interceptor.is_shook());
    }

    #[test]
    fn test_client_accepts_switching_protocols() {
        let mut interceptor = Interceptor::new(ConnectionId::new(), Role::Client, true);
        let flags = SessionFlags::new();
        let reaction = interceptor.on_frame(
            Frame::headers("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n"),
            &flags,
        );
        assert!(reaction.replies.is_empty());
        assert_eq!(reaction.events.len(), 1);
        assert_eq!(interceptor.phase(), Phase::Open);
    }

    #[test]
    fn test_client_rejects_other_status() {
        let mut interceptor = Interceptor::new(ConnectionId::new(), Role::Client, true);
        let flags = SessionFlags::new();
        let reaction =
            interceptor.on_frame(Frame::headers("HTTP/1.1 403 Forbidden\r\n"), &flags);
        assert!(reaction.close);
        assert!(flags.close_initiated());
    }

    #[test]
    fn test_closed_interceptor_ignores_everything() {
        let (mut interceptor, flags) = open();
        interceptor.mark_closed();
        assert!(interceptor.on_frame(Frame::close(Some(1000), ""), &flags).is_empty());
    }
}
