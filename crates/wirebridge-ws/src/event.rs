//! Events and messages a connection hands to the application.

use wirebridge_codec::Frame;

use crate::connection::ConnectionId;

/// A lifecycle event published on the endpoint's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// The connection the event concerns.
    pub connection_id: ConnectionId,
    /// What happened.
    pub kind: ConnectionEventKind,
}

impl ConnectionEvent {
    /// A completed opening handshake.
    pub fn handshake_complete(
        connection_id: ConnectionId,
        path: impl Into<String>,
        query_string: Option<String>,
    ) -> Self {
        Self {
            connection_id,
            kind: ConnectionEventKind::HandshakeComplete {
                path: path.into(),
                query_string,
            },
        }
    }

    /// A connection that has been torn down.
    pub fn closed(connection_id: ConnectionId, status: Option<u16>) -> Self {
        Self {
            connection_id,
            kind: ConnectionEventKind::Closed { status },
        }
    }

    /// Whether this is a [`ConnectionEventKind::Closed`] event.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ConnectionEventKind::Closed { .. })
    }
}

/// Kinds of [`ConnectionEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// The upgrade request was answered with `101`.
    HandshakeComplete {
        /// Request path without the query.
        path: String,
        /// Text after the first `?`, if the target had one.
        query_string: Option<String>,
    },
    /// The connection closed.
    Closed {
        /// Close status exchanged, if any.
        status: Option<u16>,
    },
}

/// An application data frame received on a connection.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The connection the frame arrived on.
    pub connection_id: ConnectionId,
    /// Path from the upgrade request, if there was one.
    pub path: Option<String>,
    /// Query string from the upgrade request.
    pub query_string: Option<String>,
    /// The decoded frame (text or binary).
    pub frame: Frame,
}

impl InboundMessage {
    /// Text payload, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        self.frame.payload()
    }
}
