//! Opening handshake.
//!
//! The server side of RFC 6455 section 4.2: parse the client's upgrade
//! request from a [`FrameKind::Headers`] frame and answer it with a
//! `101` response carrying `Sec-WebSocket-Accept`.

use base64::Engine;
use http::header::{HeaderMap, HeaderName, HeaderValue, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION};
use sha1::{Digest, Sha1};
use tracing::{debug, trace};

use crate::error::HandshakeError;
use crate::frame::{Frame, FrameKind};

/// The WebSocket magic GUID used in the handshake.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this codec speaks.
pub const SUPPORTED_VERSION: &str = "13";

/// Name reported in the handshake greeting line.
pub const SERVER_NAME: &str = "Wirebridge";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let result = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(result)
}

/// A parsed HTTP upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    method: String,
    path: String,
    query_string: Option<String>,
    headers: HeaderMap,
}

impl UpgradeRequest {
    /// Parse the text of an HTTP request header block.
    pub fn parse(text: &str) -> Result<Self, HandshakeError> {
        let mut lines = text.split("\r\n").filter(|line| !line.is_empty());
        let request_line = lines
            .next()
            .ok_or_else(|| HandshakeError::MalformedRequest(String::new()))?;

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            return Err(HandshakeError::MalformedRequest(request_line.to_string()));
        };
        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };

        let mut headers = HeaderMap::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                trace!(line, "Ignoring header line without a colon");
                continue;
            };
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(line, "Ignoring malformed header"),
            }
        }

        Ok(Self {
            method: method.to_string(),
            path,
            query_string,
            headers,
        })
    }

    /// Request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string, `None` when the target had no `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Request headers (names are case-insensitive).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A successful handshake: the parsed request and the response to send.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The client's upgrade request.
    pub request: UpgradeRequest,
    /// The `101` response, written verbatim by the encoder.
    pub response: Frame,
}

/// Answer the upgrade request carried by a header block frame.
pub fn generate_handshake(frame: &Frame) -> Result<Handshake, HandshakeError> {
    if frame.kind() != FrameKind::Headers {
        return Err(HandshakeError::NotHeaders(frame.kind()));
    }
    let request = UpgradeRequest::parse(frame.payload().unwrap_or_default())?;

    let key = request
        .header_str(&SEC_WEBSOCKET_KEY)
        .ok_or(HandshakeError::MissingKey)?;
    let version = request.header_str(&SEC_WEBSOCKET_VERSION);
    if version != Some(SUPPORTED_VERSION) {
        return Err(HandshakeError::UnsupportedVersion(version.map(str::to_string)));
    }

    let accept = compute_accept_key(key);
    debug!(path = request.path(), "Handshake accepted");
    let response = Frame::raw_http(format!(
        "HTTP/1.1 101 Web Socket Protocol Handshake - {SERVER_NAME}\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    ));
    Ok(Handshake { request, response })
}
