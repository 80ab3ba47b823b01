//! End-to-end connection behaviour over in-memory streams.
//!
//! Each test plays the client side by hand with the codec and drives a real
//! endpoint on the other end of a `tokio::io::duplex` pipe.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::time::timeout;
use wirebridge_codec::{
    DecodeError, DecoderConfig, Frame, FrameDecoder, FrameEncoder, FrameKind, FrameReader, Role,
};
use wirebridge_ws::{
    Accepted, ConnectionEvent, ConnectionEventKind, Endpoint, WsConfig, WsError,
};

const WAIT: Duration = Duration::from_secs(5);

const UPGRADE: &str = "GET /chat?room=1 HTTP/1.1\r\n\
                       Host: localhost\r\n\
                       Upgrade: websocket\r\n\
                       Connection: Upgrade\r\n\
                       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                       Sec-WebSocket-Version: 13\r\n\
                       \r\n";

struct Peer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    encoder: FrameEncoder,
}

impl Peer {
    fn new(stream: DuplexStream, expect_headers: bool) -> Self {
        let (read_half, writer) = split(stream);
        let decoder = FrameDecoder::new(
            Role::Client,
            DecoderConfig::new().expect_headers(expect_headers),
        );
        Self {
            reader: FrameReader::new(read_half, decoder),
            writer,
            encoder: FrameEncoder::new(Role::Client),
        }
    }

    async fn send(&mut self, frame: &Frame) {
        let mut wire = BytesMut::new();
        self.encoder.encode(frame, &mut wire).unwrap();
        self.send_raw(&wire).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn recv(&mut self) -> Frame {
        timeout(WAIT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .expect("peer failed to decode")
    }

    async fn recv_end(&mut self) -> DecodeError {
        timeout(WAIT, self.reader.read_frame())
            .await
            .expect("timed out waiting for end of stream")
            .expect_err("expected the stream to end")
    }
}

fn frames_only() -> WsConfig {
    WsConfig::default().expect_handshake(false)
}

fn start(config: WsConfig, expect_headers: bool) -> (Endpoint, Accepted, Peer) {
    let endpoint = Endpoint::new(config).unwrap();
    let (server, client) = duplex(64 * 1024);
    let accepted = endpoint.accept(server).unwrap();
    (endpoint, accepted, Peer::new(client, expect_headers))
}

async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEventKind {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .unwrap()
        .kind
}

async fn finished(accepted: Accepted) {
    timeout(WAIT, accepted.task)
        .await
        .expect("connection was not torn down")
        .unwrap();
}

#[tokio::test]
async fn handshake_then_application_data() {
    let endpoint = Endpoint::new(WsConfig::default()).unwrap();
    let mut events = endpoint.subscribe();
    let (server, client) = duplex(64 * 1024);
    let mut accepted = endpoint.accept(server).unwrap();
    let mut peer = Peer::new(client, true);

    peer.send_raw(UPGRADE.as_bytes()).await;
    let response = peer.recv().await;
    assert_eq!(response.kind(), FrameKind::Headers);
    let text = response.payload().unwrap();
    assert!(text.starts_with("HTTP/1.1 101 Web Socket Protocol Handshake"));
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    assert_eq!(
        next_event(&mut events).await,
        ConnectionEventKind::HandshakeComplete {
            path: "/chat".to_string(),
            query_string: Some("room=1".to_string()),
        }
    );

    peer.send(&Frame::text("hello")).await;
    let message = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    assert_eq!(message.connection_id, accepted.id());
    assert_eq!(message.text(), Some("hello"));
    assert_eq!(message.path.as_deref(), Some("/chat"));
    assert_eq!(message.query_string.as_deref(), Some("room=1"));

    accepted.handle.send(&Frame::binary(vec![1u8, 2, 3])).await.unwrap();
    assert_eq!(peer.recv().await, Frame::binary(vec![1u8, 2, 3]));
}

#[tokio::test]
async fn failed_handshake_gets_http_error_and_closes() {
    let (endpoint, accepted, mut peer) = start(WsConfig::default(), true);

    peer.send_raw(b"GET /chat HTTP/1.1\r\nHost: localhost\r\nSec-WebSocket-Version: 13\r\n\r\n")
        .await;
    let response = peer.recv().await;
    assert!(response
        .payload()
        .unwrap()
        .starts_with("HTTP/1.1 400 Bad Request\r\n"));

    finished(accepted).await;
    assert!(endpoint.registry().is_empty());
}

#[tokio::test]
async fn ping_is_answered_with_identical_pong() {
    let (_endpoint, _accepted, mut peer) = start(frames_only(), false);

    peer.send(&Frame::ping(&b"abc"[..])).await;
    let pong = peer.recv().await;
    assert_eq!(pong.kind(), FrameKind::Pong);
    assert_eq!(pong.content_bytes().as_ref(), b"abc");
}

#[tokio::test]
async fn pongs_leave_in_ping_order() {
    let (_endpoint, _accepted, mut peer) = start(frames_only(), false);

    let mut wire = BytesMut::new();
    let encoder = FrameEncoder::new(Role::Client);
    for n in 0..20u8 {
        encoder.encode(&Frame::ping(vec![n]), &mut wire).unwrap();
    }
    peer.send_raw(&wire).await;

    for n in 0..20u8 {
        assert_eq!(peer.recv().await.content_bytes().as_ref(), &[n]);
    }
}

#[tokio::test]
async fn close_is_echoed_then_connection_torn_down() {
    let (endpoint, accepted, mut peer) = start(frames_only(), false);
    let mut events = endpoint.subscribe();

    peer.send(&Frame::close(Some(1001), "leaving")).await;
    let echo = peer.recv().await;
    assert_eq!(echo.kind(), FrameKind::Close);
    assert_eq!(echo.status(), Some(1001));
    assert_eq!(echo.payload(), Some("leaving"));
    assert!(peer.recv_end().await.is_soft_end());

    assert_eq!(
        next_event(&mut events).await,
        ConnectionEventKind::Closed { status: Some(1001) }
    );
    finished(accepted).await;
    assert!(endpoint.registry().is_empty());
    assert!(events.try_recv().is_err(), "closed event published twice");
}

#[tokio::test]
async fn unacceptable_close_status_is_not_echoed() {
    let (_endpoint, accepted, mut peer) = start(frames_only(), false);

    peer.send(&Frame::close(Some(1005), "")).await;
    assert!(peer.recv_end().await.is_soft_end());
    finished(accepted).await;
}

#[tokio::test]
async fn frames_ahead_of_unacceptable_close_are_still_handled() {
    let (_endpoint, mut accepted, mut peer) = start(frames_only(), false);

    let mut wire = BytesMut::new();
    let encoder = FrameEncoder::new(Role::Client);
    encoder.encode(&Frame::ping(&b"abc"[..]), &mut wire).unwrap();
    encoder.encode(&Frame::text("data-before-close"), &mut wire).unwrap();
    encoder.encode(&Frame::close(Some(1005), ""), &mut wire).unwrap();
    peer.send_raw(&wire).await;

    let pong = peer.recv().await;
    assert_eq!(pong.kind(), FrameKind::Pong);
    assert_eq!(pong.content_bytes().as_ref(), b"abc");

    let message = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    assert_eq!(message.text(), Some("data-before-close"));

    assert!(peer.recv_end().await.is_soft_end());
    assert!(timeout(WAIT, accepted.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_header_line_gets_http_431() {
    let config = WsConfig::default().max_header_line(32);
    let (endpoint, accepted, mut peer) = start(config, true);

    let request = format!("GET /chat HTTP/1.1\r\nX-Padding: {}\r\n", "a".repeat(100));
    peer.send_raw(request.as_bytes()).await;

    let response = peer.recv().await;
    assert_eq!(response.kind(), FrameKind::Headers);
    assert!(response
        .payload()
        .unwrap()
        .starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));

    finished(accepted).await;
    assert!(endpoint.registry().is_empty());
}

#[tokio::test]
async fn unmasked_client_frame_closes_with_protocol_error() {
    let (endpoint, accepted, mut peer) = start(frames_only(), false);
    let mut events = endpoint.subscribe();

    let mut wire = BytesMut::new();
    FrameEncoder::new(Role::Server)
        .encode(&Frame::text("not masked"), &mut wire)
        .unwrap();
    peer.send_raw(&wire).await;

    let close = peer.recv().await;
    assert_eq!(close.status(), Some(1002));
    finished(accepted).await;
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEventKind::Closed { status: Some(1002) }
    );
}

#[tokio::test]
async fn oversized_ping_then_peer_close_is_not_echoed() {
    let (_endpoint, accepted, mut peer) = start(frames_only(), false);

    peer.send(&Frame::ping(vec![7u8; 126])).await;
    let close = peer.recv().await;
    assert_eq!(close.kind(), FrameKind::Close);
    assert_eq!(close.status(), Some(1002));
    assert!(accepted.handle.flags().close_initiated());

    peer.send(&Frame::close(Some(1002), "")).await;
    assert!(peer.recv_end().await.is_soft_end());
    finished(accepted).await;
}

#[tokio::test]
async fn invalid_utf8_closes_with_1007() {
    let config = frames_only().validate_utf8(true);
    let (_endpoint, _accepted, mut peer) = start(config, false);

    let mut wire = BytesMut::new();
    // FIN + text, masked, 2 bytes, zero mask key
    wire.extend_from_slice(&[0x81, 0x82, 0, 0, 0, 0, 0xC3, 0x28]);
    peer.send_raw(&wire).await;

    assert_eq!(peer.recv().await.status(), Some(1007));
}

#[tokio::test(start_paused = true)]
async fn unanswered_close_times_out() {
    let config = frames_only().close_timeout(Duration::from_millis(200));
    let (endpoint, accepted, mut peer) = start(config, false);

    peer.send(&Frame::ping(vec![0u8; 200])).await;
    assert_eq!(peer.recv().await.status(), Some(1002));

    finished(accepted).await;
    assert!(endpoint.registry().is_empty());
}

#[tokio::test]
async fn peer_hangup_is_a_soft_end() {
    let (endpoint, accepted, peer) = start(frames_only(), false);
    let mut events = endpoint.subscribe();

    drop(peer);
    finished(accepted).await;
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEventKind::Closed { status: None }
    );
    assert!(endpoint.registry().is_empty());
}

#[tokio::test]
async fn registry_close_runs_close_handshake() {
    let (endpoint, accepted, mut peer) = start(frames_only(), false);
    let id = accepted.id();

    endpoint.registry().close(&id).await.unwrap();
    let close = peer.recv().await;
    assert_eq!(close.status(), Some(1000));

    peer.send(&Frame::close(Some(1000), "")).await;
    assert!(peer.recv_end().await.is_soft_end());
    finished(accepted).await;
    assert!(!endpoint.registry().contains(&id));
}

#[tokio::test]
async fn shutdown_sends_going_away() {
    let (endpoint, accepted, mut peer) = start(frames_only(), false);

    assert_eq!(endpoint.shutdown().await, 1);
    assert_eq!(peer.recv().await.status(), Some(1001));
    finished(accepted).await;

    let (server, _client) = duplex(1024);
    assert!(matches!(
        endpoint.accept(server),
        Err(WsError::ConnectionLimitReached(_))
    ));
}

#[tokio::test]
async fn connection_limit_is_enforced() {
    let endpoint = Endpoint::new(frames_only().max_connections(1)).unwrap();
    let (first, _c1) = duplex(1024);
    let (second, _c2) = duplex(1024);

    let _accepted = endpoint.accept(first).unwrap();
    let err = endpoint.accept(second).unwrap_err();
    assert!(matches!(err, WsError::ConnectionLimitReached(_)));
    assert_eq!(endpoint.registry().stats().total_rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn idle_connections_are_pinged() {
    let config = frames_only().ping_interval(Duration::from_secs(1));
    let (endpoint, accepted, mut peer) = start(config, false);
    let pinger = endpoint.idle_pinger().spawn();

    let ping = peer.recv().await;
    assert_eq!(ping.kind(), FrameKind::Ping);
    assert!(accepted.handle.flags().expecting_pong());

    peer.send(&Frame::pong(ping.content_bytes())).await;
    timeout(WAIT, async {
        while accepted.handle.flags().expecting_pong() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    pinger.stop().await;
}

#[test]
fn invalid_config_is_rejected() {
    let err = Endpoint::new(WsConfig::default().max_pending_frames(0)).unwrap_err();
    assert!(matches!(err, WsError::Config(_)));
}
