//! Wire-level properties of the codec: encoder output fed back through the
//! decoder in the opposite role.

use bytes::BytesMut;
use proptest::prelude::*;
use wirebridge_codec::{DecoderConfig, Frame, FrameDecoder, FrameEncoder, FrameKind, Role};

fn client_to_server(frame: &Frame) -> (Option<Frame>, FrameDecoder) {
    let mut wire = BytesMut::new();
    FrameEncoder::new(Role::Client).encode(frame, &mut wire).unwrap();
    let mut decoder = FrameDecoder::new(Role::Server, DecoderConfig::new().expect_headers(false));
    let decoded = decoder.decode(&mut wire).unwrap();
    assert!(wire.is_empty(), "decoder left bytes behind");
    (decoded, decoder)
}

#[test]
fn text_survives_every_length_marker_boundary() {
    for len in [0usize, 1, 125, 126, 65535, 65536] {
        let text: String = (0..len).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let (decoded, _) = client_to_server(&Frame::text(text.clone()));
        assert_eq!(decoded.unwrap().payload(), Some(text.as_str()), "length {len}");
    }
}

#[test]
fn server_frames_decode_in_client_role() {
    let mut wire = BytesMut::new();
    FrameEncoder::new(Role::Server)
        .encode(&Frame::binary(vec![0u8, 1, 2, 255]), &mut wire)
        .unwrap();
    let mut decoder = FrameDecoder::new(Role::Client, DecoderConfig::new().expect_headers(false));
    let frame = decoder.decode(&mut wire).unwrap().unwrap();
    assert_eq!(frame, Frame::binary(vec![0u8, 1, 2, 255]));
}

#[test]
fn accepted_close_codes_are_preserved() {
    for status in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011] {
        let (decoded, decoder) = client_to_server(&Frame::close(Some(status), "done"));
        let frame = decoded.unwrap();
        assert_eq!(frame.kind(), FrameKind::Close);
        assert_eq!(frame.status(), Some(status));
        assert_eq!(frame.payload(), Some("done"));
        assert!(frame.is_acceptable(), "status {status}");
        assert!(!decoder.state().flags().close_initiated(), "status {status}");
    }
}

#[test]
fn rejected_close_codes_are_flagged_on_the_frame() {
    for status in [1004u16, 1005, 1006, 1012, 1013, 1014, 1015, 999, 0, 5000, 6000] {
        let (decoded, decoder) = client_to_server(&Frame::close(Some(status), ""));
        assert!(!decoded.unwrap().is_acceptable(), "status {status}");
        assert!(!decoder.state().flags().close_initiated(), "status {status}");
    }
}

#[test]
fn ping_keeps_binary_payload() {
    let (decoded, _) = client_to_server(&Frame::ping(&b"abc"[..]));
    let frame = decoded.unwrap();
    assert_eq!(frame.kind(), FrameKind::Ping);
    assert_eq!(frame.binary_data().unwrap().as_ref(), b"abc");
}

proptest! {
    #[test]
    fn decoding_is_independent_of_read_boundaries(
        messages in prop::collection::vec(".{0,300}", 1..6),
        cuts in prop::collection::vec(1usize..64, 1..40),
    ) {
        let encoder = FrameEncoder::new(Role::Client);
        let mut wire = BytesMut::new();
        for message in &messages {
            encoder.encode(&Frame::text(message.clone()), &mut wire).unwrap();
        }
        let wire = wire.freeze();

        let mut decoder = FrameDecoder::new(Role::Server, DecoderConfig::new().expect_headers(false));
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut cut = cuts.iter().cycle();
        while offset < wire.len() {
            let step = (*cut.next().unwrap()).min(wire.len() - offset);
            buf.extend_from_slice(&wire[offset..offset + step]);
            offset += step;
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                decoded.push(frame.into_payload().unwrap());
            }
        }
        prop_assert_eq!(decoded, messages);
        prop_assert!(!decoder.state().has_pending_frame());
    }
}
