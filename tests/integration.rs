//! Integration tests for the wire codec.
//!
//! These tests verify frames, length-prefix buffering and payload codecs together.

use bytes::Bytes;
use rsocket_wire::codec::{MimeCodec, MsgPackCodec, JSON_MIME_TYPE, MSGPACK_MIME_TYPE};
use rsocket_wire::protocol::{
    flags, DecodeError, ErrorCode, Frame, FrameBody, FrameBuffer, FrameType, Header, HEADER_SIZE,
};
use rsocket_wire::{Payload, SetupPayload};

fn prefixed(frames: &[Frame]) -> Vec<u8> {
    frames
        .iter()
        .flat_map(|frame| FrameBuffer::prefix(&frame.encode()))
        .collect()
}

/// Test full frame encode/decode cycle with a MsgPack payload.
#[test]
fn test_frame_with_msgpack_payload() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Greeting {
        id: i32,
        message: String,
    }

    let greeting = Greeting {
        id: 42,
        message: "Hello, world!".to_string(),
    };
    let data = MsgPackCodec::encode(&greeting).unwrap();
    let frame = Frame::request_response(1, Payload::new(data, Some(Bytes::from_static(b"m"))));

    let mut buffer = FrameBuffer::new();
    let frames = buffer.push(&prefixed(&[frame.clone()])).unwrap();
    assert_eq!(frames.len(), 1);

    // METADATA lives in the header on the wire and in the payload once decoded.
    assert!(Header::decode(&frames[0]).unwrap().has(flags::METADATA));
    let decoded = Frame::decode(frames[0].clone()).unwrap();
    assert_eq!(decoded, frame);
    assert!(!decoded.has(flags::METADATA));

    let payload = decoded.payload_ref().unwrap();
    assert!(payload.has_metadata());
    let back: Greeting = MsgPackCodec::decode(payload.data()).unwrap();
    assert_eq!(back, greeting);
}

/// Test a request/response exchange as it appears on the wire.
#[test]
fn test_request_response_exchange_sequence() {
    let frames = vec![
        Frame::setup(SetupPayload::from_str("setup", "")),
        Frame::request_response(1, Payload::from_str("data", "metadata")),
        Frame::request_response(3, Payload::from_str("second", "")),
        Frame::next_complete(3, Payload::from_str("b", "")),
        Frame::next_complete(1, Payload::from_str("data", "meta")),
    ];

    let mut buffer = FrameBuffer::new();
    let decoded: Vec<Frame> = buffer
        .push(&prefixed(&frames))
        .unwrap()
        .into_iter()
        .map(|bytes| Frame::decode(bytes).unwrap())
        .collect();

    assert_eq!(decoded, frames);
    assert_eq!(decoded[0].stream_id, 0);
    assert!(decoded[3].is_next() && decoded[3].is_complete());
}

/// Test a request-stream as it appears on the wire: items, then COMPLETE.
#[test]
fn test_stream_pattern() {
    let mut frames = vec![Frame::request_stream(5, 16, Payload::from_str("ticks", ""))];
    for i in 0..3i32 {
        let data = MsgPackCodec::encode(&i).unwrap();
        frames.push(Frame::next(5, Payload::from_data(data)));
    }
    frames.push(Frame::complete(5));

    let mut buffer = FrameBuffer::new();
    let decoded: Vec<Frame> = buffer
        .push(&prefixed(&frames))
        .unwrap()
        .into_iter()
        .map(|bytes| Frame::decode(bytes).unwrap())
        .collect();
    assert_eq!(decoded.len(), 5);

    for (i, frame) in decoded[1..4].iter().enumerate() {
        assert!(frame.is_next());
        assert!(!frame.is_complete());
        let value: i32 = MsgPackCodec::decode(frame.payload_ref().unwrap().data()).unwrap();
        assert_eq!(value, i as i32);
    }

    let end = &decoded[4];
    assert!(end.is_complete());
    assert!(!end.is_next());
}

/// Test byte-by-byte feeding of several frames.
#[test]
fn test_byte_by_byte_parsing() {
    let frames = vec![
        Frame::keepalive(true, 0, Bytes::from_static(b"ping")),
        Frame::error(7, ErrorCode::APPLICATION_ERROR, "boom"),
        Frame::cancel(9),
    ];
    let bytes = prefixed(&frames);

    let mut buffer = FrameBuffer::new();
    let mut decoded = Vec::new();
    for byte in bytes {
        for frame in buffer.push(&[byte]).unwrap() {
            decoded.push(Frame::decode(frame).unwrap());
        }
    }

    assert_eq!(decoded, frames);
    assert!(buffer.is_empty());
}

/// Test that an unknown frame type is skippable and the next frame still decodes.
#[test]
fn test_unknown_frame_type_is_skipped() {
    let mut unknown = Header::new(1, FrameType::RequestN, 0).encode().to_vec();
    // Frame type code 0x30 is unassigned.
    unknown[4] = 0x30 << 2;
    unknown.extend_from_slice(&[0, 0, 0, 1]);

    let mut bytes = FrameBuffer::prefix(&unknown);
    bytes.extend(prefixed(&[Frame::cancel(1)]));

    let mut buffer = FrameBuffer::new();
    let raw = buffer.push(&bytes).unwrap();
    assert_eq!(raw.len(), 2);

    let err = Frame::decode(raw[0].clone()).unwrap_err();
    assert!(matches!(err, DecodeError::UnknownFrameType { code: 0x30, .. }));
    assert!(err.is_recoverable());

    assert_eq!(Frame::decode(raw[1].clone()).unwrap(), Frame::cancel(1));
}

/// Test that a frame cut short reports how much is missing.
#[test]
fn test_truncated_frame_is_incomplete() {
    let encoded = Frame::request_response(1, Payload::from_str("data", "metadata")).encode();

    let err = Frame::decode(encoded.slice(..HEADER_SIZE - 2)).unwrap_err();
    assert!(matches!(err, DecodeError::Incomplete { .. }));

    let err = Frame::decode(encoded.slice(..HEADER_SIZE + 2)).unwrap_err();
    assert!(matches!(err, DecodeError::Incomplete { .. }));
    assert!(!err.is_recoverable());
}

/// Test SETUP carrying typed data in the negotiated MIME type.
#[test]
fn test_setup_with_json_data() {
    let codec = MimeCodec::from_mime_type(JSON_MIME_TYPE);
    let data = codec.encode(&serde_json::json!({ "token": "abc" })).unwrap();
    let setup = SetupPayload::new(Payload::from_data(data)).data_mime_type(JSON_MIME_TYPE);

    let decoded = Frame::decode(Frame::setup(setup.clone()).encode()).unwrap();
    let FrameBody::Setup(back) = decoded.body else {
        panic!("expected SETUP, got {:?}", decoded.body);
    };
    assert_eq!(back, setup);

    let codec = MimeCodec::from_mime_type(&back.data_mime_type);
    let value: serde_json::Value = codec.decode(back.payload.data()).unwrap();
    assert_eq!(value["token"], "abc");
}

/// Test codec selection by MIME type.
#[test]
fn test_mime_codec_selection() {
    assert_eq!(MimeCodec::from_mime_type(JSON_MIME_TYPE), MimeCodec::Json);
    assert_eq!(MimeCodec::from_mime_type(MSGPACK_MIME_TYPE), MimeCodec::MsgPack);
    assert_eq!(
        MimeCodec::from_mime_type("Application/JSON; charset=utf-8"),
        MimeCodec::Json
    );
    assert_eq!(MimeCodec::from_mime_type("application/binary"), MimeCodec::Binary);

    assert!(MimeCodec::Binary.encode(&1u8).is_err());
}

/// Test that frames with IGNORE set survive a round trip.
#[test]
fn test_ignore_flag_preserved() {
    let frame = Frame::new(0, flags::IGNORE, FrameBody::MetadataPush(Bytes::from_static(b"m")));
    let decoded = Frame::decode(frame.encode()).unwrap();
    assert!(decoded.has(flags::IGNORE));
    assert_eq!(decoded, frame);
}
