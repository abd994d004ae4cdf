use std::sync::Arc;

use bytes::Bytes;
use fairway_codec::{
    feature_id, DeflateCompressor, FrameCodec, NegotiationFrame, RequestFrame, ResponseFrame,
    StreamFrame,
};

#[tokio::test]
async fn negotiation_round_trips_with_feature_records() {
    let codec = FrameCodec::new();
    let frame = NegotiationFrame::new()
        .with_feature(feature_id::TIMEOUT, Bytes::new())
        .with_feature(feature_id::CONNECTION_ID, Bytes::from(vec![7u8; 16]));

    let mut buf = Vec::new();
    codec.write_negotiation(&mut buf, &frame).await.unwrap();

    let mut cursor = std::io::Cursor::new(buf);
    let decoded = codec.read_negotiation(&mut cursor).await.unwrap().unwrap();
    assert!(decoded.has(feature_id::TIMEOUT));
    assert_eq!(
        decoded.get(feature_id::CONNECTION_ID).unwrap().as_ref(),
        &[7u8; 16][..]
    );
}

#[tokio::test]
async fn request_round_trips_without_timeout_prefix() {
    let codec = FrameCodec::new();
    let frame = RequestFrame {
        timeout_ms: None,
        verb: 0xABCD,
        message_id: 42,
        payload: Bytes::from_static(b"hello"),
    };
    let mut buf = Vec::new();
    codec.write_request(&mut buf, &frame).await.unwrap();
    assert_eq!(buf.len(), 20 + 5);

    let mut cursor = std::io::Cursor::new(buf);
    let decoded = codec.read_request(&mut cursor).await.unwrap().unwrap();
    assert_eq!(decoded, frame);
}

#[tokio::test]
async fn request_round_trips_with_timeout_prefix() {
    let codec = FrameCodec::new().with_timeout(true);
    let frame = RequestFrame {
        timeout_ms: Some(5_000),
        verb: 1,
        message_id: -99,
        payload: Bytes::from_static(b"payload-bytes"),
    };
    let mut buf = Vec::new();
    codec.write_request(&mut buf, &frame).await.unwrap();
    assert_eq!(buf.len(), 28 + frame.payload.len());

    let mut cursor = std::io::Cursor::new(buf);
    let decoded = codec.read_request(&mut cursor).await.unwrap().unwrap();
    assert_eq!(decoded, frame);
}

#[tokio::test]
async fn response_negative_message_id_marks_exception() {
    let codec = FrameCodec::new();
    let frame = ResponseFrame {
        message_id: -7,
        payload: Bytes::from_static(b"boom"),
    };
    let mut buf = Vec::new();
    codec.write_response(&mut buf, &frame).await.unwrap();

    let mut cursor = std::io::Cursor::new(buf);
    let decoded = codec.read_response(&mut cursor).await.unwrap().unwrap();
    assert!(decoded.is_exception());
    assert_eq!(decoded.message_id, -7);
}

#[tokio::test]
async fn stream_end_of_stream_marker_round_trips() {
    let codec = FrameCodec::new();
    let mut buf = Vec::new();
    codec
        .write_stream(&mut buf, &StreamFrame::Payload(Bytes::from_static(b"a")))
        .await
        .unwrap();
    codec
        .write_stream(&mut buf, &StreamFrame::EndOfStream)
        .await
        .unwrap();

    let mut cursor = std::io::Cursor::new(buf);
    assert_eq!(
        codec.read_stream(&mut cursor).await.unwrap().unwrap(),
        StreamFrame::Payload(Bytes::from_static(b"a"))
    );
    assert_eq!(
        codec.read_stream(&mut cursor).await.unwrap().unwrap(),
        StreamFrame::EndOfStream
    );
}

#[tokio::test]
async fn clean_eof_between_frames_is_none_not_an_error() {
    let codec = FrameCodec::new();
    let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
    assert!(codec.read_request(&mut cursor).await.unwrap().is_none());
}

#[tokio::test]
async fn short_read_mid_header_is_an_error() {
    let codec = FrameCodec::new();
    let mut cursor = std::io::Cursor::new(vec![1u8, 2, 3]);
    assert!(codec.read_request(&mut cursor).await.is_err());
}

#[tokio::test]
async fn compressed_frames_round_trip_through_deflate() {
    let codec = FrameCodec::new().with_compressor(Some(Arc::new(DeflateCompressor::default())));
    let frame = RequestFrame {
        timeout_ms: None,
        verb: 3,
        message_id: 1,
        payload: Bytes::from(vec![b'x'; 4096]),
    };
    let mut buf = Vec::new();
    codec.write_request(&mut buf, &frame).await.unwrap();
    // Highly repetitive payload should compress well below its raw size
    // plus the uncompressed header.
    assert!(buf.len() < frame.payload.len());

    let mut cursor = std::io::Cursor::new(buf);
    let decoded = codec.read_request(&mut cursor).await.unwrap().unwrap();
    assert_eq!(decoded, frame);
}

#[tokio::test]
async fn frame_length_invariant_header_plus_payload_equals_bytes_on_wire() {
    let codec = FrameCodec::new();
    let frame = ResponseFrame {
        message_id: 5,
        payload: Bytes::from_static(b"0123456789"),
    };
    let mut buf = Vec::new();
    codec.write_response(&mut buf, &frame).await.unwrap();
    assert_eq!(buf.len(), 12 + frame.payload.len());
}
