// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frame encoding/decoding tests for occ-protocol.

use bytes::Bytes;
use occ_protocol::control_proto::{ConfigEntry, TransitionReply, TransitionRequest};
use occ_protocol::frame::{Frame, FrameError, HEADER_SIZE, MAX_FRAME_SIZE, MessageType};

#[test]
fn test_message_type_conversions() {
    // Valid message types
    assert_eq!(MessageType::try_from(1u16).unwrap(), MessageType::Request);
    assert_eq!(MessageType::try_from(2u16).unwrap(), MessageType::Response);
    assert_eq!(
        MessageType::try_from(3u16).unwrap(),
        MessageType::StreamData
    );
    assert_eq!(MessageType::try_from(4u16).unwrap(), MessageType::StreamEnd);
    assert_eq!(MessageType::try_from(5u16).unwrap(), MessageType::Error);

    // Invalid message types
    assert!(MessageType::try_from(0u16).is_err());
    assert!(MessageType::try_from(6u16).is_err());
    assert!(MessageType::try_from(100u16).is_err());
}

#[test]
fn test_frame_encode_decode_roundtrip() {
    let msg = TransitionRequest {
        src_state: "STANDBY".to_string(),
        transition_event: "CONFIGURE".to_string(),
        arguments: vec![ConfigEntry {
            key: "runNumber".to_string(),
            value: "42".to_string(),
        }],
    };
    let original_frame = Frame::request(&msg).unwrap();

    let encoded = original_frame.encode();
    let decoded_frame = Frame::decode_from_bytes(encoded).unwrap();

    assert_eq!(original_frame.message_type, decoded_frame.message_type);
    assert_eq!(original_frame.payload, decoded_frame.payload);

    let decoded: TransitionRequest = decoded_frame.decode().unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_frame_header_format() {
    let msg = TransitionReply {
        state: "CONFIGURED".to_string(),
        transition_event: "CONFIGURE".to_string(),
        ok: true,
        trigger: 0,
    };
    let frame = Frame::response(&msg).unwrap();
    let encoded = frame.encode();

    // First 4 bytes are length (big-endian)
    let length = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
    assert_eq!(length, frame.payload.len());

    // Next 2 bytes are message type (big-endian)
    let msg_type = u16::from_be_bytes([encoded[4], encoded[5]]);
    assert_eq!(msg_type, MessageType::Response as u16);

    // Total size should be header + payload
    assert_eq!(encoded.len(), HEADER_SIZE + frame.payload.len());
}

#[test]
fn test_frame_decode_incomplete_header() {
    // Less than 6 bytes
    let incomplete = Bytes::from_static(&[0, 0, 0, 10, 0]); // only 5 bytes
    let result = Frame::decode_from_bytes(incomplete);

    assert!(matches!(result, Err(FrameError::Io(_))));
}

#[test]
fn test_frame_decode_incomplete_payload() {
    // Header says 100 bytes but only 10 provided
    let mut data = vec![0, 0, 0, 100]; // length = 100
    data.extend_from_slice(&[0, 1]); // type = Request
    data.extend_from_slice(&[0u8; 10]); // only 10 bytes of payload

    let result = Frame::decode_from_bytes(Bytes::from(data));
    assert!(matches!(result, Err(FrameError::Io(_))));
}

#[test]
fn test_frame_decode_invalid_message_type() {
    let mut data = vec![0, 0, 0, 0]; // length = 0
    data.extend_from_slice(&[0, 99]); // type = 99 (invalid)

    let result = Frame::decode_from_bytes(Bytes::from(data));
    assert!(matches!(result, Err(FrameError::InvalidMessageType(99))));
}

#[test]
fn test_frame_decode_empty_payload() {
    let mut data = vec![0, 0, 0, 0]; // length = 0
    data.extend_from_slice(&[0, 1]); // type = Request

    let frame = Frame::decode_from_bytes(Bytes::from(data)).unwrap();
    assert_eq!(frame.message_type, MessageType::Request);
    assert!(frame.payload.is_empty());
}

#[test]
fn test_max_frame_size_constant() {
    assert_eq!(MAX_FRAME_SIZE, 1024 * 1024);
}

#[test]
fn test_header_size_constant() {
    // Verify header is 6 bytes (4 length + 2 type)
    assert_eq!(HEADER_SIZE, 6);
}

#[tokio::test]
async fn test_read_write_frame() {
    use occ_protocol::frame::{read_frame, write_frame};
    use tokio::io::BufWriter;

    let msg = TransitionRequest {
        src_state: "CONFIGURED".to_string(),
        transition_event: "START".to_string(),
        arguments: vec![],
    };
    let original_frame = Frame::request(&msg).unwrap();

    // Write to a buffer
    let mut buffer = Vec::new();
    let mut writer = BufWriter::new(&mut buffer);
    write_frame(&mut writer, &original_frame).await.unwrap();

    // Flush to ensure all data is written
    tokio::io::AsyncWriteExt::flush(&mut writer).await.unwrap();
    drop(writer);

    // Read back
    let mut reader = buffer.as_slice();
    let read_back = read_frame(&mut reader).await.unwrap();

    assert_eq!(original_frame.message_type, read_back.message_type);
    assert_eq!(original_frame.payload, read_back.payload);
}

#[tokio::test]
async fn test_read_stream_items_until_end() {
    use occ_protocol::control_proto::StateStreamReply;
    use occ_protocol::frame::{FramedStream, write_frame};

    let mut buffer = Vec::new();
    for state in ["STANDBY", "CONFIGURED"] {
        let reply = StateStreamReply {
            r#type: 0,
            state: state.to_string(),
        };
        write_frame(&mut buffer, &Frame::stream_data(&reply).unwrap())
            .await
            .unwrap();
    }
    write_frame(&mut buffer, &Frame::stream_end()).await.unwrap();

    let mut framed = FramedStream::new(buffer.as_slice());
    let first: StateStreamReply = framed.read_stream_item().await.unwrap().unwrap();
    assert_eq!(first.state, "STANDBY");
    let second: StateStreamReply = framed.read_stream_item().await.unwrap().unwrap();
    assert_eq!(second.state, "CONFIGURED");
    let end: Option<StateStreamReply> = framed.read_stream_item().await.unwrap();
    assert!(end.is_none());
}
