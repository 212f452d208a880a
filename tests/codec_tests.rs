//! Codec Tests
//!
//! Tests for request and response encoding/decoding and stream framing.

use std::io::Cursor;

use mapkv::protocol::codec::{self, FRAME_HEADER_SIZE};
use mapkv::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, ErrorCode, Operation, Request, Response,
};
use mapkv::MapKvError;

// =============================================================================
// Request Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_request_round_trip_every_operation() {
    let requests = [
        Request::insert("user:1", "alice"),
        Request::update("user:1", "bob"),
        Request::delete("user:1"),
        Request::get("user:1"),
    ];

    for request in requests {
        let encoded = encode_request(&request).unwrap();
        assert_eq!(decode_request(&encoded).unwrap(), request);
    }
}

#[test]
fn test_request_empty_key_and_binary_value() {
    let request = Request::insert(Vec::new(), vec![0u8, 255, 10, 0]);
    let encoded = encode_request(&request).unwrap();
    assert_eq!(decode_request(&encoded).unwrap(), request);
}

#[test]
fn test_request_unknown_operation_rejected() {
    let payload = [0x04, 0x00, 0x00, 0x00, 0x00];
    assert!(matches!(
        decode_request(&payload),
        Err(MapKvError::Protocol(_))
    ));
}

#[test]
fn test_request_truncated_rejected() {
    let encoded = encode_request(&Request::insert("key", "value")).unwrap();
    for cut in 0..encoded.len() {
        assert!(
            decode_request(&encoded[..cut]).is_err(),
            "prefix of {} bytes must not decode",
            cut
        );
    }
}

#[test]
fn test_request_trailing_bytes_rejected() {
    let mut encoded = encode_request(&Request::get("key")).unwrap().to_vec();
    encoded.push(0);
    assert!(decode_request(&encoded).is_err());
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_response_round_trip() {
    let responses = [
        Response::new(Operation::Insert, ErrorCode::None),
        Response::new(Operation::Insert, ErrorCode::InsertKeyAlreadyExists),
        Response::new(Operation::Update, ErrorCode::UpdateValueAlreadyExists),
        Response::new(Operation::Delete, ErrorCode::DeleteKeyNotFound),
        Response::new(Operation::Get, ErrorCode::GetKeyNotFound),
        Response::found(b"alice".to_vec()),
    ];

    for response in responses {
        let encoded = encode_response(&response).unwrap();
        assert_eq!(decode_response(&encoded).unwrap(), response);
    }
}

#[test]
fn test_response_unknown_error_code_rejected() {
    let payload = [0x03, 0x08, 0x00, 0x00];
    assert!(matches!(
        decode_response(&payload),
        Err(MapKvError::Protocol(_))
    ));
}

#[test]
fn test_failed_response_has_empty_value() {
    let response = Response::new(Operation::Get, ErrorCode::GetKeyNotFound);
    assert!(response.value.is_empty());
    let encoded = encode_response(&response).unwrap();
    // op, error, zero length
    assert_eq!(&encoded[..], &[0x03, 0x05, 0x00, 0x00]);
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_request_round_trip() {
    let mut wire = Vec::new();
    write_request(&mut wire, &Request::insert("a", "1")).unwrap();
    write_request(&mut wire, &Request::get("a")).unwrap();

    let mut cursor = Cursor::new(wire);
    assert_eq!(read_request(&mut cursor).unwrap(), Request::insert("a", "1"));
    assert_eq!(read_request(&mut cursor).unwrap(), Request::get("a"));
    assert!(read_request(&mut cursor).is_err());
}

#[test]
fn test_stream_response_round_trip() {
    let mut wire = Vec::new();
    write_response(&mut wire, &Response::found(b"v".to_vec())).unwrap();

    let payload_len = wire.len() - FRAME_HEADER_SIZE;
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&wire[..FRAME_HEADER_SIZE]);
    assert_eq!(codec::decode_frame_size(header).unwrap(), payload_len);

    let mut cursor = Cursor::new(wire);
    assert_eq!(
        read_response(&mut cursor).unwrap(),
        Response::found(b"v".to_vec())
    );
}

#[test]
fn test_eof_inside_frame_is_disconnect() {
    let mut wire = Vec::new();
    write_request(&mut wire, &Request::insert("key", "value")).unwrap();
    wire.truncate(wire.len() - 2);

    let err = read_request(&mut Cursor::new(wire)).unwrap_err();
    assert!(err.is_disconnect());
}

// =============================================================================
// Display Tests
// =============================================================================

#[test]
fn test_display_matches_operator_output() {
    assert_eq!(
        Request::insert("k", "v").to_string(),
        "Request {Operation: INSERT, Key: k, Value: v}"
    );
    assert_eq!(Request::get("k").to_string(), "Request {Operation: GET, Key: k}");
    assert_eq!(
        Response::found(b"v".to_vec()).to_string(),
        "Response {Operation: GET, SUCCESS, got value: v}"
    );
    assert_eq!(
        Response::new(Operation::Delete, ErrorCode::DeleteKeyNotFound).to_string(),
        "Response {Operation: DELETE, ERROR: DELETE KEY NOT FOUND}"
    );
}

#[test]
fn test_operation_parsing() {
    for (text, expected) in [
        ("INSERT", Operation::Insert),
        ("i", Operation::Insert),
        ("1", Operation::Update),
        ("u", Operation::Update),
        ("Delete", Operation::Delete),
        ("2", Operation::Delete),
        ("G", Operation::Get),
        ("3", Operation::Get),
    ] {
        assert_eq!(text.parse::<Operation>().unwrap(), expected, "{}", text);
    }
    assert!("PUT".parse::<Operation>().is_err());
    assert!("4".parse::<Operation>().is_err());
}
