//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ```text
//! Frame           := FrameSize (8, host order) | Payload (FrameSize bytes)
//! RequestPayload  := Operation (1) | Key (LPString) | Value (LPString)
//! ResponsePayload := Operation (1) | Error (1)      | Value (LPString)
//! LPString        := Length (2, network order) | Bytes (Length)
//! ```
//!
//! Every field is written regardless of the operation, so GET/DELETE requests
//! and non-GET responses still carry a zero-length value.
//!
//! The frame size is the only field left in host byte order; inner fields are
//! normalized. Peers must therefore share endianness for the frame prefix.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{ErrorCode, Operation, Request, Response};
use crate::error::{MapKvError, Result};

/// Size of the frame-size prefix
pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<u64>();

/// Size of the LPString length prefix
pub const LENGTH_PREFIX_SIZE: usize = std::mem::size_of::<u16>();

/// Largest payload either message can produce: two full LPStrings plus two
/// scalar bytes. Anything larger is a framing error.
pub const MAX_FRAME_SIZE: usize = 2 + 2 * (LENGTH_PREFIX_SIZE + u16::MAX as usize);

// =============================================================================
// Field Helpers
// =============================================================================

fn put_lp_string(buf: &mut BytesMut, field: &'static str, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| MapKvError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    buf.put_u16(len);
    buf.put_slice(bytes);
    Ok(())
}

fn get_u8(buf: &mut &[u8], field: &'static str) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(MapKvError::Protocol(format!("missing {} byte", field)));
    }
    Ok(buf.get_u8())
}

fn get_lp_string(buf: &mut &[u8], field: &'static str) -> Result<Vec<u8>> {
    if buf.remaining() < LENGTH_PREFIX_SIZE {
        return Err(MapKvError::Protocol(format!("missing {} length", field)));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(MapKvError::Protocol(format!(
            "incomplete {} (expected {}, got {})",
            field,
            len,
            buf.remaining()
        )));
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

fn expect_consumed(buf: &[u8], message: &str) -> Result<()> {
    if !buf.is_empty() {
        return Err(MapKvError::Protocol(format!(
            "{}: {} trailing bytes",
            message,
            buf.len()
        )));
    }
    Ok(())
}

fn decode_operation(buf: &mut &[u8]) -> Result<Operation> {
    let code = get_u8(buf, "operation")?;
    Operation::from_code(code)
        .ok_or_else(|| MapKvError::Protocol(format!("unknown operation: 0x{:02x}", code)))
}

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request payload (without the frame prefix)
pub fn encode_request(request: &Request) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(
        1 + 2 * LENGTH_PREFIX_SIZE + request.key.len() + request.value.len(),
    );
    buf.put_u8(request.operation.code());
    put_lp_string(&mut buf, "key", &request.key)?;
    put_lp_string(&mut buf, "value", &request.value)?;
    Ok(buf.freeze())
}

/// Decode a request payload
pub fn decode_request(mut payload: &[u8]) -> Result<Request> {
    let operation = decode_operation(&mut payload)?;
    let key = get_lp_string(&mut payload, "key")?;
    let value = get_lp_string(&mut payload, "value")?;
    expect_consumed(payload, "request")?;

    Ok(Request {
        operation,
        key,
        value,
    })
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response payload (without the frame prefix)
pub fn encode_response(response: &Response) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(2 + LENGTH_PREFIX_SIZE + response.value.len());
    buf.put_u8(response.operation.code());
    buf.put_u8(response.error.code());
    put_lp_string(&mut buf, "value", &response.value)?;
    Ok(buf.freeze())
}

/// Decode a response payload
pub fn decode_response(mut payload: &[u8]) -> Result<Response> {
    let operation = decode_operation(&mut payload)?;
    let code = get_u8(&mut payload, "error")?;
    let error = ErrorCode::from_code(code)
        .ok_or_else(|| MapKvError::Protocol(format!("unknown error code: 0x{:02x}", code)))?;
    let value = get_lp_string(&mut payload, "value")?;
    expect_consumed(payload, "response")?;

    Ok(Response {
        operation,
        error,
        value,
    })
}

// =============================================================================
// Framing
// =============================================================================

/// Encode the frame-size prefix (host byte order)
pub fn encode_frame_size(len: usize) -> [u8; FRAME_HEADER_SIZE] {
    (len as u64).to_ne_bytes()
}

/// Decode and bound-check the frame-size prefix
pub fn decode_frame_size(header: [u8; FRAME_HEADER_SIZE]) -> Result<usize> {
    let len = u64::from_ne_bytes(header);
    if len > MAX_FRAME_SIZE as u64 {
        return Err(MapKvError::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(len as usize)
}

/// Prefix a payload with its frame size
pub fn frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_slice(&encode_frame_size(payload.len()));
    buf.put_slice(payload);
    buf.freeze()
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one complete frame payload from a stream
///
/// Blocks until the full frame is received or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let len = decode_frame_size(header)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Write one frame to a stream and flush it
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(&encode_frame_size(payload.len()))?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete request from a stream
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    decode_request(&read_frame(reader)?)
}

/// Write a request to a stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    write_frame(writer, &encode_request(request)?)
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    decode_response(&read_frame(reader)?)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    write_frame(writer, &encode_response(response)?)
}
