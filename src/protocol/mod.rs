//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ### Operations
//! - 0x00: INSERT - key + value
//! - 0x01: UPDATE - key + value
//! - 0x02: DELETE - key (empty value)
//! - 0x03: GET    - key (empty value)
//!
//! ### Error Codes
//! - 0x00: NONE
//! - 0x01: INSERT_KEY_ALREADY_EXISTS
//! - 0x02: UPDATE_KEY_NOT_FOUND
//! - 0x03: UPDATE_VALUE_ALREADY_EXISTS
//! - 0x04: DELETE_KEY_NOT_FOUND
//! - 0x05: GET_KEY_NOT_FOUND
//! - 0x06: INVALID_KEY_LENGTH
//! - 0x07: INVALID_VALUE_LENGTH
//!
//! See [`codec`] for the byte layout.

mod request;
mod response;
pub mod codec;

pub use request::{
    is_valid_key, is_valid_value, Operation, Request, MAX_KEY_LENGTH, MAX_VALUE_LENGTH,
};
pub use response::{ErrorCode, Response};
pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response,
};
