//! Response definitions
//!
//! Represents responses to clients.

use std::fmt;

use super::Operation;

/// Outcome of a storage operation
///
/// Codes are assigned in declaration order starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    InsertKeyAlreadyExists = 1,
    UpdateKeyNotFound = 2,
    UpdateValueAlreadyExists = 3,
    DeleteKeyNotFound = 4,
    GetKeyNotFound = 5,
    InvalidKeyLength = 6,
    InvalidValueLength = 7,
}

impl ErrorCode {
    const ALL: [ErrorCode; 8] = [
        ErrorCode::None,
        ErrorCode::InsertKeyAlreadyExists,
        ErrorCode::UpdateKeyNotFound,
        ErrorCode::UpdateValueAlreadyExists,
        ErrorCode::DeleteKeyNotFound,
        ErrorCode::GetKeyNotFound,
        ErrorCode::InvalidKeyLength,
        ErrorCode::InvalidValueLength,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::None => "NONE",
            ErrorCode::InsertKeyAlreadyExists => "INSERT KEY ALREADY EXISTS",
            ErrorCode::UpdateKeyNotFound => "UPDATE KEY NOT FOUND",
            ErrorCode::UpdateValueAlreadyExists => "UPDATE VALUE ALREADY EXISTS",
            ErrorCode::DeleteKeyNotFound => "DELETE KEY NOT FOUND",
            ErrorCode::GetKeyNotFound => "GET KEY NOT FOUND",
            ErrorCode::InvalidKeyLength => "INVALID KEY LENGTH",
            ErrorCode::InvalidValueLength => "INVALID VALUE LENGTH",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response to send to client
///
/// `value` is non-empty only for a successful GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub operation: Operation,
    pub error: ErrorCode,
    pub value: Vec<u8>,
}

impl Response {
    /// Response without a value (every non-GET outcome, failed GETs)
    pub fn new(operation: Operation, error: ErrorCode) -> Self {
        Self {
            operation,
            error,
            value: Vec::new(),
        }
    }

    /// Successful GET carrying the stored value
    pub fn found(value: Vec<u8>) -> Self {
        Self {
            operation: Operation::Get,
            error: ErrorCode::None,
            value,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_ok()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response {{Operation: {}", self.operation)?;
        match (self.operation, self.error) {
            (Operation::Get, ErrorCode::None) => write!(
                f,
                ", SUCCESS, got value: {}",
                String::from_utf8_lossy(&self.value)
            )?,
            (_, ErrorCode::None) => f.write_str(", SUCCESS")?,
            (_, error) => write!(f, ", ERROR: {}", error)?,
        }
        f.write_str("}")
    }
}
