//! Request definitions
//!
//! Represents requests from clients.

use std::fmt;
use std::str::FromStr;

use crate::error::MapKvError;

/// Maximum key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Maximum value length in bytes
pub const MAX_VALUE_LENGTH: usize = 1024 * 1024;

/// Key validity: length within [`MAX_KEY_LENGTH`]
pub fn is_valid_key(key: &[u8]) -> bool {
    key.len() <= MAX_KEY_LENGTH
}

/// Value validity: length within [`MAX_VALUE_LENGTH`]
pub fn is_valid_value(value: &[u8]) -> bool {
    value.len() <= MAX_VALUE_LENGTH
}

/// Supported operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Insert = 0,
    Update = 1,
    Delete = 2,
    Get = 3,
}

impl Operation {
    /// Every operation, in wire-code order
    pub const ALL: [Operation; 4] = [
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
        Operation::Get,
    ];

    /// Wire code of this operation
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Operation for a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Index into per-operation tables
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Whether the request's value field carries meaning
    pub fn takes_value(self) -> bool {
        matches!(self, Operation::Insert | Operation::Update)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Get => "GET",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the full name, its first letter, or the numeric code
/// (`INSERT`, `I`, `0`, ...), case-insensitively.
impl FromStr for Operation {
    type Err = MapKvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Operation::from_code(code)
                .ok_or_else(|| MapKvError::Protocol(format!("unknown operation code: {}", code)));
        }

        match s.to_ascii_uppercase().as_str() {
            "INSERT" | "I" => Ok(Operation::Insert),
            "UPDATE" | "U" => Ok(Operation::Update),
            "DELETE" | "D" => Ok(Operation::Delete),
            "GET" | "G" => Ok(Operation::Get),
            _ => Err(MapKvError::Protocol(format!("unknown operation: '{}'", s))),
        }
    }
}

/// A client request
///
/// `value` is always carried on the wire, empty for GET and DELETE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Request {
    pub fn new(operation: Operation, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            operation,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn insert(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(Operation::Insert, key, value)
    }

    pub fn update(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(Operation::Update, key, value)
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::new(Operation::Delete, key, Vec::new())
    }

    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        Self::new(Operation::Get, key, Vec::new())
    }

    /// Check key and value against the length limits
    pub fn validate(&self) -> crate::Result<()> {
        if !is_valid_key(&self.key) {
            return Err(MapKvError::InvalidKeyLength {
                len: self.key.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        if !is_valid_value(&self.value) {
            return Err(MapKvError::InvalidValueLength {
                len: self.value.len(),
                max: MAX_VALUE_LENGTH,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request {{Operation: {}, Key: {}",
            self.operation,
            String::from_utf8_lossy(&self.key)
        )?;
        if self.operation.takes_value() {
            write!(f, ", Value: {}", String::from_utf8_lossy(&self.value))?;
        }
        f.write_str("}")
    }
}
