//! Protocol Error Types
//!
//! Frame-level and value-level error taxonomy. Every variant here is
//! recoverable from the engine's point of view: a bad frame or a bad payload
//! costs the current exchange attempt and nothing else.

use thiserror::Error;

use crate::value::ValueType;

/// Frame validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the minimum or the declared frame size
    #[error("frame truncated: got {actual} bytes, need {expected}")]
    Truncated { expected: usize, actual: usize },

    /// CRC trailer does not match the frame contents
    #[error("checksum mismatch: computed {computed:#06X}, frame carries {received:#06X}")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// Reply addressing does not match the expected device/engine pairing
    #[error("address mismatch: reply {reply_source:#04X} -> {destination:#04X}")]
    AddressMismatch { reply_source: u8, destination: u8 },

    /// Reply parameter number does not match the outstanding request
    #[error("unexpected parameter {actual}, awaiting {expected}")]
    UnexpectedParameter { expected: u32, actual: u32 },
}

/// Payload decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload size does not match the declared value type
    #[error("length mismatch for {value_type}: got {actual} bytes, need {expected}")]
    LengthMismatch {
        value_type: ValueType,
        expected: usize,
        actual: usize,
    },
}

/// Value encoding errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodeError {
    /// Value shape does not fit the declared type (e.g. a decimal for INT16)
    #[error("type mismatch: {value_type} cannot encode {offered}")]
    TypeMismatch {
        value_type: ValueType,
        offered: &'static str,
    },

    /// Value falls outside the representable range of the declared type
    #[error("value {value} out of range for {value_type}")]
    OutOfRange { value_type: ValueType, value: f64 },
}
