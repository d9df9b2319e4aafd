//! Engine Error Types
//!
//! Runtime error taxonomy for the polling engine. Bus-level failures
//! (timeouts, bad frames) are not errors here, they are per-exchange
//! outcomes handled by the supervisor. These errors cover configuration
//! defects and the service/transport boundary.

use thiserror::Error;

use bsb_protocol::error::EncodeError;

/// Result type for bsb-engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// A field id was registered twice; setup defect, fatal at config time
    #[error("duplicate field id {0:#010X}")]
    DuplicateFieldId(u32),

    /// Operation referenced a field id that was never registered
    #[error("unknown field id {0:#010X}")]
    UnknownField(u32),

    /// A select write used a label outside the configured option map
    #[error("unknown option '{option}' for field {field_id:#010X}")]
    UnknownOption { field_id: u32, option: String },

    /// A write was requested on a read-only field kind
    #[error("field {0:#010X} is not writable")]
    NotWritable(u32),

    /// A write value does not fit the field's declared value type
    #[error("value encoding failed: {0}")]
    Encode(#[from] EncodeError),

    /// Serial port or I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Declaration file or parameter problems
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine side of a command channel is gone
    #[error("engine command channel closed")]
    ChannelClosed,
}

impl EngineError {
    pub fn transport(msg: impl Into<String>) -> Self {
        EngineError::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Config(format!("YAML error: {err}"))
    }
}
