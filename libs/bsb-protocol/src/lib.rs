//! BSB Protocol Library
//!
//! Wire-level building blocks for talking to a BSB (Boiler-System-Bus)
//! heating controller over a half-duplex serial link:
//!
//! ```text
//! bsb-protocol
//!     ├── frame (frame encoding/decoding, CRC, stream accumulator)
//!     ├── value (typed value decoding/encoding per value type)
//!     ├── constants (wire layout, opcodes, scaling divisors)
//!     └── error (frame/decode/encode error taxonomy)
//! ```
//!
//! This crate is pure byte-level logic with no I/O; the engine crate owns
//! scheduling, retries and the serial port. Frames here are *logical*
//! bytes; the physical line carries every byte inverted, which is a
//! transport concern handled next to the port.

pub mod constants;
pub mod error;
pub mod frame;
pub mod value;

// Re-export the working set for convenience
pub use error::{DecodeError, EncodeError, FrameError};
pub use frame::{
    decode_response, encode_ack, encode_answer, encode_info, encode_nack, encode_query,
    encode_set, Frame, FrameAccumulator, FrameOp,
};
pub use value::{decode, encode, FieldValue, ValueType};
