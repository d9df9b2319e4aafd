//! BSB wire protocol constants
//!
//! Frame layout:
//!
//! ```text
//! offset  size  field
//! 0       1     start of frame (0xDC)
//! 1       1     source address, reply bit 0x80 set
//! 2       1     destination address
//! 3       1     total frame length in bytes, CRC included
//! 4       1     operation code
//! 5       4     parameter number, big-endian
//! 9       n     payload (absent for queries)
//! 9+n     2     CRC-16/XMODEM over offsets 0..9+n, big-endian
//! ```

use crc::{Crc, CRC_16_XMODEM};

/// Start-of-frame marker
pub const FRAME_SOF: u8 = 0xDC;

/// Reply bit carried in the source address octet of every frame
pub const SOURCE_REPLY_BIT: u8 = 0x80;

/// Smallest valid frame: header (9) + CRC (2), no payload
pub const MIN_FRAME_LEN: usize = 11;

/// Largest frame this codec accepts; the length octet bounds it anyway,
/// the accumulator uses this to reject garbage length fields early
pub const MAX_FRAME_LEN: usize = 32;

/// CRC trailer size
pub const CRC_LEN: usize = 2;

// Frame field offsets
pub const SOF_OFFSET: usize = 0;
pub const SOURCE_OFFSET: usize = 1;
pub const DESTINATION_OFFSET: usize = 2;
pub const LENGTH_OFFSET: usize = 3;
pub const OP_OFFSET: usize = 4;
pub const PARAMETER_OFFSET: usize = 5;
pub const PAYLOAD_OFFSET: usize = 9;

// Operation codes
pub const OP_INFO: u8 = 0x02;
pub const OP_SET: u8 = 0x03;
pub const OP_ACK: u8 = 0x04;
pub const OP_NACK: u8 = 0x05;
pub const OP_QUERY: u8 = 0x06;
pub const OP_ANSWER: u8 = 0x07;

/// Frame checksum algorithm
pub const FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Raw units per degree for TEMPERATURE payloads (0.1 °C resolution)
pub const TEMPERATURE_DIVISOR: f64 = 10.0;

/// Raw units per degree for ROOMTEMPERATURE payloads (the controller's
/// native 1/64 °C fixed point)
pub const ROOM_TEMPERATURE_DIVISOR: f64 = 64.0;
