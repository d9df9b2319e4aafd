//! BSB frame encoding and decoding
//!
//! Builds outgoing query/set/info frames and validates incoming frames
//! (start marker, declared length, CRC, addressing, parameter echo). Frames
//! are logical bytes; line inversion happens at the transport.
//!
//! Decoding is tolerant of noise before and after a frame but strict on the
//! declared length and checksum. Every failure here is recoverable: the
//! engine counts it against the current exchange attempt.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::constants::{
    CRC_LEN, DESTINATION_OFFSET, FRAME_CRC, FRAME_SOF, LENGTH_OFFSET, MAX_FRAME_LEN,
    MIN_FRAME_LEN, OP_ACK, OP_ANSWER, OP_INFO, OP_NACK, OP_OFFSET, OP_QUERY, OP_SET,
    PARAMETER_OFFSET, PAYLOAD_OFFSET, SOF_OFFSET, SOURCE_OFFSET, SOURCE_REPLY_BIT,
};
use crate::error::FrameError;

/// Frame operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOp {
    /// Unsolicited or broadcast value, no acknowledgement expected
    Info,
    /// Write request
    Set,
    /// Write accepted
    Ack,
    /// Write refused
    Nack,
    /// Read request
    Query,
    /// Read response carrying a value payload
    Answer,
}

impl FrameOp {
    /// Map a raw operation octet; unknown codes are not an error, the
    /// engine ignores frames it has no handler for
    pub fn from_raw(op: u8) -> Option<Self> {
        match op {
            OP_INFO => Some(FrameOp::Info),
            OP_SET => Some(FrameOp::Set),
            OP_ACK => Some(FrameOp::Ack),
            OP_NACK => Some(FrameOp::Nack),
            OP_QUERY => Some(FrameOp::Query),
            OP_ANSWER => Some(FrameOp::Answer),
            _ => None,
        }
    }

    /// Wire octet for this operation
    pub fn raw(self) -> u8 {
        match self {
            FrameOp::Info => OP_INFO,
            FrameOp::Set => OP_SET,
            FrameOp::Ack => OP_ACK,
            FrameOp::Nack => OP_NACK,
            FrameOp::Query => OP_QUERY,
            FrameOp::Answer => OP_ANSWER,
        }
    }
}

impl std::fmt::Display for FrameOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameOp::Info => "INFO",
            FrameOp::Set => "SET",
            FrameOp::Ack => "ACK",
            FrameOp::Nack => "NACK",
            FrameOp::Query => "QUERY",
            FrameOp::Answer => "ANSWER",
        };
        write!(f, "{name}")
    }
}

/// Parsed, checksum-validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender address with the reply bit masked off
    pub source: u8,
    pub destination: u8,
    /// Raw operation octet; see [`Frame::operation`]
    pub op: u8,
    pub parameter_number: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Typed operation, if the octet is a known code
    pub fn operation(&self) -> Option<FrameOp> {
        FrameOp::from_raw(self.op)
    }

    /// Parse and validate a frame from a byte buffer.
    ///
    /// Leading non-SOF bytes and bytes past the declared length are treated
    /// as line noise and skipped; the declared length and the CRC are
    /// checked strictly.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        // Skip leading noise up to the start marker
        let start = bytes.iter().position(|&b| b == FRAME_SOF).unwrap_or(bytes.len());
        let frame = &bytes[start..];

        if frame.len() < MIN_FRAME_LEN {
            return Err(FrameError::Truncated {
                expected: MIN_FRAME_LEN,
                actual: frame.len(),
            });
        }

        let declared = frame[LENGTH_OFFSET] as usize;
        if declared < MIN_FRAME_LEN {
            return Err(FrameError::Truncated {
                expected: MIN_FRAME_LEN,
                actual: declared,
            });
        }
        if frame.len() < declared {
            return Err(FrameError::Truncated {
                expected: declared,
                actual: frame.len(),
            });
        }

        // Strict on the declared length; anything beyond it is trailing noise
        let frame = &frame[..declared];

        let crc_offset = declared - CRC_LEN;
        let computed = FRAME_CRC.checksum(&frame[..crc_offset]);
        let received = u16::from_be_bytes([frame[crc_offset], frame[crc_offset + 1]]);
        if computed != received {
            return Err(FrameError::ChecksumMismatch { computed, received });
        }

        let parsed = Frame {
            source: frame[SOURCE_OFFSET] & !SOURCE_REPLY_BIT,
            destination: frame[DESTINATION_OFFSET],
            op: frame[OP_OFFSET],
            parameter_number: u32::from_be_bytes([
                frame[PARAMETER_OFFSET],
                frame[PARAMETER_OFFSET + 1],
                frame[PARAMETER_OFFSET + 2],
                frame[PARAMETER_OFFSET + 3],
            ]),
            payload: frame[PAYLOAD_OFFSET..crc_offset].to_vec(),
        };

        trace!(
            "frame parsed: {:02X}->{:02X} op={:#04X} parameter={} payload={}",
            parsed.source,
            parsed.destination,
            parsed.op,
            parsed.parameter_number,
            hex::encode(&parsed.payload)
        );

        Ok(parsed)
    }

    /// Check the reply pairing: the frame must come from `destination` (the
    /// device we query) and be addressed to `source` (this engine).
    pub fn expect_reply(&self, source: u8, destination: u8) -> Result<(), FrameError> {
        if self.source != destination || self.destination != source {
            return Err(FrameError::AddressMismatch {
                reply_source: self.source,
                destination: self.destination,
            });
        }
        Ok(())
    }

    /// Check that the frame echoes the awaited parameter number
    pub fn expect_parameter(&self, expected: u32) -> Result<(), FrameError> {
        if self.parameter_number != expected {
            return Err(FrameError::UnexpectedParameter {
                expected,
                actual: self.parameter_number,
            });
        }
        Ok(())
    }
}

/// Decode a response to an outstanding request: structural validation plus
/// the address pairing and parameter echo checks.
pub fn decode_response(
    bytes: &[u8],
    source: u8,
    destination: u8,
    awaited_parameter: u32,
) -> Result<Frame, FrameError> {
    let frame = Frame::parse(bytes)?;
    frame.expect_reply(source, destination)?;
    frame.expect_parameter(awaited_parameter)?;
    Ok(frame)
}

fn encode_frame(
    op: FrameOp,
    source: u8,
    destination: u8,
    parameter_number: u32,
    payload: &[u8],
) -> Bytes {
    let total = MIN_FRAME_LEN + payload.len();
    debug_assert!(total <= MAX_FRAME_LEN);

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(FRAME_SOF);
    buf.put_u8(source | SOURCE_REPLY_BIT);
    buf.put_u8(destination);
    buf.put_u8(total as u8);
    buf.put_u8(op.raw());
    buf.put_u32(parameter_number);
    buf.put_slice(payload);

    let crc = FRAME_CRC.checksum(&buf);
    buf.put_u16(crc);

    debug!(
        "frame built: {} {:02X}->{:02X} parameter={} raw={}",
        op,
        source,
        destination,
        parameter_number,
        hex::encode(&buf)
    );

    buf.freeze()
}

/// Build a read request; queries carry no payload
pub fn encode_query(source: u8, destination: u8, parameter_number: u32) -> Bytes {
    encode_frame(FrameOp::Query, source, destination, parameter_number, &[])
}

/// Build a write request: enable byte followed by the encoded value
pub fn encode_set(
    source: u8,
    destination: u8,
    parameter_number: u32,
    enable_byte: u8,
    raw_value: &[u8],
) -> Bytes {
    let mut payload = Vec::with_capacity(1 + raw_value.len());
    payload.push(enable_byte);
    payload.extend_from_slice(raw_value);
    encode_frame(FrameOp::Set, source, destination, parameter_number, &payload)
}

/// Build a broadcast value frame; same payload shape as SET, no reply
pub fn encode_info(
    source: u8,
    destination: u8,
    parameter_number: u32,
    enable_byte: u8,
    raw_value: &[u8],
) -> Bytes {
    let mut payload = Vec::with_capacity(1 + raw_value.len());
    payload.push(enable_byte);
    payload.extend_from_slice(raw_value);
    encode_frame(FrameOp::Info, source, destination, parameter_number, &payload)
}

/// Build a value response (device side; used by tests and simulators)
pub fn encode_answer(
    source: u8,
    destination: u8,
    parameter_number: u32,
    raw_value: &[u8],
) -> Bytes {
    encode_frame(FrameOp::Answer, source, destination, parameter_number, raw_value)
}

/// Build a write acknowledgement (device side)
pub fn encode_ack(source: u8, destination: u8, parameter_number: u32) -> Bytes {
    encode_frame(FrameOp::Ack, source, destination, parameter_number, &[])
}

/// Build a write refusal (device side)
pub fn encode_nack(source: u8, destination: u8, parameter_number: u32) -> Bytes {
    encode_frame(FrameOp::Nack, source, destination, parameter_number, &[])
}

/// Incremental frame scanner over the received byte stream.
///
/// Hunts for the start marker, waits for the declared length to arrive and
/// hands complete candidate frames to [`Frame::parse`]. A length octet that
/// cannot be a real frame causes a resync at the next start marker, so a
/// corrupted header cannot wedge the stream.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received byte; returns a complete candidate frame when the
    /// declared length has arrived
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        self.buf.push(byte);
        self.scan()
    }

    /// Feed a chunk of received bytes, collecting every complete frame in it
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.scan() {
            frames.push(frame);
        }
        frames
    }

    /// Bytes currently buffered waiting for a complete frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn scan(&mut self) -> Option<Vec<u8>> {
        loop {
            // Drop noise in front of the start marker
            match self.buf.iter().position(|&b| b == FRAME_SOF) {
                Some(0) => {},
                Some(pos) => {
                    trace!("skipping {} noise bytes before frame start", pos);
                    self.buf.drain(..pos);
                },
                None => {
                    if !self.buf.is_empty() {
                        trace!("skipping {} noise bytes, no frame start", self.buf.len());
                        self.buf.clear();
                    }
                    return None;
                },
            }

            if self.buf.len() <= LENGTH_OFFSET {
                return None;
            }

            let declared = self.buf[LENGTH_OFFSET] as usize;
            if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&declared) {
                warn!("implausible frame length {}, resyncing", declared);
                // Drop this start marker and hunt for the next one
                self.buf.drain(..=SOF_OFFSET);
                continue;
            }

            if self.buf.len() < declared {
                return None;
            }

            return Some(self.buf.drain(..declared).collect());
        }
    }
}
