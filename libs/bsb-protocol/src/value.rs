//! Typed value decoding and encoding
//!
//! Converts raw payload bytes to and from logical values according to the
//! field's declared value type. Integer types are big-endian two's
//! complement; the two temperature types are fixed-point `i16` scaled by a
//! type-specific divisor.
//!
//! Scaled encoding rounds half away from zero to the nearest raw unit; a
//! scaled result outside the `i16` range is an error, never a clamp.

use serde::{Deserialize, Serialize};

use crate::constants::{ROOM_TEMPERATURE_DIVISOR, TEMPERATURE_DIVISOR};
use crate::error::{DecodeError, EncodeError};

/// Payload encoding of a field's value on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueType {
    Uint8,
    Int8,
    Int16,
    Int32,
    /// Signed 16-bit, 0.1 °C per raw unit
    Temperature,
    /// Signed 16-bit, 1/64 °C per raw unit
    RoomTemperature,
}

impl ValueType {
    /// Payload size in bytes for this type
    pub fn byte_len(self) -> usize {
        match self {
            ValueType::Uint8 | ValueType::Int8 => 1,
            ValueType::Int16 | ValueType::Temperature | ValueType::RoomTemperature => 2,
            ValueType::Int32 => 4,
        }
    }

    /// Raw units per degree for the scaled types
    fn divisor(self) -> Option<f64> {
        match self {
            ValueType::Temperature => Some(TEMPERATURE_DIVISOR),
            ValueType::RoomTemperature => Some(ROOM_TEMPERATURE_DIVISOR),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Uint8 => "UINT8",
            ValueType::Int8 => "INT8",
            ValueType::Int16 => "INT16",
            ValueType::Int32 => "INT32",
            ValueType::Temperature => "TEMPERATURE",
            ValueType::RoomTemperature => "ROOMTEMPERATURE",
        };
        write!(f, "{name}")
    }
}

/// Decoded logical value of a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
}

impl FieldValue {
    /// Numeric view regardless of variant
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Integer(v) => *v as f64,
            FieldValue::Decimal(v) => *v,
        }
    }

    /// Integer view, if this value is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Decimal(_) => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Decimal(v)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Decimal(v) => write!(f, "{v}"),
        }
    }
}

/// Decode a raw payload into a typed value
pub fn decode(value_type: ValueType, raw: &[u8]) -> Result<FieldValue, DecodeError> {
    let expected = value_type.byte_len();
    if raw.len() != expected {
        return Err(DecodeError::LengthMismatch {
            value_type,
            expected,
            actual: raw.len(),
        });
    }

    let value = match value_type {
        ValueType::Uint8 => FieldValue::Integer(raw[0] as i64),
        ValueType::Int8 => FieldValue::Integer(raw[0] as i8 as i64),
        ValueType::Int16 => FieldValue::Integer(i16::from_be_bytes([raw[0], raw[1]]) as i64),
        ValueType::Int32 => {
            FieldValue::Integer(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64)
        },
        ValueType::Temperature | ValueType::RoomTemperature => {
            let raw_units = i16::from_be_bytes([raw[0], raw[1]]) as f64;
            // divisor() is Some for both scaled types
            let divisor = value_type.divisor().unwrap_or(1.0);
            FieldValue::Decimal(raw_units / divisor)
        },
    };

    Ok(value)
}

/// Encode a typed value into the raw payload for a set operation
pub fn encode(value_type: ValueType, value: FieldValue) -> Result<Vec<u8>, EncodeError> {
    match value_type {
        ValueType::Uint8 => {
            let v = require_integer(value_type, value)?;
            check_range(value_type, v, 0, u8::MAX as i64)?;
            Ok(vec![v as u8])
        },
        ValueType::Int8 => {
            let v = require_integer(value_type, value)?;
            check_range(value_type, v, i8::MIN as i64, i8::MAX as i64)?;
            Ok(vec![v as i8 as u8])
        },
        ValueType::Int16 => {
            let v = require_integer(value_type, value)?;
            check_range(value_type, v, i16::MIN as i64, i16::MAX as i64)?;
            Ok((v as i16).to_be_bytes().to_vec())
        },
        ValueType::Int32 => {
            let v = require_integer(value_type, value)?;
            check_range(value_type, v, i32::MIN as i64, i32::MAX as i64)?;
            Ok((v as i32).to_be_bytes().to_vec())
        },
        ValueType::Temperature | ValueType::RoomTemperature => {
            let degrees = value.as_f64();
            let divisor = value_type.divisor().unwrap_or(1.0);
            // Round half away from zero to the nearest raw unit
            let scaled = (degrees * divisor).round();
            if scaled < i16::MIN as f64 || scaled > i16::MAX as f64 || !scaled.is_finite() {
                return Err(EncodeError::OutOfRange {
                    value_type,
                    value: degrees,
                });
            }
            Ok((scaled as i16).to_be_bytes().to_vec())
        },
    }
}

fn require_integer(value_type: ValueType, value: FieldValue) -> Result<i64, EncodeError> {
    value.as_i64().ok_or(EncodeError::TypeMismatch {
        value_type,
        offered: "a decimal value",
    })
}

fn check_range(value_type: ValueType, v: i64, min: i64, max: i64) -> Result<(), EncodeError> {
    if v < min || v > max {
        return Err(EncodeError::OutOfRange {
            value_type,
            value: v as f64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_uint8() {
        assert_eq!(
            decode(ValueType::Uint8, &[0xFF]).unwrap(),
            FieldValue::Integer(255)
        );
        assert_eq!(
            decode(ValueType::Uint8, &[0x00]).unwrap(),
            FieldValue::Integer(0)
        );
    }

    #[test]
    fn test_decode_int8_twos_complement() {
        assert_eq!(
            decode(ValueType::Int8, &[0x80]).unwrap(),
            FieldValue::Integer(-128)
        );
        assert_eq!(
            decode(ValueType::Int8, &[0x7F]).unwrap(),
            FieldValue::Integer(127)
        );
    }

    #[test]
    fn test_decode_int16_big_endian() {
        assert_eq!(
            decode(ValueType::Int16, &[0x00, 0x2A]).unwrap(),
            FieldValue::Integer(42)
        );
        assert_eq!(
            decode(ValueType::Int16, &[0xFF, 0xFE]).unwrap(),
            FieldValue::Integer(-2)
        );
    }

    #[test]
    fn test_decode_int32_big_endian() {
        assert_eq!(
            decode(ValueType::Int32, &[0x00, 0x01, 0x00, 0x00]).unwrap(),
            FieldValue::Integer(65536)
        );
        assert_eq!(
            decode(ValueType::Int32, &[0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            FieldValue::Integer(-1)
        );
    }

    #[test]
    fn test_decode_temperature_scaling() {
        // 215 raw units -> 21.5 °C
        assert_eq!(
            decode(ValueType::Temperature, &[0x00, 0xD7]).unwrap(),
            FieldValue::Decimal(21.5)
        );
        // -5 raw units -> -0.5 °C
        assert_eq!(
            decode(ValueType::Temperature, &[0xFF, 0xFB]).unwrap(),
            FieldValue::Decimal(-0.5)
        );
    }

    #[test]
    fn test_decode_room_temperature_scaling() {
        // 1376 raw units / 64 -> 21.5 °C
        assert_eq!(
            decode(ValueType::RoomTemperature, &[0x05, 0x60]).unwrap(),
            FieldValue::Decimal(21.5)
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let err = decode(ValueType::Int16, &[0x01]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                value_type: ValueType::Int16,
                expected: 2,
                actual: 1,
            }
        );

        assert!(decode(ValueType::Uint8, &[0x01, 0x02]).is_err());
        assert!(decode(ValueType::Int32, &[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_integer_round_trips() {
        for v in [0i64, 1, 127, 128, 255] {
            let raw = encode(ValueType::Uint8, FieldValue::Integer(v)).unwrap();
            assert_eq!(decode(ValueType::Uint8, &raw).unwrap(), FieldValue::Integer(v));
        }
        for v in [-128i64, -1, 0, 127] {
            let raw = encode(ValueType::Int8, FieldValue::Integer(v)).unwrap();
            assert_eq!(decode(ValueType::Int8, &raw).unwrap(), FieldValue::Integer(v));
        }
        for v in [i16::MIN as i64, -42, 0, 42, i16::MAX as i64] {
            let raw = encode(ValueType::Int16, FieldValue::Integer(v)).unwrap();
            assert_eq!(decode(ValueType::Int16, &raw).unwrap(), FieldValue::Integer(v));
        }
        for v in [i32::MIN as i64, -1, 0, 1, i32::MAX as i64] {
            let raw = encode(ValueType::Int32, FieldValue::Integer(v)).unwrap();
            assert_eq!(decode(ValueType::Int32, &raw).unwrap(), FieldValue::Integer(v));
        }
    }

    #[test]
    fn test_temperature_round_trip_at_resolution() {
        // Every multiple of the 0.1 °C resolution survives the round trip
        for tenths in [-405i64, -5, 0, 5, 215, 800] {
            let degrees = tenths as f64 / 10.0;
            let raw = encode(ValueType::Temperature, FieldValue::Decimal(degrees)).unwrap();
            assert_eq!(
                decode(ValueType::Temperature, &raw).unwrap(),
                FieldValue::Decimal(degrees)
            );
        }
    }

    #[test]
    fn test_room_temperature_round_trip_at_resolution() {
        for units in [-64i64, -1, 0, 1, 32, 1376] {
            let degrees = units as f64 / 64.0;
            let raw = encode(ValueType::RoomTemperature, FieldValue::Decimal(degrees)).unwrap();
            assert_eq!(
                decode(ValueType::RoomTemperature, &raw).unwrap(),
                FieldValue::Decimal(degrees)
            );
        }
    }

    #[test]
    fn test_temperature_rounding_half_away_from_zero() {
        // 21.55 °C is exactly between raw 215 and 216; half rounds away from zero
        let raw = encode(ValueType::Temperature, FieldValue::Decimal(21.55)).unwrap();
        assert_eq!(decode(ValueType::Temperature, &raw).unwrap(), FieldValue::Decimal(21.6));

        let raw = encode(ValueType::Temperature, FieldValue::Decimal(-21.55)).unwrap();
        assert_eq!(
            decode(ValueType::Temperature, &raw).unwrap(),
            FieldValue::Decimal(-21.6)
        );

        // Below half a unit rounds toward the nearer value
        let raw = encode(ValueType::Temperature, FieldValue::Decimal(21.54)).unwrap();
        assert_eq!(decode(ValueType::Temperature, &raw).unwrap(), FieldValue::Decimal(21.5));
    }

    #[test]
    fn test_temperature_accepts_integer_degrees() {
        let raw = encode(ValueType::Temperature, FieldValue::Integer(21)).unwrap();
        assert_eq!(raw, vec![0x00, 0xD2]);
    }

    #[test]
    fn test_encode_out_of_range() {
        assert!(matches!(
            encode(ValueType::Uint8, FieldValue::Integer(256)),
            Err(EncodeError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode(ValueType::Int8, FieldValue::Integer(-129)),
            Err(EncodeError::OutOfRange { .. })
        ));
        // 4000 °C scales past i16::MAX raw units
        assert!(matches!(
            encode(ValueType::Temperature, FieldValue::Decimal(4000.0)),
            Err(EncodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_encode_type_mismatch() {
        assert!(matches!(
            encode(ValueType::Int16, FieldValue::Decimal(1.5)),
            Err(EncodeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_value_type_serde_names() {
        let vt: ValueType = serde_yaml::from_str("ROOMTEMPERATURE").unwrap();
        assert_eq!(vt, ValueType::RoomTemperature);
        let vt: ValueType = serde_yaml::from_str("UINT8").unwrap();
        assert_eq!(vt, ValueType::Uint8);
    }
}
