//! Field model
//!
//! A field is one named, typed value obtainable (and sometimes settable) at
//! a bus parameter number. The kinds share identity and polling metadata and
//! differ in decode/encode behavior:
//!
//! - `Sensor`: read-only numeric value
//! - `Select`: read/write enumerated value with a code-to-label option map
//! - `Binary`: on/off flag with configurable on/off byte values
//! - `Number`: read/write numeric value, optionally broadcast-only
//!
//! Collaborator wrappers hold a [`FieldHandle`]: a shared reading slot plus
//! setter entry points that enqueue writes into the engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use bsb_protocol::value::{FieldValue, ValueType};

use crate::config::BusConfig;
use crate::error::{EngineError, Result};

/// Field kind and its kind-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// Read-only numeric value
    Sensor,

    /// Read/write enumerated value; the map is fixed at creation and used
    /// bidirectionally (code to label on read, label to code on write)
    Select {
        #[serde(default)]
        options: BTreeMap<i64, String>,
    },

    /// On/off flag; any decoded byte different from `off_value` reads as on
    Binary {
        #[serde(default = "default_on_value")]
        on_value: u8,
        #[serde(default)]
        off_value: u8,
    },

    /// Read/write numeric value. A broadcast number is never queried; its
    /// writes go out as INFO frames with no acknowledgement.
    Number {
        #[serde(default)]
        broadcast: bool,
    },
}

fn default_on_value() -> u8 {
    1
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Sensor => "sensor",
            FieldKind::Select { .. } => "select",
            FieldKind::Binary { .. } => "binary",
            FieldKind::Number { .. } => "number",
        }
    }

    /// Whether this kind accepts write requests
    pub fn is_writable(&self) -> bool {
        !matches!(self, FieldKind::Sensor)
    }
}

/// Static description of one field, supplied at configuration time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Unique id within the owning engine instance
    pub field_id: u32,

    /// Bus parameter this field reads; several fields may share one
    #[serde(default)]
    pub parameter_number: u32,

    pub value_type: ValueType,

    /// Flag octet carried in write payloads
    #[serde(default = "default_enable_byte")]
    pub enable_byte: u8,

    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Per-field override of the process-wide retry count
    #[serde(default)]
    pub retry_count: Option<u8>,

    /// Per-field override of the process-wide retry interval
    #[serde(default)]
    pub retry_interval_ms: Option<u64>,

    #[serde(flatten)]
    pub kind: FieldKind,
}

fn default_enable_byte() -> u8 {
    0x01
}

fn default_update_interval_ms() -> u64 {
    900_000
}

impl FieldDescriptor {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Configuration-time sanity checks
    pub fn validate(&self) -> Result<()> {
        if let FieldKind::Select { options } = &self.kind {
            if options.is_empty() {
                return Err(EngineError::config(format!(
                    "select field {:#010X} has no options",
                    self.field_id
                )));
            }
        }
        Ok(())
    }
}

/// Last known state of a field, shared with collaborator wrappers
#[derive(Debug, Clone, Default)]
pub struct FieldReading {
    /// Raw typed value of the most recent successful exchange
    pub value: Option<FieldValue>,

    /// Display label, for select fields
    pub label: Option<String>,

    /// On/off view, for binary fields
    pub state: Option<bool>,

    pub updated_at: Option<Instant>,
}

/// A write waiting to be encoded and dispatched
#[derive(Debug, Clone)]
pub(crate) struct WriteRequest {
    pub field_id: u32,
    pub value: FieldValue,
}

/// Engine-internal per-field state
#[derive(Debug)]
pub(crate) struct FieldState {
    pub descriptor: Arc<FieldDescriptor>,
    pub reading: Arc<RwLock<FieldReading>>,

    /// Earliest next query time; `None` means due immediately
    pub next_due: Option<Instant>,

    /// Advanced only by a successful, validated response
    pub last_update: Option<Instant>,

    /// Pending write value; cleared on ACK/NACK or broadcast transmission
    pub pending_write: Option<FieldValue>,
}

impl FieldState {
    pub fn new(descriptor: FieldDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            reading: Arc::new(RwLock::new(FieldReading::default())),
            next_due: None,
            last_update: None,
            pending_write: None,
        }
    }

    /// Broadcast numbers are write-only from the engine's point of view
    pub fn is_read_polled(&self) -> bool {
        !matches!(self.descriptor.kind, FieldKind::Number { broadcast: true })
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.is_read_polled() && self.next_due.map_or(true, |due| due <= now)
    }

    pub fn retry_count(&self, config: &BusConfig) -> u8 {
        self.descriptor.retry_count.unwrap_or(config.retry_count)
    }

    pub fn retry_interval(&self, config: &BusConfig) -> Duration {
        self.descriptor
            .retry_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.retry_interval())
    }

    /// Record a successful decode: update the shared reading, derive the
    /// kind-specific facets and schedule the next regular query.
    pub fn record_success(&mut self, now: Instant, value: FieldValue) {
        let mut reading = self.reading.write();
        reading.value = Some(value);
        reading.updated_at = Some(now);

        match &self.descriptor.kind {
            FieldKind::Select { options } => match value.as_i64().and_then(|c| options.get(&c)) {
                Some(label) => reading.label = Some(label.clone()),
                None => {
                    // Keep the previous label; the code is simply not mapped
                    warn!(
                        "select field {:#010X}: unknown option code {}",
                        self.descriptor.field_id, value
                    );
                },
            },
            FieldKind::Binary { off_value, .. } => {
                // Controllers report on as 0x01 or 0xFF, so compare against off
                reading.state = Some(value.as_i64() != Some(*off_value as i64));
            },
            FieldKind::Sensor | FieldKind::Number { .. } => {},
        }
        drop(reading);

        self.last_update = Some(now);
        self.next_due = Some(now + self.descriptor.update_interval());
    }
}

/// Handle given to sensor/select/binary wrappers at registration time.
///
/// Reading is lock-cheap and never blocks the engine; writes are queued to
/// the engine and picked up on its next scheduling tick.
#[derive(Debug, Clone)]
pub struct FieldHandle {
    descriptor: Arc<FieldDescriptor>,
    reading: Arc<RwLock<FieldReading>>,
    writes: mpsc::UnboundedSender<WriteRequest>,
}

impl FieldHandle {
    pub(crate) fn new(
        descriptor: Arc<FieldDescriptor>,
        reading: Arc<RwLock<FieldReading>>,
        writes: mpsc::UnboundedSender<WriteRequest>,
    ) -> Self {
        Self {
            descriptor,
            reading,
            writes,
        }
    }

    pub fn field_id(&self) -> u32 {
        self.descriptor.field_id
    }

    pub fn parameter_number(&self) -> u32 {
        self.descriptor.parameter_number
    }

    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// Last successfully decoded value, if any
    pub fn current_value(&self) -> Option<FieldValue> {
        self.reading.read().value
    }

    /// Display label for select fields
    pub fn current_label(&self) -> Option<String> {
        self.reading.read().label.clone()
    }

    /// On/off view for binary fields
    pub fn current_state(&self) -> Option<bool> {
        self.reading.read().state
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.reading.read().updated_at
    }

    /// Queue a raw typed value write
    pub fn set_value(&self, value: FieldValue) -> Result<()> {
        if !self.descriptor.kind.is_writable() {
            return Err(EngineError::NotWritable(self.descriptor.field_id));
        }
        // Validate against the value type now so the caller gets the error
        bsb_protocol::value::encode(self.descriptor.value_type, value)?;
        self.send(value)
    }

    /// Queue a select write by display label
    pub fn set_option(&self, label: &str) -> Result<()> {
        let FieldKind::Select { options } = &self.descriptor.kind else {
            return Err(EngineError::NotWritable(self.descriptor.field_id));
        };
        let code = options
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(c, _)| *c)
            .ok_or_else(|| EngineError::UnknownOption {
                field_id: self.descriptor.field_id,
                option: label.to_string(),
            })?;
        self.send(FieldValue::Integer(code))
    }

    /// Queue a binary write mapped through the configured on/off values
    pub fn set_state(&self, on: bool) -> Result<()> {
        let FieldKind::Binary {
            on_value,
            off_value,
        } = &self.descriptor.kind
        else {
            return Err(EngineError::NotWritable(self.descriptor.field_id));
        };
        let raw = if on { *on_value } else { *off_value };
        self.send(FieldValue::Integer(raw as i64))
    }

    fn send(&self, value: FieldValue) -> Result<()> {
        self.writes
            .send(WriteRequest {
                field_id: self.descriptor.field_id,
                value,
            })
            .map_err(|_| EngineError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor_descriptor(field_id: u32) -> FieldDescriptor {
        FieldDescriptor {
            field_id,
            parameter_number: 100,
            value_type: ValueType::Int16,
            enable_byte: 0x01,
            update_interval_ms: 900_000,
            retry_count: None,
            retry_interval_ms: None,
            kind: FieldKind::Sensor,
        }
    }

    #[test]
    fn test_descriptor_yaml_shapes() {
        let yaml = r#"
field_id: 0x0D3D0215
parameter_number: 8740
value_type: ROOMTEMPERATURE
kind: sensor
"#;
        let descriptor: FieldDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(descriptor.field_id, 0x0D3D0215);
        assert_eq!(descriptor.value_type, ValueType::RoomTemperature);
        assert_eq!(descriptor.enable_byte, 0x01);
        assert_eq!(descriptor.update_interval(), Duration::from_secs(900));
        assert!(matches!(descriptor.kind, FieldKind::Sensor));

        let yaml = r#"
field_id: 2
value_type: INT8
kind: select
options:
  0: "Off"
  1: "Automatic"
"#;
        let descriptor: FieldDescriptor = serde_yaml::from_str(yaml).unwrap();
        let FieldKind::Select { options } = &descriptor.kind else {
            panic!("expected select kind");
        };
        assert_eq!(options.get(&1).map(String::as_str), Some("Automatic"));
    }

    #[test]
    fn test_select_requires_options() {
        let descriptor = FieldDescriptor {
            kind: FieldKind::Select {
                options: BTreeMap::new(),
            },
            ..sensor_descriptor(1)
        };
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_record_success_sensor() {
        let mut state = FieldState::new(sensor_descriptor(1));
        let now = Instant::now();

        state.record_success(now, FieldValue::Integer(42));
        assert_eq!(state.reading.read().value, Some(FieldValue::Integer(42)));
        assert_eq!(state.last_update, Some(now));
        assert_eq!(state.next_due, Some(now + Duration::from_secs(900)));
    }

    #[test]
    fn test_record_success_select_maps_label() {
        let mut options = BTreeMap::new();
        options.insert(0, "Off".to_string());
        options.insert(1, "Automatic".to_string());
        let mut state = FieldState::new(FieldDescriptor {
            kind: FieldKind::Select { options },
            value_type: ValueType::Int8,
            ..sensor_descriptor(2)
        });

        let now = Instant::now();
        state.record_success(now, FieldValue::Integer(1));
        assert_eq!(state.reading.read().label.as_deref(), Some("Automatic"));

        // Unknown code keeps the previous label
        state.record_success(now, FieldValue::Integer(9));
        assert_eq!(state.reading.read().label.as_deref(), Some("Automatic"));
    }

    #[test]
    fn test_record_success_binary_thresholds() {
        let mut state = FieldState::new(FieldDescriptor {
            kind: FieldKind::Binary {
                on_value: 0x01,
                off_value: 0x00,
            },
            value_type: ValueType::Uint8,
            ..sensor_descriptor(3)
        });

        let now = Instant::now();
        state.record_success(now, FieldValue::Integer(0xFF));
        assert_eq!(state.reading.read().state, Some(true));

        state.record_success(now, FieldValue::Integer(0));
        assert_eq!(state.reading.read().state, Some(false));
    }

    #[test]
    fn test_broadcast_number_not_read_polled() {
        let state = FieldState::new(FieldDescriptor {
            kind: FieldKind::Number { broadcast: true },
            ..sensor_descriptor(4)
        });
        assert!(!state.is_read_polled());
        assert!(!state.is_due(Instant::now()));

        let state = FieldState::new(FieldDescriptor {
            kind: FieldKind::Number { broadcast: false },
            ..sensor_descriptor(5)
        });
        assert!(state.is_due(Instant::now()));
    }

    #[test]
    fn test_handle_rejects_bad_writes() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let state = FieldState::new(sensor_descriptor(1));
        let handle = FieldHandle::new(state.descriptor.clone(), state.reading.clone(), tx);

        assert!(matches!(
            handle.set_value(FieldValue::Integer(1)),
            Err(EngineError::NotWritable(1))
        ));
        assert!(matches!(
            handle.set_option("Automatic"),
            Err(EngineError::NotWritable(1))
        ));
    }

    #[test]
    fn test_handle_select_option_lookup() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut options = BTreeMap::new();
        options.insert(2, "Comfort".to_string());
        let state = FieldState::new(FieldDescriptor {
            kind: FieldKind::Select { options },
            value_type: ValueType::Int8,
            ..sensor_descriptor(7)
        });
        let handle = FieldHandle::new(state.descriptor.clone(), state.reading.clone(), tx);

        handle.set_option("Comfort").unwrap();
        let request = rx.try_recv().unwrap();
        assert_eq!(request.field_id, 7);
        assert_eq!(request.value, FieldValue::Integer(2));

        assert!(matches!(
            handle.set_option("Party"),
            Err(EngineError::UnknownOption { .. })
        ));
    }
}
