//! Engine configuration
//!
//! Process-wide bus addressing and retry policy, serial port parameters and
//! the YAML declaration loader. Durations are carried as millisecond fields
//! so a declaration file stays plain numbers; accessors expose `Duration`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::field::FieldDescriptor;

/// Re-read delay after a successful write acknowledgement
pub const GET_AFTER_SET_INTERVAL: Duration = Duration::from_secs(1);

/// Bus addressing and process-wide retry defaults.
///
/// Passed by reference into the scheduler and supervisor at construction;
/// per-field descriptors may override the retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// This engine's bus address
    #[serde(default = "default_source_address")]
    pub source_address: u8,

    /// Address of the queried controller
    #[serde(default = "default_destination_address")]
    pub destination_address: u8,

    /// Minimum spacing between any two requests on the bus
    #[serde(default = "default_query_interval_ms")]
    pub query_interval_ms: u64,

    /// Per-attempt response window, and the resend delay it implies
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Retries after the initial attempt (attempts = retry_count + 1)
    #[serde(default = "default_retry_count")]
    pub retry_count: u8,
}

fn default_source_address() -> u8 {
    66
}

fn default_destination_address() -> u8 {
    0
}

fn default_query_interval_ms() -> u64 {
    250
}

fn default_retry_interval_ms() -> u64 {
    15_000
}

fn default_retry_count() -> u8 {
    3
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            source_address: default_source_address(),
            destination_address: default_destination_address(),
            query_interval_ms: default_query_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_count: default_retry_count(),
        }
    }
}

impl BusConfig {
    pub fn query_interval(&self) -> Duration {
        Duration::from_millis(self.query_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Serial line parameters.
///
/// The controller talks 4800 baud, 8 data bits, odd parity, one stop bit;
/// only the port path normally needs configuring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    4800
}

impl SerialConfig {
    /// The bus runs at a fixed rate; reject anything else early
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate != 4800 {
            return Err(EngineError::config(format!(
                "non-standard baud rate {}, the bus runs at 4800",
                self.baud_rate
            )));
        }
        Ok(())
    }
}

/// A full bus declaration: addressing, serial line and field set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusDeclaration {
    #[serde(default)]
    pub bus: BusConfig,

    pub serial: Option<SerialConfig>,

    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

/// Load a YAML bus declaration from disk
pub fn load_declaration(path: &Path) -> Result<BusDeclaration> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::config(format!("cannot read {}: {e}", path.display())))?;
    let declaration: BusDeclaration = serde_yaml::from_str(&raw)?;

    if let Some(serial) = &declaration.serial {
        serial.validate()?;
    }

    Ok(declaration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bus_config_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.source_address, 66);
        assert_eq!(config.destination_address, 0);
        assert_eq!(config.query_interval(), Duration::from_millis(250));
        assert_eq!(config.retry_interval(), Duration::from_secs(15));
        assert_eq!(config.retry_count, 3);
    }

    #[test]
    fn test_bus_config_partial_yaml() {
        let config: BusConfig = serde_yaml::from_str("retry_count: 5").unwrap();
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.source_address, 66);
    }

    #[test]
    fn test_serial_config_rejects_foreign_baud_rate() {
        let serial = SerialConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        };
        assert!(serial.validate().is_err());

        let serial = SerialConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 4800,
        };
        assert!(serial.validate().is_ok());
    }

    #[test]
    fn test_load_declaration() {
        let yaml = r#"
bus:
  destination_address: 0
  retry_count: 2
serial:
  port: /dev/ttyUSB0
fields:
  - field_id: 10
    parameter_number: 100
    value_type: INT16
    kind: sensor
    update_interval_ms: 900000
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let declaration = load_declaration(file.path()).unwrap();
        assert_eq!(declaration.bus.retry_count, 2);
        assert_eq!(declaration.fields.len(), 1);
        assert_eq!(declaration.fields[0].field_id, 10);
    }
}
