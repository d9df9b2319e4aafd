//! BSB Field Engine
//!
//! Polls a heating controller over a half-duplex BSB serial link, decodes
//! typed values and exposes them as named fields with bounded retry and
//! timeout behavior.
//!
//! # Architecture
//!
//! ```text
//! bsb-engine
//!     ├── engine (tick-driven core: scheduling + exchange supervision)
//!     ├── registry (field set, due selection, result recording)
//!     ├── exchange (single in-flight request, attempt accounting)
//!     ├── field (descriptors, kinds, wrapper-facing handles)
//!     ├── signal (timeout / cycle-complete / update triggers)
//!     ├── config (bus addressing, retry policy, declaration loader)
//!     ├── transport (serial port with BSB line coding)
//!     └── service (tokio loop wiring transport and engine)
//! ```
//!
//! The core is synchronous and clock-injected; only the service layer is
//! async. At most one request is in flight at any instant, and among due
//! fields the lowest field id always goes first.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use bsb_engine::{BsbEngine, BsbService, SerialTransport, ValueType};
//! use bsb_engine::config::{BusConfig, SerialConfig};
//! use bsb_engine::field::{FieldDescriptor, FieldKind};
//!
//! #[tokio::main]
//! async fn main() -> bsb_engine::Result<()> {
//!     let mut engine = BsbEngine::new(BusConfig::default());
//!
//!     let outside_temperature = engine.register_field(FieldDescriptor {
//!         field_id: 1,
//!         parameter_number: 8700,
//!         value_type: ValueType::Temperature,
//!         enable_byte: 0x01,
//!         update_interval_ms: 60_000,
//!         retry_count: None,
//!         retry_interval_ms: None,
//!         kind: FieldKind::Sensor,
//!     })?;
//!
//!     let serial = SerialConfig { port: "/dev/ttyUSB0".into(), baud_rate: 4800 };
//!     let transport = SerialTransport::open(&serial).await?;
//!     let service = BsbService::spawn(engine, transport);
//!
//!     // ... outside_temperature.current_value() reflects the bus ...
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
mod exchange;
pub mod field;
mod registry;
pub mod service;
mod signal;
pub mod transport;

// Re-export the working set
pub use config::{load_declaration, BusConfig, BusDeclaration, SerialConfig};
pub use engine::BsbEngine;
pub use error::{EngineError, Result};
pub use field::{FieldDescriptor, FieldHandle, FieldKind, FieldReading};
pub use service::{BsbService, ServiceHandle};
pub use transport::{BusTransport, SerialTransport};

// Protocol-level types collaborators commonly need
pub use bsb_protocol::value::{FieldValue, ValueType};
