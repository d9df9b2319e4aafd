//! Bus transport
//!
//! The serial line is the single shared resource; the service owns exactly
//! one transport and only the engine's dispatch path produces bytes for it.
//! The physical BSB line carries every byte inverted, so the serial
//! implementation XORs with 0xFF in both directions and the rest of the
//! stack only ever sees logical bytes.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, error, info};

use crate::config::SerialConfig;
use crate::error::{EngineError, Result};

/// Apply the BSB line coding in place; the operation is its own inverse
fn invert(bytes: &mut [u8]) {
    for b in bytes {
        *b ^= 0xFF;
    }
}

/// Byte-level access to the bus
#[async_trait]
pub trait BusTransport: Send {
    /// Transmit one logical frame
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive whatever logical bytes are available, up to `buf.len()`.
    /// Implementations must be cancellation-safe; the service polls this
    /// inside a `select!`.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Serial port transport with BSB line coding
#[derive(Debug)]
pub struct SerialTransport {
    port: SerialStream,
    path: String,
}

impl SerialTransport {
    /// Open the port at the bus's fixed line parameters (4800 8O1)
    pub async fn open(config: &SerialConfig) -> Result<Self> {
        config.validate()?;
        debug!("opening serial port {} @{}baud", config.port, config.baud_rate);

        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::Odd)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| {
                error!("serial open failed: {} - {}", config.port, e);
                EngineError::transport(format!("failed to open serial port {}: {e}", config.port))
            })?;

        info!("serial port opened: {}", config.port);
        Ok(Self {
            port,
            path: config.port.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl BusTransport for SerialTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        // Line coding: the bus drives every octet inverted
        let mut inverted = frame.to_vec();
        invert(&mut inverted);

        self.port.write_all(&inverted).await.map_err(|e| {
            error!("serial TX: {}", e);
            EngineError::transport(format!("serial send error: {e}"))
        })?;
        self.port.flush().await.map_err(|e| {
            error!("serial flush: {}", e);
            EngineError::transport(format!("serial flush error: {e}"))
        })?;

        debug!("serial TX: {}B {}", frame.len(), hex::encode(frame));
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.port.read(buf).await.map_err(|e| {
            error!("serial RX: {}", e);
            EngineError::transport(format!("serial read error: {e}"))
        })?;

        invert(&mut buf[..n]);

        if n > 0 {
            debug!("serial RX: {}B {}", n, hex::encode(&buf[..n]));
        }
        Ok(n)
    }
}
