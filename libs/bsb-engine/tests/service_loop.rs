//! Service loop smoke tests
//!
//! Runs the tokio service against an in-memory transport standing in for
//! the serial port: queries must appear on the line, replies must land in
//! the field handles, and shutdown must wind the task down.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use bsb_engine::config::BusConfig;
use bsb_engine::engine::BsbEngine;
use bsb_engine::error::{EngineError, Result};
use bsb_engine::field::{FieldDescriptor, FieldKind};
use bsb_engine::service::BsbService;
use bsb_engine::transport::BusTransport;
use bsb_engine::{FieldValue, ValueType};
use bsb_protocol::frame::{encode_answer, Frame, FrameOp};

const ENGINE_ADDR: u8 = 66;
const DEVICE_ADDR: u8 = 0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Channel-backed stand-in for the serial line
struct MockTransport {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl BusTransport for MockTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.outbound
            .send(frame.to_vec())
            .await
            .map_err(|_| EngineError::transport("mock line closed"))
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.inbound.recv().await {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            },
            // Keep the "port" open even if the test dropped its sender
            None => std::future::pending().await,
        }
    }
}

fn fast_config() -> BusConfig {
    BusConfig {
        query_interval_ms: 10,
        retry_interval_ms: 100,
        retry_count: 1,
        ..BusConfig::default()
    }
}

fn test_sensor() -> FieldDescriptor {
    FieldDescriptor {
        field_id: 10,
        parameter_number: 100,
        value_type: ValueType::Int16,
        enable_byte: 0x01,
        update_interval_ms: 60_000,
        retry_count: None,
        retry_interval_ms: None,
        kind: FieldKind::Sensor,
    }
}

#[tokio::test]
async fn service_polls_and_applies_responses() {
    init_tracing();

    let (device_tx, inbound) = mpsc::channel(16);
    let (outbound, mut line_rx) = mpsc::channel(16);

    let mut engine = BsbEngine::new(fast_config());
    let handle = engine.register_field(test_sensor()).unwrap();

    let service = BsbService::spawn(
        engine,
        MockTransport {
            inbound,
            outbound,
        },
    );

    // The scheduler must put a query on the line
    let query = timeout(Duration::from_secs(1), line_rx.recv())
        .await
        .expect("no query within a second")
        .expect("line closed");
    let query = Frame::parse(&query).unwrap();
    assert_eq!(query.operation(), Some(FrameOp::Query));
    assert_eq!(query.parameter_number, 100);
    assert_eq!(query.source, ENGINE_ADDR);

    // Play the controller and answer
    let reply = encode_answer(DEVICE_ADDR, ENGINE_ADDR, 100, &[0x00, 0x2A]).to_vec();
    device_tx.send(reply).await.unwrap();

    // The handle converges on the decoded value
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        if handle.current_value() == Some(FieldValue::Integer(42)) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "value never reached the handle"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    service.stop().await;
}

#[tokio::test]
async fn service_retries_when_the_line_stays_silent() {
    init_tracing();

    let (_device_tx, inbound) = mpsc::channel::<Vec<u8>>(16);
    let (outbound, mut line_rx) = mpsc::channel(16);

    let mut engine = BsbEngine::new(fast_config());
    engine.register_field(test_sensor()).unwrap();

    let service = BsbService::spawn(
        engine,
        MockTransport {
            inbound,
            outbound,
        },
    );

    // Initial attempt plus at least one retry after the 100 ms window
    let first = timeout(Duration::from_secs(1), line_rx.recv())
        .await
        .expect("no initial query")
        .expect("line closed");
    let second = timeout(Duration::from_secs(1), line_rx.recv())
        .await
        .expect("no retry")
        .expect("line closed");

    assert_eq!(first, second, "a retry resends the same frame");

    service.stop().await;
}
