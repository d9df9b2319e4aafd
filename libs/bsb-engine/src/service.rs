//! Async serial service
//!
//! Owns the engine and the transport, and runs the cooperative loop: a
//! periodic scheduling tick, the serial receive pump and a shutdown watch.
//! Registration and signal subscriptions happen on the engine before the
//! service is spawned; afterwards collaborators interact through their
//! [`crate::field::FieldHandle`]s.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::engine::BsbEngine;
use crate::transport::BusTransport;

/// Receive buffer size; frames are tiny, this covers a burst of them
const RX_BUFFER_SIZE: usize = 256;

/// Pause after a transport-level receive error before polling again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Handle to a running bus service
#[derive(Debug)]
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Signal the loop to stop and wait for it to wind down
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.task.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => info!("bus service stopped"),
                Ok(Err(e)) => warn!("bus service task error: {e}"),
                Err(_) => warn!("bus service stop timeout, forcing"),
            }
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.task.take() {
            if !handle.is_finished() {
                warn!("bus service dropped with running task, aborting");
                handle.abort();
            }
        }
    }
}

/// Bus service entry point
pub struct BsbService;

impl BsbService {
    /// Spawn the polling loop on the current runtime
    pub fn spawn<T: BusTransport + 'static>(engine: BsbEngine, transport: T) -> ServiceHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Self::run(engine, transport, shutdown_rx));
        ServiceHandle {
            shutdown_tx,
            task: Some(task),
        }
    }

    async fn run<T: BusTransport>(
        mut engine: BsbEngine,
        mut transport: T,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        engine.log_startup_summary();

        // The scheduler gates dispatch by query spacing itself; ticking at
        // that same rate keeps timeout checks timely without busy-looping
        let mut ticker = tokio::time::interval(engine.config().query_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut rx_buf = [0u8; RX_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("stopping bus service");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Some(frame) = engine.tick(Instant::now()) {
                        Self::transmit(&mut transport, &frame).await;
                    }
                }

                received = transport.recv(&mut rx_buf) => {
                    match received {
                        Ok(0) => {
                            // A serial stream yielding 0 bytes is gone
                            error!("bus transport closed");
                            break;
                        },
                        Ok(n) => {
                            if let Some(frame) = engine.handle_bytes(Instant::now(), &rx_buf[..n]) {
                                Self::transmit(&mut transport, &frame).await;
                            }
                        },
                        Err(e) => {
                            error!("bus receive error: {e}");
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        },
                    }
                }
            }
        }
    }

    async fn transmit<T: BusTransport>(transport: &mut T, frame: &[u8]) {
        if let Err(e) = transport.send(frame).await {
            // A lost transmission is just a timed-out attempt; the
            // supervisor will retry it
            error!("bus transmit error: {e}");
        }
    }
}
