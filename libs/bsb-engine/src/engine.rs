//! Polling engine core
//!
//! A synchronous state machine advanced by two inputs: scheduler ticks and
//! received bytes. Each call may yield at most one outbound frame, since
//! the bus is half-duplex and only one exchange is ever in flight. All timing is
//! injected as `Instant`s, so the engine is deterministic under test and
//! indifferent to tick jitter; a late tick merely extends the effective
//! timeout.
//!
//! Dispatch order on a tick: pending writes first, then due reads, lowest
//! field id first in both groups. When a pass finds nothing to do right
//! after an exchange resolved, the wait-next-readout signal fires once.

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bsb_protocol::frame::{self, Frame, FrameAccumulator, FrameOp};
use bsb_protocol::value::{self, FieldValue};

use crate::config::{BusConfig, GET_AFTER_SET_INTERVAL};
use crate::error::{EngineError, Result};
use crate::exchange::{AttemptVerdict, Exchange, ExchangeKind, ExchangeSupervisor};
use crate::field::{FieldDescriptor, FieldHandle, FieldKind, WriteRequest};
use crate::registry::FieldRegistry;
use crate::signal::Signals;

/// BSB polling engine.
///
/// Owns the field registry, the poll scheduling state and the exchange
/// supervisor. The async service wrapper feeds it; collaborators interact
/// through [`FieldHandle`]s and signal subscriptions set up before the
/// service starts.
#[derive(Debug)]
pub struct BsbEngine {
    config: BusConfig,
    registry: FieldRegistry,
    supervisor: ExchangeSupervisor,
    signals: Signals,
    accumulator: FrameAccumulator,

    write_tx: mpsc::UnboundedSender<WriteRequest>,
    write_rx: mpsc::UnboundedReceiver<WriteRequest>,

    /// Time of the most recent transmission, for query spacing
    last_dispatch: Option<Instant>,

    /// True from the first dispatch of a cycle until the completion signal
    cycle_active: bool,
}

impl BsbEngine {
    pub fn new(config: BusConfig) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry: FieldRegistry::new(),
            supervisor: ExchangeSupervisor::new(),
            signals: Signals::new(),
            accumulator: FrameAccumulator::new(),
            write_tx,
            write_rx,
            last_dispatch: None,
            cycle_active: false,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn field_count(&self) -> usize {
        self.registry.len()
    }

    /// Build an engine from a loaded declaration, registering every field
    pub fn from_declaration(declaration: &crate::config::BusDeclaration) -> Result<(Self, Vec<FieldHandle>)> {
        let mut engine = Self::new(declaration.bus.clone());
        let mut handles = Vec::with_capacity(declaration.fields.len());
        for descriptor in &declaration.fields {
            handles.push(engine.register_field(descriptor.clone())?);
        }
        Ok((engine, handles))
    }

    /// Register a field and hand back the wrapper-facing handle
    pub fn register_field(&mut self, descriptor: FieldDescriptor) -> Result<FieldHandle> {
        let state = self.registry.register(descriptor)?;
        Ok(FieldHandle::new(
            state.descriptor.clone(),
            state.reading.clone(),
            self.write_tx.clone(),
        ))
    }

    /// Handle for an already registered field
    pub fn field_handle(&self, field_id: u32) -> Option<FieldHandle> {
        self.registry.get(field_id).map(|state| {
            FieldHandle::new(
                state.descriptor.clone(),
                state.reading.clone(),
                self.write_tx.clone(),
            )
        })
    }

    /// Subscribe to exhausted-retry events
    pub fn subscribe_timeout(&mut self, handler: impl FnMut(u32) + Send + 'static) {
        self.signals.subscribe_timeout(handler);
    }

    /// Subscribe to poll-cycle-complete events
    pub fn subscribe_cycle_complete(&mut self, handler: impl FnMut() + Send + 'static) {
        self.signals.subscribe_cycle_complete(handler);
    }

    /// Subscribe to successful value updates
    pub fn subscribe_update(&mut self, handler: impl FnMut(u32, &FieldValue) + Send + 'static) {
        self.signals.subscribe_update(handler);
    }

    /// Field ids whose polling interval has elapsed, ascending
    pub fn all_due(&self, now: Instant) -> Vec<u32> {
        self.registry
            .all_due(now)
            .map(|f| f.descriptor.field_id)
            .collect()
    }

    /// Queue a write for a writable field. The value is validated against
    /// the field's value type immediately; transmission happens on a later
    /// tick under the usual exchange rules.
    pub fn request_set(&mut self, field_id: u32, value: FieldValue) -> Result<()> {
        let field = self
            .registry
            .get_mut(field_id)
            .ok_or(EngineError::UnknownField(field_id))?;

        if !field.descriptor.kind.is_writable() {
            return Err(EngineError::NotWritable(field_id));
        }
        value::encode(field.descriptor.value_type, value)?;

        field.pending_write = Some(value);
        debug!("write queued: field {:#010X} value {}", field_id, value);
        Ok(())
    }

    /// Advance the engine by one scheduling tick; returns at most one frame
    /// to transmit.
    pub fn tick(&mut self, now: Instant) -> Option<Bytes> {
        self.drain_write_requests();

        if let Some(verdict) = self.supervisor.check_timeout(now) {
            match verdict {
                AttemptVerdict::Resend(frame) => {
                    self.last_dispatch = Some(now);
                    return Some(frame);
                },
                AttemptVerdict::Exhausted { field_id } => {
                    self.registry.record_failure(field_id);
                    self.signals.emit_timeout(field_id);
                },
            }
        }

        if self.supervisor.in_flight() {
            return None;
        }

        // Minimum spacing between any two requests on the bus
        if let Some(last) = self.last_dispatch {
            if now.duration_since(last) < self.config.query_interval() {
                return None;
            }
        }

        self.select_and_dispatch(now)
    }

    /// Feed received bytes. May return a frame to transmit when a bad
    /// response consumes an attempt and the retry budget allows a resend.
    pub fn handle_bytes(&mut self, now: Instant, bytes: &[u8]) -> Option<Bytes> {
        let mut resend = None;

        for raw in self.accumulator.extend(bytes) {
            match Frame::parse(&raw) {
                Ok(frame) => {
                    if let Some(out) = self.process_frame(now, frame) {
                        resend = Some(out);
                    }
                },
                Err(e) => {
                    if self.supervisor.in_flight() {
                        warn!("invalid frame while awaiting response: {e}");
                        if let Some(out) = self.fail_attempt(now) {
                            resend = Some(out);
                        }
                    } else {
                        debug!("ignoring invalid frame: {e}");
                    }
                },
            }
        }

        // A later frame may have resolved the exchange the resend belonged to
        if !self.supervisor.in_flight() {
            resend = None;
        }
        resend
    }

    /// Log the effective configuration, the way a component dumps its setup
    /// once at startup
    pub fn log_startup_summary(&self) {
        info!("BSB engine:");
        info!("  source address: {:#04X}", self.config.source_address);
        info!(
            "  destination address: {:#04X}",
            self.config.destination_address
        );
        info!("  query interval: {:?}", self.config.query_interval());
        info!("  retry interval: {:?}", self.config.retry_interval());
        info!("  retry count: {}", self.config.retry_count);
        for field in self.registry.iter() {
            let d = &field.descriptor;
            info!(
                "  - {} field {:#010X}: parameter {}, {}, every {:?}",
                d.kind.name(),
                d.field_id,
                d.parameter_number,
                d.value_type,
                d.update_interval()
            );
        }
    }

    fn drain_write_requests(&mut self) {
        while let Ok(request) = self.write_rx.try_recv() {
            if let Err(e) = self.request_set(request.field_id, request.value) {
                warn!("dropping queued write: {e}");
            }
        }
    }

    fn select_and_dispatch(&mut self, now: Instant) -> Option<Bytes> {
        if let Some(field_id) = self.registry.next_pending_write() {
            return self.dispatch_set(now, field_id);
        }
        if let Some(field_id) = self.registry.next_due_read(now) {
            return self.dispatch_query(now, field_id);
        }

        // Nothing due right after the last exchange of a pass: cycle boundary
        if self.cycle_active {
            self.cycle_active = false;
            debug!("poll cycle complete, waiting for next readout");
            self.signals.emit_cycle_complete();
        }
        None
    }

    fn dispatch_query(&mut self, now: Instant, field_id: u32) -> Option<Bytes> {
        let field = self.registry.get(field_id)?;
        let parameter = field.descriptor.parameter_number;
        let retry_count = field.retry_count(&self.config);
        let timeout = field.retry_interval(&self.config);

        let frame = frame::encode_query(
            self.config.source_address,
            self.config.destination_address,
            parameter,
        );

        let out = self.supervisor.begin(Exchange::new(
            field_id,
            parameter,
            ExchangeKind::Query,
            retry_count,
            timeout,
            now,
            frame,
        ));
        self.last_dispatch = Some(now);
        self.cycle_active = true;
        Some(out)
    }

    fn dispatch_set(&mut self, now: Instant, field_id: u32) -> Option<Bytes> {
        let field = self.registry.get_mut(field_id)?;
        let value = field.pending_write?;
        let descriptor = field.descriptor.clone();

        let raw = match value::encode(descriptor.value_type, value) {
            Ok(raw) => raw,
            Err(e) => {
                // Validated at request time; a failure here is a defect
                warn!("dropping unencodable write for field {:#010X}: {e}", field_id);
                field.pending_write = None;
                return None;
            },
        };

        let broadcast = matches!(descriptor.kind, FieldKind::Number { broadcast: true });
        if broadcast {
            // Fire-and-forget: no acknowledgement will come, the write
            // resolves immediately and the reading reflects what was sent
            let out = frame::encode_info(
                self.config.source_address,
                self.config.destination_address,
                descriptor.parameter_number,
                descriptor.enable_byte,
                &raw,
            );
            field.pending_write = None;
            field.record_success(now, value);
            self.signals.emit_update(field_id, &value);
            self.last_dispatch = Some(now);
            self.cycle_active = true;
            return Some(out);
        }

        let retry_count = field.retry_count(&self.config);
        let timeout = field.retry_interval(&self.config);
        let frame = frame::encode_set(
            self.config.source_address,
            self.config.destination_address,
            descriptor.parameter_number,
            descriptor.enable_byte,
            &raw,
        );

        let out = self.supervisor.begin(Exchange::new(
            field_id,
            descriptor.parameter_number,
            ExchangeKind::Set,
            retry_count,
            timeout,
            now,
            frame,
        ));
        self.last_dispatch = Some(now);
        self.cycle_active = true;
        Some(out)
    }

    fn process_frame(&mut self, now: Instant, frame: Frame) -> Option<Bytes> {
        match frame.operation() {
            Some(FrameOp::Answer) => self.on_answer(now, frame),
            Some(FrameOp::Ack) => self.on_write_reply(now, frame, true),
            Some(FrameOp::Nack) => self.on_write_reply(now, frame, false),
            Some(FrameOp::Info) => {
                self.on_info(now, &frame);
                None
            },
            Some(op) => {
                debug!("ignoring {op} frame for parameter {}", frame.parameter_number);
                None
            },
            None => {
                debug!("ignoring frame with unknown operation {:#04X}", frame.op);
                None
            },
        }
    }

    fn on_answer(&mut self, now: Instant, frame: Frame) -> Option<Bytes> {
        let Some(exchange) = self.supervisor.active() else {
            debug!(
                "unsolicited answer for parameter {} ignored",
                frame.parameter_number
            );
            return None;
        };
        if exchange.kind != ExchangeKind::Query {
            debug!("answer while awaiting a write acknowledgement");
            return self.fail_attempt(now);
        }

        let field_id = exchange.field_id;
        let awaited = exchange.parameter_number;

        if let Err(e) = frame
            .expect_reply(self.config.source_address, self.config.destination_address)
            .and_then(|()| frame.expect_parameter(awaited))
        {
            warn!("response rejected: {e}");
            return self.fail_attempt(now);
        }

        let value_type = self.registry.get(field_id)?.descriptor.value_type;
        match value::decode(value_type, &frame.payload) {
            Ok(value) => {
                self.supervisor.resolve();
                self.registry.record_success(field_id, now, value);
                debug!("field {:#010X} updated to {}", field_id, value);
                self.signals.emit_update(field_id, &value);
                None
            },
            Err(e) => {
                warn!("response payload rejected: {e}");
                self.fail_attempt(now)
            },
        }
    }

    fn on_write_reply(&mut self, now: Instant, frame: Frame, accepted: bool) -> Option<Bytes> {
        let Some(exchange) = self.supervisor.active() else {
            debug!(
                "unsolicited write reply for parameter {} ignored",
                frame.parameter_number
            );
            return None;
        };
        if exchange.kind != ExchangeKind::Set {
            debug!("write reply while awaiting an answer");
            return self.fail_attempt(now);
        }

        let field_id = exchange.field_id;
        let awaited = exchange.parameter_number;

        if let Err(e) = frame
            .expect_reply(self.config.source_address, self.config.destination_address)
            .and_then(|()| frame.expect_parameter(awaited))
        {
            warn!("write reply rejected: {e}");
            return self.fail_attempt(now);
        }

        self.supervisor.resolve();
        if let Some(field) = self.registry.get_mut(field_id) {
            field.pending_write = None;
            if accepted {
                // Re-read the parameter promptly instead of waiting a full
                // update interval
                field.next_due = Some(now + GET_AFTER_SET_INTERVAL);
                debug!("write acknowledged for field {:#010X}", field_id);
            } else {
                warn!("write refused (NACK) for field {:#010X}", field_id);
            }
        }
        None
    }

    /// Unsolicited or broadcast value frames update every field reading the
    /// parameter without touching any in-flight exchange
    fn on_info(&mut self, now: Instant, frame: &Frame) {
        let targets = self.registry.fields_for_parameter(frame.parameter_number);
        if targets.is_empty() {
            debug!(
                "info frame for unregistered parameter {} ignored",
                frame.parameter_number
            );
            return;
        }

        for field_id in targets {
            let Some(field) = self.registry.get(field_id) else {
                continue;
            };
            let value_type = field.descriptor.value_type;

            // Info payloads may carry a leading flag octet before the value
            let expected = value_type.byte_len();
            let raw = if frame.payload.len() == expected + 1 {
                &frame.payload[1..]
            } else {
                &frame.payload[..]
            };

            match value::decode(value_type, raw) {
                Ok(value) => {
                    self.registry.record_success(field_id, now, value);
                    debug!("field {:#010X} updated from info frame", field_id);
                    self.signals.emit_update(field_id, &value);
                },
                Err(e) => {
                    warn!("info payload rejected for field {:#010X}: {e}", field_id);
                },
            }
        }
    }

    fn fail_attempt(&mut self, now: Instant) -> Option<Bytes> {
        match self.supervisor.consume_attempt(now) {
            AttemptVerdict::Resend(frame) => {
                self.last_dispatch = Some(now);
                Some(frame)
            },
            AttemptVerdict::Exhausted { field_id } => {
                self.registry.record_failure(field_id);
                self.signals.emit_timeout(field_id);
                None
            },
        }
    }
}
