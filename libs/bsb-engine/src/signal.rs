//! Event triggers
//!
//! Two externally observable signals plus a value-update push channel for
//! collaborator wrappers. Handlers run synchronously inside the scheduling
//! tick that produced the event; delivery is fire-and-forget, the engine
//! never blocks on or retries it.

use tracing::trace;

use bsb_protocol::value::FieldValue;

type TimeoutHandler = Box<dyn FnMut(u32) + Send>;
type CycleHandler = Box<dyn FnMut() + Send>;
type UpdateHandler = Box<dyn FnMut(u32, &FieldValue) + Send>;

#[derive(Default)]
pub(crate) struct Signals {
    timeout: Vec<TimeoutHandler>,
    cycle_complete: Vec<CycleHandler>,
    update: Vec<UpdateHandler>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired exactly once per exhausted exchange, with the field identity
    pub fn subscribe_timeout(&mut self, handler: impl FnMut(u32) + Send + 'static) {
        self.timeout.push(Box::new(handler));
    }

    /// Fired exactly once per completed poll cycle with nothing left due
    pub fn subscribe_cycle_complete(&mut self, handler: impl FnMut() + Send + 'static) {
        self.cycle_complete.push(Box::new(handler));
    }

    /// Fired on every successful value update
    pub fn subscribe_update(&mut self, handler: impl FnMut(u32, &FieldValue) + Send + 'static) {
        self.update.push(Box::new(handler));
    }

    pub fn emit_timeout(&mut self, field_id: u32) {
        trace!("emit timeout signal for field {:#010X}", field_id);
        for handler in &mut self.timeout {
            handler(field_id);
        }
    }

    pub fn emit_cycle_complete(&mut self) {
        trace!("emit wait-next-readout signal");
        for handler in &mut self.cycle_complete {
            handler();
        }
    }

    pub fn emit_update(&mut self, field_id: u32, value: &FieldValue) {
        for handler in &mut self.update {
            handler(field_id, value);
        }
    }
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signals")
            .field("timeout_handlers", &self.timeout.len())
            .field("cycle_handlers", &self.cycle_complete.len())
            .field("update_handlers", &self.update.len())
            .finish()
    }
}
