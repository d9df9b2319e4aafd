//! Exchange supervision
//!
//! An exchange is the ephemeral state of one in-flight request: the target
//! field, the attempt counter and the response deadline. The supervisor
//! holds at most one exchange at a time (the bus is half-duplex) and
//! resolves it to success, exhausted retries, or write refusal.
//!
//! A response that fails validation consumes the current attempt exactly
//! like a timeout does; the only difference is that the resend goes out
//! immediately instead of waiting for the deadline.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

/// What kind of reply the active exchange is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExchangeKind {
    /// Awaiting an ANSWER carrying a value payload
    Query,
    /// Awaiting an ACK (or NACK) echoing the written parameter
    Set,
}

/// State of one in-flight request
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub field_id: u32,
    pub parameter_number: u32,
    pub kind: ExchangeKind,
    /// 1-based; runs up to `max_attempts`
    pub attempt: u8,
    /// retry_count + 1
    pub max_attempts: u8,
    /// Per-attempt response window
    pub timeout: Duration,
    pub deadline: Instant,
    /// Encoded request, kept for resends
    pub frame: Bytes,
}

impl Exchange {
    pub fn new(
        field_id: u32,
        parameter_number: u32,
        kind: ExchangeKind,
        retry_count: u8,
        timeout: Duration,
        now: Instant,
        frame: Bytes,
    ) -> Self {
        Self {
            field_id,
            parameter_number,
            kind,
            attempt: 1,
            max_attempts: retry_count.saturating_add(1),
            timeout,
            deadline: now + timeout,
            frame,
        }
    }
}

/// Outcome of a consumed attempt
#[derive(Debug)]
pub(crate) enum AttemptVerdict {
    /// Retry budget left: transmit this frame again
    Resend(Bytes),
    /// Budget exhausted: the exchange is resolved as failed
    Exhausted { field_id: u32 },
}

/// Drives a single request/response exchange to resolution
#[derive(Debug, Default)]
pub(crate) struct ExchangeSupervisor {
    active: Option<Exchange>,
}

impl ExchangeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&Exchange> {
        self.active.as_ref()
    }

    /// Start an exchange; the caller transmits the returned frame.
    /// Must not be called while another exchange is in flight.
    pub fn begin(&mut self, exchange: Exchange) -> Bytes {
        debug_assert!(self.active.is_none(), "exchange already in flight");
        let frame = exchange.frame.clone();
        debug!(
            "exchange started: field {:#010X} parameter {} attempt 1/{}",
            exchange.field_id, exchange.parameter_number, exchange.max_attempts
        );
        self.active = Some(exchange);
        frame
    }

    /// Resolve the active exchange (success, NACK, or exhaustion already
    /// reported through a verdict)
    pub fn resolve(&mut self) -> Option<Exchange> {
        self.active.take()
    }

    /// Deadline check on a scheduler tick. A late tick only extends the
    /// effective timeout; it is never an error by itself.
    pub fn check_timeout(&mut self, now: Instant) -> Option<AttemptVerdict> {
        let exchange = self.active.as_ref()?;
        if now < exchange.deadline {
            return None;
        }
        warn!(
            "exchange timed out: field {:#010X} attempt {}/{}",
            exchange.field_id, exchange.attempt, exchange.max_attempts
        );
        Some(self.consume_attempt(now))
    }

    /// Burn the current attempt, either because the deadline passed or
    /// because a response failed validation
    pub fn consume_attempt(&mut self, now: Instant) -> AttemptVerdict {
        let Some(exchange) = self.active.as_mut() else {
            // Callers check in_flight first; treat as a stray no-op
            return AttemptVerdict::Exhausted { field_id: 0 };
        };

        if exchange.attempt < exchange.max_attempts {
            exchange.attempt += 1;
            exchange.deadline = now + exchange.timeout;
            debug!(
                "exchange retry: field {:#010X} attempt {}/{}",
                exchange.field_id, exchange.attempt, exchange.max_attempts
            );
            AttemptVerdict::Resend(exchange.frame.clone())
        } else {
            let field_id = exchange.field_id;
            warn!(
                "exchange exhausted after {} attempts: field {:#010X}",
                exchange.max_attempts, field_id
            );
            self.active = None;
            AttemptVerdict::Exhausted { field_id }
        }
    }
}
