//! Strictly ordered message delivery over an unreliable channel.
//!
//! Outgoing messages get consecutive indexes; incoming envelopes are held
//! until every predecessor has been delivered. When a gap persists past the
//! resend timeout, one retransmission request is emitted per timeout window
//! until the gap fills. All timing flows through `tick(now)`; nothing here
//! reads a clock.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::messages::{Envelope, WireMessage};

/// Tunables for ordered delivery.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// How long to sit on an incoming gap before requesting a resend, in
    /// milliseconds.
    pub resend_timeout_ms: i64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            resend_timeout_ms: 1000,
        }
    }
}

/// Sequencing state for one connection, both directions.
#[derive(Debug)]
pub struct OrderedDelivery {
    config: DeliveryConfig,
    started: bool,

    // Outgoing.
    next_out: u64,
    sent: BTreeMap<u64, WireMessage>,
    outgoing_buffer: Vec<Envelope>,

    // Incoming.
    next_in: u64,
    pending_in: BTreeMap<u64, WireMessage>,
    gap_deadline: Option<i64>,
}

impl OrderedDelivery {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config,
            started: false,
            next_out: 0,
            sent: BTreeMap::new(),
            outgoing_buffer: Vec::new(),
            next_in: 0,
            pending_in: BTreeMap::new(),
            gap_deadline: None,
        }
    }

    /// Queue an outgoing message. Returns the envelope to transmit now, or
    /// `None` if the channel is stopped (the envelope is buffered and will be
    /// flushed by `start`).
    pub fn send(&mut self, message: WireMessage) -> Option<Envelope> {
        let envelope = Envelope {
            index: self.next_out,
            message: message.clone(),
        };
        self.sent.insert(self.next_out, message);
        self.next_out += 1;
        if self.started {
            Some(envelope)
        } else {
            self.outgoing_buffer.push(envelope);
            None
        }
    }

    /// Open the channel, flushing anything queued while stopped, in order.
    pub fn start(&mut self) -> Vec<Envelope> {
        self.started = true;
        std::mem::take(&mut self.outgoing_buffer)
    }

    /// Close the channel. Subsequent sends are buffered; incoming state is
    /// preserved.
    pub fn stop(&mut self) {
        self.started = false;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Retransmit a previously sent envelope.
    pub fn resend(&self, index: u64) -> Result<Envelope> {
        self.sent
            .get(&index)
            .map(|message| Envelope {
                index,
                message: message.clone(),
            })
            .ok_or(ProtocolError::NeverSent(index))
    }

    /// Accept an incoming envelope. Returns the messages that are now
    /// deliverable, in order (possibly empty if the envelope is out of order
    /// or a duplicate).
    pub fn receive(&mut self, envelope: Envelope, now: i64) -> Vec<WireMessage> {
        if envelope.index < self.next_in || self.pending_in.contains_key(&envelope.index) {
            debug!(index = envelope.index, "dropping duplicate envelope");
            return Vec::new();
        }
        self.pending_in.insert(envelope.index, envelope.message);

        let mut delivered = Vec::new();
        while let Some(message) = self.pending_in.remove(&self.next_in) {
            delivered.push(message);
            self.next_in += 1;
        }

        if self.pending_in.is_empty() {
            // Gap filled (or never existed); cancel any pending request.
            self.gap_deadline = None;
        } else if self.gap_deadline.is_none() {
            self.gap_deadline = Some(now + self.config.resend_timeout_ms);
        }
        delivered
    }

    /// Advance timers. Returns the index to request a resend for, at most one
    /// per elapsed timeout window.
    pub fn tick(&mut self, now: i64) -> Option<u64> {
        let deadline = self.gap_deadline?;
        if now < deadline {
            return None;
        }
        // Re-arm so the request repeats if the gap persists.
        self.gap_deadline = Some(now + self.config.resend_timeout_ms);
        warn!(index = self.next_in, "requesting resend for delivery gap");
        Some(self.next_in)
    }

    /// Index the next incoming message must carry.
    pub fn next_expected(&self) -> u64 {
        self.next_in
    }
}

impl Default for OrderedDelivery {
    fn default() -> Self {
        Self::new(DeliveryConfig::default())
    }
}
