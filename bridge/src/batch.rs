//! Pending-batch buffer with a two-level priority queue.
//!
//! Log events are never dropped; everything else is capped per flush so a
//! burst of low-priority traffic cannot swamp the fan-out. The flush timer
//! is modelled as an explicit state machine so "at most one scheduled
//! flush" is checkable rather than implied by a nullable timer handle.

use std::collections::VecDeque;

use crate::protocol::Envelope;

/// Flush-timer state. `Scheduled` means exactly one timer is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Scheduled,
}

/// Transient buffer of events awaiting the next fan-out.
pub struct PendingBatch {
    high: VecDeque<Envelope>,
    low: VecDeque<Envelope>,
    low_cap: usize,
    state: FlushState,
}

impl PendingBatch {
    pub fn new(low_cap: usize) -> Self {
        Self {
            high: VecDeque::new(),
            low: VecDeque::new(),
            low_cap,
            state: FlushState::Idle,
        }
    }

    /// Queue an event in its priority bucket.
    ///
    /// Returns `true` when the caller must schedule a flush timer; the
    /// state machine guarantees this happens for at most one pending flush.
    pub fn push(&mut self, envelope: Envelope) -> bool {
        if envelope.is_high_priority() {
            self.high.push_back(envelope);
        } else {
            self.low.push_back(envelope);
        }

        match self.state {
            FlushState::Idle => {
                self.state = FlushState::Scheduled;
                true
            }
            FlushState::Scheduled => false,
        }
    }

    /// Drain everything due for this flush.
    ///
    /// Takes the entire high bucket and at most `low_cap` low items,
    /// retaining any excess. Returns the drained items plus whether the
    /// caller should schedule a follow-up flush for the retained backlog.
    pub fn drain(&mut self) -> (Vec<Envelope>, bool) {
        let mut items: Vec<Envelope> = self.high.drain(..).collect();
        let take = self.low.len().min(self.low_cap);
        items.extend(self.low.drain(..take));

        let reschedule = !self.low.is_empty();
        self.state = if reschedule {
            FlushState::Scheduled
        } else {
            FlushState::Idle
        };
        (items, reschedule)
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Low-priority items retained past the last flush. Can grow without
    /// bound if producers sustain non-log traffic above the per-flush cap.
    pub fn low_backlog(&self) -> usize {
        self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }
}
