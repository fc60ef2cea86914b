//! Weighted round-robin cell scheduler.
//!
//! Each outgoing interface owns one [`WrrScheduler`] holding its queues in
//! priority order. Priority 0 is the control/signalling queue: it is served
//! strictly first and never takes part in the weighted rounds. Every other
//! queue receives service turns proportional to the bandwidth reserved for
//! it, reduced to the smallest integers by their GCD.

use std::time::Duration;

use serde::Serialize;

use crate::cell::{Cell, CELL_LEN};
use crate::queue::{InsertOutcome, QueueOperation, RedQueue};

/// Priority reserved for the control queue.
pub const CONTROL_PRIORITY: usize = 0;

const CELL_BITS: f64 = (CELL_LEN * 8) as f64;

/// Per-slot scheduler counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SlotStats {
    pub cells_queued: u64,
    pub cells_dequeued: u64,
    pub cells_dropped: u64,
    /// Dequeue opportunities observed while this slot had cells waiting.
    pub total_dequeue_requests: u64,
}

impl SlotStats {
    /// Fraction of dequeue opportunities that went to this slot while it
    /// was backlogged.
    pub fn service_ratio(&self) -> f64 {
        if self.total_dequeue_requests == 0 {
            0.0
        } else {
            self.cells_dequeued as f64 / self.total_dequeue_requests as f64
        }
    }
}

/// A queue bound to its reservation and round counters.
#[derive(Debug)]
pub struct QueueSlot {
    priority: usize,
    queue: RedQueue,
    reserved_bps: u64,
    /// Share of the reserved bandwidth at the last round computation.
    weight: f64,
    /// Service turns left in the current round.
    weight_counter: u64,
    stats: SlotStats,
}

impl QueueSlot {
    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn queue(&self) -> &RedQueue {
        &self.queue
    }

    pub fn reserved_bps(&self) -> u64 {
        self.reserved_bps
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn weight_counter(&self) -> u64 {
        self.weight_counter
    }

    pub fn stats(&self) -> &SlotStats {
        &self.stats
    }

    fn is_control(&self) -> bool {
        self.priority == CONTROL_PRIORITY
    }
}

#[derive(Debug)]
pub struct WrrScheduler {
    slots: Vec<QueueSlot>,
    total_bandwidth_bps: u64,
    /// Slot index of the last data queue served.
    cursor: usize,
    cells_in_round: u64,
    gcd: u64,
}

pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let rem = a % b;
        a = b;
        b = rem;
    }
    a
}

impl WrrScheduler {
    pub fn new(total_bandwidth_bps: u64) -> Self {
        Self {
            slots: Vec::new(),
            total_bandwidth_bps,
            cursor: 0,
            cells_in_round: 0,
            gcd: 0,
        }
    }

    pub fn total_bandwidth_bps(&self) -> u64 {
        self.total_bandwidth_bps
    }

    pub fn set_total_bandwidth(&mut self, bps: u64) {
        self.total_bandwidth_bps = bps;
    }

    pub fn cells_in_round(&self) -> u64 {
        self.cells_in_round
    }

    pub fn gcd(&self) -> u64 {
        self.gcd
    }

    pub fn num_queues(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> impl Iterator<Item = &QueueSlot> {
        self.slots.iter()
    }

    pub fn slot(&self, priority: usize) -> Option<&QueueSlot> {
        self.position(priority).map(|idx| &self.slots[idx])
    }

    /// Sum of all reservations, control queue included.
    pub fn reserved_total(&self) -> u64 {
        self.slots.iter().map(|s| s.reserved_bps).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.queue.is_empty())
    }

    pub fn cells_queued(&self) -> usize {
        self.slots.iter().map(|s| s.queue.len()).sum()
    }

    fn position(&self, priority: usize) -> Option<usize> {
        self.slots
            .binary_search_by_key(&priority, |s| s.priority)
            .ok()
    }

    /// First slot index that takes part in weighted rounds.
    fn data_start(&self) -> usize {
        match self.slots.first() {
            Some(slot) if slot.is_control() => 1,
            _ => 0,
        }
    }

    /// Adds a queue at `priority`, keeping slots ordered.
    ///
    /// # Panics
    ///
    /// If a queue with the same priority already exists.
    pub fn add_queue(&mut self, queue: RedQueue, priority: usize, reserved_bps: u64) -> usize {
        let pos = match self.slots.binary_search_by_key(&priority, |s| s.priority) {
            Ok(_) => panic!("priority queue {priority} already exists"),
            Err(pos) => pos,
        };
        if self.reserved_total() + reserved_bps > self.total_bandwidth_bps {
            tracing::warn!(
                priority,
                reserved_bps,
                total_bps = self.total_bandwidth_bps,
                "queue reservation exceeds link bandwidth"
            );
        }
        self.slots.insert(
            pos,
            QueueSlot {
                priority,
                queue,
                reserved_bps,
                weight: 0.0,
                weight_counter: 0,
                stats: SlotStats::default(),
            },
        );
        if pos <= self.cursor && self.slots.len() > 1 {
            self.cursor += 1;
        }
        priority
    }

    /// Removes and returns the queue at `priority`.
    ///
    /// # Panics
    ///
    /// If no such queue exists.
    pub fn remove_queue(&mut self, priority: usize) -> RedQueue {
        let Some(pos) = self.position(priority) else {
            panic!("queue with priority {priority} not found for removal");
        };
        let slot = self.slots.remove(pos);
        self.cells_in_round = self.cells_in_round.saturating_sub(slot.weight_counter);
        if pos < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.slots.len() {
            self.cursor = self.data_start();
        }
        slot.queue
    }

    /// Live queue replacement is not supported by this scheduler.
    ///
    /// # Panics
    ///
    /// Always.
    pub fn swap_queue(&mut self, _queue: RedQueue, priority: usize) -> ! {
        panic!("ATM scheduler cannot swap queue {priority}");
    }

    /// Grows or shrinks the reservation of one queue.
    ///
    /// Returns `false` when the request is denied: an increase that would
    /// push the total reservation past the link bandwidth, or a decrease
    /// larger than what the queue holds. New reservations take effect at
    /// the next round boundary.
    ///
    /// # Panics
    ///
    /// If no queue has the given priority.
    pub fn update_reserved_bandwidth(&mut self, priority: usize, bits: u64, is_add: bool) -> bool {
        let total_reserved = self.reserved_total();
        let total_bps = self.total_bandwidth_bps;
        let Some(pos) = self.position(priority) else {
            panic!("queue with priority {priority} not found for reservation");
        };
        let slot = &mut self.slots[pos];

        if is_add {
            if total_reserved + bits > total_bps {
                tracing::debug!(priority, bits, total_reserved, total_bps, "reservation denied");
                return false;
            }
            slot.reserved_bps += bits;
        } else {
            if slot.reserved_bps < bits {
                tracing::debug!(priority, bits, held = slot.reserved_bps, "release exceeds reservation");
                return false;
            }
            slot.reserved_bps -= bits;
        }
        tracing::debug!(priority, reserved_bps = slot.reserved_bps, "reservation updated");
        true
    }

    /// Recomputes every data slot's service turns from the current
    /// reservations and rewinds the cursor to the first reserved slot.
    pub fn compute_round(&mut self) {
        let start = self.data_start();
        let sum: u64 = self.slots[start..].iter().map(|s| s.reserved_bps).sum();
        let total = self.total_bandwidth_bps as f64;

        self.cells_in_round = 0;
        self.gcd = 0;
        for slot in &mut self.slots[start..] {
            slot.weight = 0.0;
            slot.weight_counter = 0;
            if slot.reserved_bps > 0 {
                slot.weight = slot.reserved_bps as f64 / sum as f64;
                slot.weight_counter = (slot.weight * total / CELL_BITS).floor() as u64;
                self.gcd = gcd(self.gcd, slot.weight_counter);
            }
        }

        if self.gcd == 0 {
            tracing::trace!("link has no reserved bandwidth, round is empty");
            return;
        }

        for slot in &mut self.slots[start..] {
            slot.weight_counter /= self.gcd;
            self.cells_in_round += slot.weight_counter;
        }

        self.cursor = self.slots[start..]
            .iter()
            .position(|s| s.reserved_bps > 0)
            .map(|p| p + start)
            .unwrap_or(start);

        tracing::trace!(
            cells_in_round = self.cells_in_round,
            gcd = self.gcd,
            "service round computed"
        );
    }

    /// True when no backlogged data queue has service turns left.
    pub fn is_round_exhausted(&self) -> bool {
        self.slots[self.data_start()..]
            .iter()
            .filter(|s| !s.queue.is_empty())
            .all(|s| s.weight_counter == 0)
    }

    /// Routes a cell to the queue at `priority`.
    ///
    /// # Panics
    ///
    /// If no queue has the given priority.
    pub fn insert(&mut self, priority: usize, cell: Cell, now: Duration) -> InsertOutcome {
        let Some(pos) = self.position(priority) else {
            panic!("queue with priority {priority} does not exist");
        };
        let slot = &mut self.slots[pos];
        let outcome = slot.queue.insert(cell, now);
        if outcome.is_inserted() {
            slot.stats.cells_queued += 1;
        } else {
            slot.stats.cells_dropped += 1;
        }
        outcome
    }

    /// Picks the next cell to transmit, if any queue may be served now.
    ///
    /// Returns the priority of the queue it came from alongside the cell.
    /// `None` can be returned while data queues are backlogged but hold no
    /// service turns; the caller retries at the next frame opportunity.
    pub fn select_next(&mut self, now: Duration) -> Option<(usize, Cell)> {
        if let Some(control) = self.slots.first_mut() {
            if control.is_control() && !control.queue.is_empty() {
                let cell = control.queue.retrieve(QueueOperation::Dequeue, now)?;
                self.record_dequeue(0);
                return Some((CONTROL_PRIORITY, cell));
            }
        }

        if self.cells_in_round == 0 || self.is_round_exhausted() {
            self.compute_round();
        }

        let start = self.data_start();
        let count = self.slots.len() - start;
        if count == 0 {
            return None;
        }

        let mut idx = if self.cursor < start || self.cursor >= self.slots.len() {
            start
        } else {
            self.cursor
        };

        for _ in 0..count {
            let slot = &self.slots[idx];
            if !slot.queue.is_empty() && slot.weight_counter > 0 {
                let slot = &mut self.slots[idx];
                let cell = slot.queue.retrieve(QueueOperation::Dequeue, now)?;
                slot.weight_counter -= 1;
                let priority = slot.priority;
                self.cells_in_round = self.cells_in_round.saturating_sub(1);
                self.cursor = idx;
                self.record_dequeue(idx);
                tracing::trace!(priority, remaining = self.cells_in_round, "served data queue");
                return Some((priority, cell));
            }
            idx += 1;
            if idx == self.slots.len() {
                idx = start;
            }
        }

        None
    }

    fn record_dequeue(&mut self, served: usize) {
        self.slots[served].stats.cells_dequeued += 1;
        for slot in &mut self.slots {
            if !slot.queue.is_empty() {
                slot.stats.total_dequeue_requests += 1;
            }
        }
    }
}
