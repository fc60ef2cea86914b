//! Byte-bounded FIFO of cells guarded by RED.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::cell::Cell;
use crate::red::{RedController, RedParams, RedVerdict};

/// Result of offering a cell to a [`RedQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    MarkedAndInserted,
    /// Not enough byte capacity left; takes precedence over RED.
    DroppedFull,
    DroppedRed,
}

impl InsertOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, InsertOutcome::Inserted | InsertOutcome::MarkedAndInserted)
    }
}

/// How [`RedQueue::retrieve`] treats the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    Peek,
    Dequeue,
    /// Remove and throw away.
    Discard,
}

/// Counters kept by each queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub cells_inserted: u64,
    pub cells_marked: u64,
    pub dropped_full: u64,
    pub dropped_red: u64,
    pub cells_dequeued: u64,
    pub cells_discarded: u64,
}

#[derive(Debug)]
pub struct RedQueue {
    index: usize,
    capacity_bytes: usize,
    bytes_used: usize,
    cells: VecDeque<Cell>,
    red: RedController,
    stats: QueueStats,
}

impl RedQueue {
    /// `seed` feeds the queue's RED random source; derive it from the
    /// interface and queue index so runs are reproducible.
    pub fn new(index: usize, capacity_bytes: usize, red: RedParams, seed: u64, now: Duration) -> Self {
        Self {
            index,
            capacity_bytes,
            bytes_used: 0,
            cells: VecDeque::new(),
            red: RedController::new(red, seed, now),
            stats: QueueStats::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn red(&self) -> &RedController {
        &self.red
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Offers a cell to the queue. Dropped cells are consumed.
    pub fn insert(&mut self, mut cell: Cell, now: Duration) -> InsertOutcome {
        if self.bytes_used + cell.len() > self.capacity_bytes {
            self.stats.dropped_full += 1;
            tracing::trace!(queue = self.index, bytes_used = self.bytes_used, "queue full, dropping cell");
            return InsertOutcome::DroppedFull;
        }

        self.red.update_average(self.is_empty(), self.len(), now);

        let outcome = match self.red.decide() {
            RedVerdict::Drop => {
                self.stats.dropped_red += 1;
                tracing::trace!(
                    queue = self.index,
                    average = self.red.average(),
                    "RED dropped cell"
                );
                return InsertOutcome::DroppedRed;
            }
            RedVerdict::AdmitMarked => {
                cell.mark_congestion();
                self.stats.cells_marked += 1;
                InsertOutcome::MarkedAndInserted
            }
            RedVerdict::Admit => InsertOutcome::Inserted,
        };

        self.bytes_used += cell.len();
        self.cells.push_back(cell);
        self.stats.cells_inserted += 1;
        outcome
    }

    /// Peeks at or removes the head cell.
    pub fn retrieve(&mut self, op: QueueOperation, now: Duration) -> Option<Cell> {
        let cell = match op {
            QueueOperation::Peek => return self.cells.front().cloned(),
            QueueOperation::Dequeue | QueueOperation::Discard => self.cells.pop_front()?,
        };

        self.bytes_used -= cell.len();
        match op {
            QueueOperation::Dequeue => self.stats.cells_dequeued += 1,
            _ => self.stats.cells_discarded += 1,
        }
        if self.cells.is_empty() {
            self.red.mark_idle(now);
        }
        Some(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellHeader, Circuit, HeaderFormat, CELL_LEN};

    fn data_cell(vci: u16) -> Cell {
        Cell::new(
            &CellHeader::for_circuit(Circuit::new(0, vci)),
            HeaderFormat::Uni,
            &[vci as u8; 10],
        )
    }

    fn queue(capacity: usize, red: RedParams) -> RedQueue {
        RedQueue::new(1, capacity, red, 1, Duration::ZERO)
    }

    #[test]
    fn fifo_order_and_byte_accounting() {
        let mut q = queue(15_000, RedParams::default());
        for vci in 32..36 {
            assert_eq!(q.insert(data_cell(vci), Duration::ZERO), InsertOutcome::Inserted);
        }
        assert_eq!(q.bytes_used(), 4 * CELL_LEN);
        assert_eq!(q.len(), 4);

        let peeked = q.retrieve(QueueOperation::Peek, Duration::ZERO).unwrap();
        assert_eq!(peeked.header(HeaderFormat::Uni).vci, 32);
        assert_eq!(q.len(), 4);

        for vci in 32..36 {
            let cell = q.retrieve(QueueOperation::Dequeue, Duration::ZERO).unwrap();
            assert_eq!(cell.header(HeaderFormat::Uni).vci, vci);
        }
        assert_eq!(q.bytes_used(), 0);
        assert!(q.retrieve(QueueOperation::Dequeue, Duration::ZERO).is_none());
    }

    #[test]
    fn capacity_tail_drop_precedes_red() {
        // Two cells fit, the third does not.
        let mut q = queue(2 * CELL_LEN + 10, RedParams::default());
        assert!(q.insert(data_cell(32), Duration::ZERO).is_inserted());
        assert!(q.insert(data_cell(33), Duration::ZERO).is_inserted());
        assert_eq!(q.insert(data_cell(34), Duration::ZERO), InsertOutcome::DroppedFull);
        assert_eq!(q.stats().dropped_full, 1);
        assert_eq!(q.bytes_used(), 2 * CELL_LEN);
        // RED was never consulted for the rejected cell.
        assert_eq!(q.red().count(), -1);
    }

    #[test]
    fn red_drop_does_not_enqueue() {
        let params = RedParams {
            min_threshold: 0.0,
            max_threshold: 0.0,
            ..Default::default()
        };
        let mut q = queue(15_000, params);
        assert_eq!(q.insert(data_cell(32), Duration::ZERO), InsertOutcome::DroppedRed);
        assert!(q.is_empty());
        assert_eq!(q.bytes_used(), 0);
        assert_eq!(q.stats().dropped_red, 1);
    }

    #[test]
    fn marked_cells_carry_congestion_bit() {
        // Band [0, 10) with zero drop probability: every admitted cell is marked.
        let params = RedParams {
            min_threshold: 0.0,
            max_threshold: 10.0,
            max_probability: 0.0,
            queue_weight: 1.0,
            ..Default::default()
        };
        let mut q = queue(15_000, params);
        let first = q.insert(data_cell(32), Duration::ZERO);
        assert!(first.is_inserted());
        let second = q.insert(data_cell(33), Duration::ZERO);
        assert!(second.is_inserted());

        let marked = q.stats().cells_marked as usize;
        let mut seen = 0;
        while let Some(cell) = q.retrieve(QueueOperation::Dequeue, Duration::ZERO) {
            if cell.congestion_experienced() {
                seen += 1;
            }
        }
        assert_eq!(seen, marked);
        assert!(marked > 0);
    }

    #[test]
    fn emptying_dequeue_records_idle_start() {
        let mut q = queue(15_000, RedParams::default());
        q.insert(data_cell(32), Duration::ZERO);
        q.insert(data_cell(33), Duration::ZERO);
        q.retrieve(QueueOperation::Dequeue, Duration::from_millis(5));
        assert_eq!(q.red().start_idle(), Duration::ZERO);
        q.retrieve(QueueOperation::Discard, Duration::from_millis(9));
        assert_eq!(q.red().start_idle(), Duration::from_millis(9));
        assert_eq!(q.stats().cells_discarded, 1);
        assert_eq!(q.stats().cells_dequeued, 1);
    }

    #[test]
    fn peek_on_last_cell_does_not_touch_idle_start() {
        let mut q = queue(15_000, RedParams::default());
        q.insert(data_cell(32), Duration::ZERO);
        q.retrieve(QueueOperation::Peek, Duration::from_millis(3));
        assert_eq!(q.red().start_idle(), Duration::ZERO);
    }
}
