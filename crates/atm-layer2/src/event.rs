//! Timed events and the queue that orders them.
//!
//! Layer-2 code never waits: whenever something must happen later it hands
//! an [`Event`] and a delay to an [`EventSink`]. The driver owns the clock
//! and feeds events back when they come due.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::framer::Frame;

/// One side of a link: a node and one of its interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub node: usize,
    pub interface: usize,
}

impl Endpoint {
    pub const fn new(node: usize, interface: usize) -> Self {
        Self { node, interface }
    }
}

/// Events emitted by the layer-2 model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A frame reaches the receiving interface.
    FrameArrival { to: Endpoint, frame: Frame },
    /// The sending interface has finished serialising its frame.
    TransmissionFinished { at: Endpoint },
}

/// Where layer-2 code schedules future work.
pub trait EventSink {
    fn schedule(&mut self, delay: Duration, event: Event);
}

impl EventSink for Vec<(Duration, Event)> {
    fn schedule(&mut self, delay: Duration, event: Event) {
        self.push((delay, event));
    }
}

struct Scheduled<E> {
    at: Duration,
    seq: u64,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // Reversed: BinaryHeap is a max-heap and the earliest event must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered event queue. Events due at the same instant pop in the
/// order they were scheduled.
pub struct EventQueue<E> {
    now: Duration,
    seq: u64,
    heap: BinaryHeap<Scheduled<E>>,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventQueue<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("now", &self.now)
            .field("pending", &self.heap.len())
            .finish()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            seq: 0,
            heap: BinaryHeap::new(),
        }
    }

    /// Time of the last event popped.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn peek_time(&self) -> Option<Duration> {
        self.heap.peek().map(|s| s.at)
    }

    /// Schedules at an absolute time. Times in the past are clamped to now.
    pub fn schedule_at(&mut self, at: Duration, event: E) {
        let at = at.max(self.now);
        self.heap.push(Scheduled {
            at,
            seq: self.seq,
            event,
        });
        self.seq += 1;
    }

    pub fn schedule_in(&mut self, delay: Duration, event: E) {
        self.schedule_at(self.now + delay, event);
    }

    /// Pops the earliest event and advances the clock to it.
    pub fn pop(&mut self) -> Option<(Duration, E)> {
        let next = self.heap.pop()?;
        self.now = next.at;
        Some((next.at, next.event))
    }
}

impl<E: From<Event>> EventSink for EventQueue<E> {
    fn schedule(&mut self, delay: Duration, event: Event) {
        self.schedule_in(delay, E::from(event));
    }
}
