//! One ATM interface: its queues, scheduler, link and counters.
//!
//! Every interface of an `N`-interface node carries `N + 1` queues. Queue
//! 0 is the control queue; queue `i + 1` holds cells that arrived on
//! interface `i` and are switched out here, or cells originated locally on
//! interface `i`.

use std::time::Duration;

use crate::cell::{Cell, HeaderFormat};
use crate::config::Layer2Config;
use crate::event::{Endpoint, Event, EventSink};
use crate::framer::assemble_frame;
use crate::link::LinkState;
use crate::queue::{InsertOutcome, RedQueue};
use crate::scheduler::WrrScheduler;
use crate::stats::{InterfaceReport, Layer2Report, Layer2Stats, SlotReport};

/// What a node needs to build one of its interfaces.
#[derive(Debug, Clone)]
pub struct InterfaceSetup {
    pub format: HeaderFormat,
    /// Far end of the link; `None` leaves the interface unconnected.
    pub peer: Option<Endpoint>,
    pub config: Layer2Config,
}

#[derive(Debug)]
pub struct Interface {
    endpoint: Endpoint,
    format: HeaderFormat,
    peer: Option<Endpoint>,
    scheduler: WrrScheduler,
    link: LinkState,
    stats: Layer2Stats,
    layer2_statistics: bool,
    scheduler_statistics: bool,
}

fn queue_seed(seed: u64, endpoint: Endpoint, queue: usize) -> u64 {
    seed ^ ((endpoint.node as u64) << 32) ^ ((endpoint.interface as u64) << 16) ^ queue as u64
}

impl Interface {
    pub fn new(
        endpoint: Endpoint,
        num_interfaces: usize,
        setup: InterfaceSetup,
        seed: u64,
        now: Duration,
    ) -> Self {
        let config = setup.config;
        let mut scheduler = WrrScheduler::new(config.bandwidth_bps);
        for index in 0..=num_interfaces {
            let qc = config.queue(index);
            let queue = RedQueue::new(
                index,
                qc.capacity_bytes,
                qc.red.clone(),
                queue_seed(seed, endpoint, index),
                now,
            );
            scheduler.add_queue(queue, index, 0);
        }

        tracing::info!(
            node = endpoint.node,
            interface = endpoint.interface,
            format = ?setup.format,
            bandwidth_bps = config.bandwidth_bps,
            queues = num_interfaces + 1,
            "interface initialised"
        );

        Self {
            endpoint,
            format: setup.format,
            peer: setup.peer,
            scheduler,
            link: LinkState::new(config.bandwidth_bps, config.propagation_delay),
            stats: Layer2Stats::default(),
            layer2_statistics: config.layer2_statistics,
            scheduler_statistics: config.scheduler_statistics,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn format(&self) -> HeaderFormat {
        self.format
    }

    pub fn peer(&self) -> Option<Endpoint> {
        self.peer
    }

    pub fn scheduler(&self) -> &WrrScheduler {
        &self.scheduler
    }

    pub fn link(&self) -> &LinkState {
        &self.link
    }

    pub fn stats(&self) -> &Layer2Stats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Layer2Stats {
        &mut self.stats
    }

    /// Offers a cell to queue `queue` and starts the link if the scheduler
    /// was empty before.
    ///
    /// # Panics
    ///
    /// If the interface has no queue with that index.
    pub fn enqueue(
        &mut self,
        queue: usize,
        cell: Cell,
        now: Duration,
        sink: &mut impl EventSink,
    ) -> InsertOutcome {
        let was_empty = self.scheduler.is_empty();
        let outcome = self.scheduler.insert(queue, cell, now);
        if outcome.is_inserted() && was_empty {
            self.transmit_next(now, sink);
        }
        outcome
    }

    /// Sends one frame if the link is idle and cells are waiting.
    ///
    /// Returns whether a frame went out. On a zero-bandwidth link the
    /// frame is assembled and discarded.
    ///
    /// # Panics
    ///
    /// If a frame is ready but the interface is not connected.
    pub fn transmit_next(&mut self, now: Duration, sink: &mut impl EventSink) -> bool {
        if !self.link.is_idle() || self.scheduler.is_empty() {
            return false;
        }

        let frame = assemble_frame(&mut self.scheduler, now);
        self.stats.cells_forwarded += frame.data_cells() as u64;

        let Some(tx) = self.link.start(frame.len_bytes()) else {
            return false;
        };
        let Some(peer) = self.peer else {
            panic!(
                "destination of the link at node {} interface {} is not set",
                self.endpoint.node, self.endpoint.interface
            );
        };

        tracing::debug!(
            node = self.endpoint.node,
            interface = self.endpoint.interface,
            to_node = peer.node,
            data_cells = frame.data_cells(),
            delay_ns = tx.delay.as_nanos() as u64,
            "frame sent"
        );
        sink.schedule(tx.arrival, Event::FrameArrival { to: peer, frame });
        sink.schedule(
            tx.delay,
            Event::TransmissionFinished {
                at: self.endpoint,
            },
        );
        true
    }

    /// Frees the link and keeps draining the scheduler.
    pub fn on_transmission_finished(&mut self, now: Duration, sink: &mut impl EventSink) {
        self.link.finish();
        if !self.scheduler.is_empty() {
            self.transmit_next(now, sink);
        }
    }

    /// Grows or shrinks the reservation held by `queue`.
    pub fn reserve(&mut self, queue: usize, bits: u64, is_add: bool) -> bool {
        self.scheduler.update_reserved_bandwidth(queue, bits, is_add)
    }

    pub fn report(&self, elapsed: Duration) -> InterfaceReport {
        let layer2 = self.layer2_statistics.then(|| Layer2Report {
            destination: self.peer.map(|p| p.node),
            counters: self.stats.clone(),
            frames_sent: self.link.frames_sent(),
            frames_dropped: self.link.frames_dropped(),
            total_busy_time_ns: self.link.total_busy_time().as_nanos() as u64,
            link_utilization: self.link.utilization(elapsed),
        });
        let scheduler = self
            .scheduler_statistics
            .then(|| self.scheduler.slots().map(SlotReport::from).collect());
        InterfaceReport {
            node: self.endpoint.node,
            interface: self.endpoint.interface,
            format: self.format,
            layer2,
            scheduler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellHeader, Circuit};
    use crate::framer::FRAME_LEN;
    use crate::link::transmission_delay;

    fn interface(bandwidth_bps: u64) -> Interface {
        let config = Layer2Config {
            bandwidth_bps,
            layer2_statistics: true,
            scheduler_statistics: true,
            ..Default::default()
        };
        let mut iface = Interface::new(
            Endpoint::new(0, 0),
            1,
            InterfaceSetup {
                format: HeaderFormat::Uni,
                peer: Some(Endpoint::new(1, 0)),
                config,
            },
            42,
            Duration::ZERO,
        );
        if bandwidth_bps > 0 {
            assert!(iface.reserve(1, bandwidth_bps, true));
        }
        iface
    }

    fn cell(vci: u16) -> Cell {
        Cell::new(&CellHeader::for_circuit(Circuit::new(1, vci)), HeaderFormat::Uni, &[1; 48])
    }

    #[test]
    fn queues_cover_every_interface_plus_control() {
        let iface = interface(112_000);
        assert_eq!(iface.scheduler().num_queues(), 2);
        assert_eq!(iface.scheduler().slot(0).unwrap().queue().capacity_bytes(), 15_000);
    }

    #[test]
    fn first_cell_kicks_transmission() {
        let mut iface = interface(112_000);
        let mut events = Vec::new();
        iface.enqueue(1, cell(32), Duration::ZERO, &mut events);
        assert!(!iface.link().is_idle());
        assert_eq!(events.len(), 2);

        let delay = transmission_delay(FRAME_LEN, 112_000).unwrap();
        match &events[0] {
            (at, Event::FrameArrival { to, frame }) => {
                assert_eq!(*to, Endpoint::new(1, 0));
                assert_eq!(*at, delay + Duration::from_millis(50));
                assert_eq!(frame.data_cells(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            events[1],
            (delay, Event::TransmissionFinished { at: Endpoint::new(0, 0) })
        );
    }

    #[test]
    fn busy_link_waits_for_completion() {
        let mut iface = interface(112_000);
        let mut events = Vec::new();
        iface.enqueue(1, cell(32), Duration::ZERO, &mut events);
        iface.enqueue(1, cell(33), Duration::ZERO, &mut events);
        assert_eq!(events.len(), 2);
        assert_eq!(iface.scheduler().cells_queued(), 1);

        events.clear();
        iface.on_transmission_finished(Duration::from_millis(16), &mut events);
        assert_eq!(events.len(), 2);
        assert!(iface.scheduler().is_empty());

        events.clear();
        iface.on_transmission_finished(Duration::from_millis(32), &mut events);
        assert!(events.is_empty());
        assert!(iface.link().is_idle());
        assert_eq!(iface.stats().cells_forwarded, 2);
        assert_eq!(iface.link().frames_sent(), 2);
    }

    #[test]
    fn zero_bandwidth_discards_frames() {
        let mut iface = interface(0);
        let mut events = Vec::new();
        iface.enqueue(0, cell(5), Duration::ZERO, &mut events);
        assert!(events.is_empty());
        assert!(iface.link().is_idle());
        assert_eq!(iface.link().total_busy_time(), Duration::ZERO);
        assert_eq!(iface.link().frames_dropped(), 1);
    }

    #[test]
    #[should_panic(expected = "not set")]
    fn unconnected_interface_panics_on_send() {
        let mut iface = Interface::new(
            Endpoint::new(0, 0),
            1,
            InterfaceSetup {
                format: HeaderFormat::Uni,
                peer: None,
                config: Layer2Config::default(),
            },
            1,
            Duration::ZERO,
        );
        iface.enqueue(0, cell(5), Duration::ZERO, &mut Vec::new());
    }

    #[test]
    fn report_respects_flags() {
        let mut iface = interface(112_000);
        let mut events = Vec::new();
        iface.enqueue(1, cell(32), Duration::ZERO, &mut events);
        let report = iface.report(Duration::from_secs(1));
        let l2 = report.layer2.unwrap();
        assert_eq!(l2.destination, Some(1));
        assert_eq!(l2.counters.cells_forwarded, 1);
        assert_eq!(l2.total_busy_time_ns, 15_142_857);
        assert_eq!(report.scheduler.unwrap().len(), 2);

        let quiet = Interface::new(
            Endpoint::new(0, 1),
            1,
            InterfaceSetup {
                format: HeaderFormat::Nni,
                peer: None,
                config: Layer2Config::default(),
            },
            1,
            Duration::ZERO,
        );
        assert!(quiet.report(Duration::from_secs(1)).is_empty());
    }
}
