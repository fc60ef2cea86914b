//! Counters and end-of-run reports.
//!
//! Counters are always maintained. Reports only carry the sections whose
//! statistics flag is enabled for the interface.

use serde::Serialize;

use crate::cell::HeaderFormat;
use crate::scheduler::QueueSlot;

/// Cell counters kept by one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Layer2Stats {
    /// Data cells that arrived on this interface.
    pub cells_received: u64,
    /// Cells taken from the scheduler and put on the wire.
    pub cells_forwarded: u64,
    /// Cells a switch could not find in its translation table.
    pub cells_no_route: u64,
    /// Cells a switch translated but the outgoing queue refused.
    pub cells_dropped_in_transit: u64,
    pub control_cells: u64,
    /// Cells handed to the adaptation layer, control cells included.
    pub cells_delivered: u64,
    /// Cells locally originated on this interface that the scheduler refused.
    pub cells_dropped_on_send: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Layer2Report {
    /// Node at the far end of the link.
    pub destination: Option<usize>,
    #[serde(flatten)]
    pub counters: Layer2Stats,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub total_busy_time_ns: u64,
    pub link_utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueReport {
    pub capacity_bytes: usize,
    pub bytes_used: usize,
    pub cells_marked: u64,
    pub dropped_red: u64,
    pub dropped_full: u64,
    pub red_average: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub priority: usize,
    pub reserved_bps: u64,
    pub cells_queued: u64,
    pub cells_dequeued: u64,
    pub cells_dropped: u64,
    pub total_dequeue_requests: u64,
    pub service_ratio: f64,
    pub queue: QueueReport,
}

impl From<&QueueSlot> for SlotReport {
    fn from(slot: &QueueSlot) -> Self {
        let stats = slot.stats();
        let queue = slot.queue();
        SlotReport {
            priority: slot.priority(),
            reserved_bps: slot.reserved_bps(),
            cells_queued: stats.cells_queued,
            cells_dequeued: stats.cells_dequeued,
            cells_dropped: stats.cells_dropped,
            total_dequeue_requests: stats.total_dequeue_requests,
            service_ratio: stats.service_ratio(),
            queue: QueueReport {
                capacity_bytes: queue.capacity_bytes(),
                bytes_used: queue.bytes_used(),
                cells_marked: queue.stats().cells_marked,
                dropped_red: queue.stats().dropped_red,
                dropped_full: queue.stats().dropped_full,
                red_average: queue.red().average(),
            },
        }
    }
}

/// Everything reported for one interface at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceReport {
    pub node: usize,
    pub interface: usize,
    pub format: HeaderFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer2: Option<Layer2Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<Vec<SlotReport>>,
}

impl InterfaceReport {
    /// True when neither statistics section is enabled.
    pub fn is_empty(&self) -> bool {
        self.layer2.is_none() && self.scheduler.is_none()
    }
}

/// Receives reports at finalisation. Write-only.
pub trait StatsSink {
    fn record(&mut self, report: InterfaceReport);
}

impl StatsSink for Vec<InterfaceReport> {
    fn record(&mut self, report: InterfaceReport) {
        self.push(report);
    }
}

/// Emits each report as a structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatsSink for TracingSink {
    fn record(&mut self, report: InterfaceReport) {
        if let Some(l2) = &report.layer2 {
            tracing::info!(
                node = report.node,
                interface = report.interface,
                destination = ?l2.destination,
                cells_received = l2.counters.cells_received,
                cells_forwarded = l2.counters.cells_forwarded,
                cells_no_route = l2.counters.cells_no_route,
                cells_dropped_in_transit = l2.counters.cells_dropped_in_transit,
                control_cells = l2.counters.control_cells,
                cells_delivered = l2.counters.cells_delivered,
                link_utilization = l2.link_utilization,
                "layer2 statistics"
            );
        }
        for slot in report.scheduler.iter().flatten() {
            tracing::info!(
                node = report.node,
                interface = report.interface,
                priority = slot.priority,
                cells_queued = slot.cells_queued,
                cells_dequeued = slot.cells_dequeued,
                cells_dropped = slot.cells_dropped,
                service_ratio = slot.service_ratio,
                "scheduler statistics"
            );
        }
    }
}
