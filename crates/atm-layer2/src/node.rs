//! A simulated ATM node: end system or switch.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cell::{Circuit, HeaderFormat};
use crate::event::{Endpoint, EventSink};
use crate::framer::{disassemble, is_idle_cell, segment, DataUnit, Frame};
use crate::interface::{Interface, InterfaceSetup};
use crate::queue::InsertOutcome;
use crate::routing::CircuitRouter;
use crate::scheduler::CONTROL_PRIORITY;
use crate::stats::StatsSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    EndSystem,
    Switch,
}

/// Header layout spoken on a link between `a` and `b`: UNI when exactly
/// one side is an end system, NNI otherwise.
pub fn interface_format(a: NodeType, b: NodeType) -> HeaderFormat {
    if (a == NodeType::EndSystem) != (b == NodeType::EndSystem) {
        HeaderFormat::Uni
    } else {
        HeaderFormat::Nni
    }
}

/// A cell handed up to the adaptation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub interface: usize,
    pub circuit: Circuit,
    /// Arrived on the signalling circuit.
    pub control: bool,
    pub congestion_experienced: bool,
    pub end_of_pdu: bool,
    pub low_priority: bool,
    pub payload: Bytes,
}

/// Cells produced by one [`Node::send`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub cells: usize,
    pub marked: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct Node {
    id: usize,
    node_type: NodeType,
    interfaces: Vec<Interface>,
    router: Box<dyn CircuitRouter>,
}

impl Node {
    /// Builds the node and all of its interfaces.
    pub fn new(
        id: usize,
        node_type: NodeType,
        router: Box<dyn CircuitRouter>,
        interfaces: Vec<InterfaceSetup>,
        seed: u64,
        now: Duration,
    ) -> Self {
        let count = interfaces.len();
        let interfaces = interfaces
            .into_iter()
            .enumerate()
            .map(|(i, setup)| Interface::new(Endpoint::new(id, i), count, setup, seed, now))
            .collect();
        Self {
            id,
            node_type,
            interfaces,
            router,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface(&self, index: usize) -> Option<&Interface> {
        self.interfaces.get(index)
    }

    pub fn router(&self) -> &dyn CircuitRouter {
        self.router.as_ref()
    }

    pub fn router_mut(&mut self) -> &mut dyn CircuitRouter {
        self.router.as_mut()
    }

    fn interface_mut(&mut self, index: usize) -> &mut Interface {
        let id = self.id;
        self.interfaces
            .get_mut(index)
            .unwrap_or_else(|| panic!("node {id} has no interface {index}"))
    }

    /// Segments a locally originated unit and queues its cells on
    /// `out_interface`. Signalling goes to the control queue.
    ///
    /// # Panics
    ///
    /// If `out_interface` does not exist.
    pub fn send(
        &mut self,
        out_interface: usize,
        unit: &DataUnit,
        now: Duration,
        sink: &mut impl EventSink,
    ) -> SendSummary {
        let iface = self.interface_mut(out_interface);
        let queue = if unit.circuit.is_signalling() {
            CONTROL_PRIORITY
        } else {
            out_interface + 1
        };

        let mut summary = SendSummary::default();
        for cell in segment(unit, iface.format()) {
            summary.cells += 1;
            match iface.enqueue(queue, cell, now, sink) {
                InsertOutcome::Inserted => {}
                InsertOutcome::MarkedAndInserted => summary.marked += 1,
                InsertOutcome::DroppedFull | InsertOutcome::DroppedRed => {
                    summary.dropped += 1;
                    iface.stats_mut().cells_dropped_on_send += 1;
                }
            }
        }
        tracing::trace!(
            node = self.id,
            interface = out_interface,
            cells = summary.cells,
            dropped = summary.dropped,
            "data unit queued"
        );
        summary
    }

    /// Handles a frame arriving on `in_interface`.
    ///
    /// Idle cells are discarded. Signalling cells and, on end systems, all
    /// data cells are returned as deliveries. Switches translate each data
    /// cell and queue it on the outgoing interface.
    ///
    /// # Panics
    ///
    /// If `in_interface` does not exist.
    pub fn receive_frame(
        &mut self,
        in_interface: usize,
        frame: Frame,
        now: Duration,
        sink: &mut impl EventSink,
    ) -> Vec<Delivery> {
        let in_format = self.interface_mut(in_interface).format();
        let mut deliveries = Vec::new();

        for mut cell in disassemble(frame) {
            if is_idle_cell(&cell) {
                continue;
            }
            let header = cell.header(in_format);
            let circuit = header.circuit();
            let delivery = |control: bool| Delivery {
                interface: in_interface,
                circuit,
                control,
                congestion_experienced: header.congestion_experienced(),
                end_of_pdu: header.end_of_pdu(),
                low_priority: header.clp,
                payload: cell.payload(),
            };

            if circuit.is_signalling() {
                let stats = self.interfaces[in_interface].stats_mut();
                stats.control_cells += 1;
                stats.cells_delivered += 1;
                deliveries.push(delivery(true));
                continue;
            }

            self.interfaces[in_interface].stats_mut().cells_received += 1;

            if self.node_type == NodeType::EndSystem {
                self.interfaces[in_interface].stats_mut().cells_delivered += 1;
                deliveries.push(delivery(false));
                continue;
            }

            let Some(route) = self
                .router
                .route(circuit)
                .filter(|r| r.out_interface < self.interfaces.len())
            else {
                self.interfaces[in_interface].stats_mut().cells_no_route += 1;
                tracing::debug!(
                    node = self.id,
                    interface = in_interface,
                    vpi = circuit.vpi,
                    vci = circuit.vci,
                    "no route for cell, dropping"
                );
                continue;
            };

            let out = &mut self.interfaces[route.out_interface];
            let mut rewritten = header;
            rewritten.gfc = 0;
            rewritten.vpi = route.circuit.vpi;
            rewritten.vci = route.circuit.vci;
            cell.set_header(&rewritten, out.format());
            if !out.enqueue(in_interface + 1, cell, now, sink).is_inserted() {
                self.interfaces[in_interface].stats_mut().cells_dropped_in_transit += 1;
            }
        }
        deliveries
    }

    /// Called when `interface` finishes serialising a frame.
    pub fn on_transmission_finished(
        &mut self,
        interface: usize,
        now: Duration,
        sink: &mut impl EventSink,
    ) {
        self.interface_mut(interface)
            .on_transmission_finished(now, sink);
    }

    /// Admission check for a circuit's bandwidth on `outgoing`.
    ///
    /// `incoming` is the interface the circuit's cells arrive on, or `None`
    /// for traffic this node originates; the reservation lands on queue
    /// `incoming + 1` (or `outgoing + 1`) of the outgoing interface.
    pub fn reserve_bandwidth(
        &mut self,
        incoming: Option<usize>,
        outgoing: usize,
        bits: u64,
        is_add: bool,
    ) -> bool {
        let queue = incoming.unwrap_or(outgoing) + 1;
        let granted = self.interface_mut(outgoing).reserve(queue, bits, is_add);
        tracing::debug!(
            node = self.id,
            outgoing,
            queue,
            bits,
            is_add,
            granted,
            "bandwidth check"
        );
        granted
    }

    /// Reports every interface with statistics enabled.
    pub fn finalize(&self, elapsed: Duration, sink: &mut dyn StatsSink) {
        for iface in &self.interfaces {
            let report = iface.report(elapsed);
            if !report.is_empty() {
                sink.record(report);
            }
        }
    }
}
