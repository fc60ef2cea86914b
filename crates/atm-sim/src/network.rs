//! Drives a [`Topology`] of layer-2 nodes through simulated time.

use std::time::Duration;

use anyhow::{Context, Result};
use atm_layer2::event::{Event, EventQueue};
use atm_layer2::framer::DataUnit;
use atm_layer2::interface::InterfaceSetup;
use atm_layer2::node::Node;
use atm_layer2::routing::{
    CircuitRouter, Route, RoutingError, SignaledTranslationTable, StaticTranslationTable,
};
use atm_layer2::stats::InterfaceReport;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::Serialize;

use crate::topology::{CircuitDef, RoutingMode, Topology, TrafficDef};

/// Everything the network's event queue carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Layer2(Event),
    /// Next data unit from traffic source `source`.
    Emit { source: usize },
    /// Tear down circuit `circuit` along its whole path.
    Release { circuit: usize },
}

impl From<Event> for SimEvent {
    fn from(event: Event) -> Self {
        SimEvent::Layer2(event)
    }
}

/// What a node handed up to its adaptation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub cells: u64,
    pub control_cells: u64,
    /// Data cells carrying end-of-PDU.
    pub units: u64,
    pub congestion_marked: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: usize,
    pub name: String,
    #[serde(flatten)]
    pub delivered: DeliveryStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub elapsed_ns: u64,
    pub events: u64,
    pub units_sent: u64,
    pub cells_sent: u64,
    pub cells_marked_on_send: u64,
    pub cells_dropped_on_send: u64,
    pub nodes: Vec<NodeSummary>,
    pub interfaces: Vec<InterfaceReport>,
}

impl RunSummary {
    pub fn node(&self, name: &str) -> Option<&NodeSummary> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn interface(&self, node: usize, interface: usize) -> Option<&InterfaceReport> {
        self.interfaces
            .iter()
            .find(|r| r.node == node && r.interface == interface)
    }
}

#[derive(Debug)]
struct Source {
    def: TrafficDef,
    emitted: u64,
}

#[derive(Debug)]
pub struct Network {
    names: Vec<String>,
    nodes: Vec<Node>,
    circuits: Vec<CircuitDef>,
    sources: Vec<Source>,
    events: EventQueue<SimEvent>,
    rng: StdRng,
    end: Duration,
    processed: u64,
    units_sent: u64,
    cells_sent: u64,
    cells_marked: u64,
    cells_dropped: u64,
    delivered: Vec<DeliveryStats>,
}

fn build_router(topology: &Topology, node: usize) -> Result<Box<dyn CircuitRouter>> {
    let entries = topology.circuits.iter().flat_map(|c| {
        c.hops.iter().filter(|h| h.node == node && h.in_interface.is_some()).map(|h| {
            (
                h.in_circuit,
                Route {
                    out_interface: h.out_interface,
                    circuit: h.out_circuit,
                },
            )
        })
    });

    let router: Box<dyn CircuitRouter> = match topology.nodes[node].routing {
        RoutingMode::Static => Box::new(StaticTranslationTable::from_entries(entries)?),
        RoutingMode::Signaled => {
            let mut table = SignaledTranslationTable::new();
            for (circuit, route) in entries {
                table.install(circuit, route)?;
            }
            Box::new(table)
        }
    };
    Ok(router)
}

impl Network {
    pub fn from_topology(topology: Topology) -> Result<Self> {
        let mut nodes = Vec::with_capacity(topology.nodes.len());
        for (id, def) in topology.nodes.iter().enumerate() {
            let router = build_router(&topology, id)
                .with_context(|| format!("routing table for {:?}", def.name))?;
            let setups = def
                .interfaces
                .iter()
                .map(|i| InterfaceSetup {
                    format: i.format,
                    peer: Some(i.peer),
                    config: i.config.clone(),
                })
                .collect();
            nodes.push(Node::new(
                id,
                def.kind,
                router,
                setups,
                topology.seed,
                Duration::ZERO,
            ));
        }

        for circuit in &topology.circuits {
            if circuit.bandwidth_bps == 0 {
                continue;
            }
            for hop in &circuit.hops {
                let granted = nodes[hop.node].reserve_bandwidth(
                    hop.in_interface,
                    hop.out_interface,
                    circuit.bandwidth_bps,
                    true,
                );
                if !granted {
                    tracing::warn!(
                        circuit = %circuit.name,
                        node = %topology.nodes[hop.node].name,
                        bandwidth_bps = circuit.bandwidth_bps,
                        "reservation refused, circuit runs best effort on this hop"
                    );
                }
            }
        }

        let mut events = EventQueue::new();
        for (idx, def) in topology.traffic.iter().enumerate() {
            if def.count > 0 {
                events.schedule_at(def.start, SimEvent::Emit { source: idx });
            }
        }
        for (idx, circuit) in topology.circuits.iter().enumerate() {
            if let Some(at) = circuit.release_at {
                events.schedule_at(at, SimEvent::Release { circuit: idx });
            }
        }

        tracing::info!(
            nodes = nodes.len(),
            circuits = topology.circuits.len(),
            sources = topology.traffic.len(),
            seed = topology.seed,
            duration_ms = topology.duration.as_millis() as u64,
            "network built"
        );

        Ok(Network {
            names: topology.nodes.iter().map(|n| n.name.clone()).collect(),
            delivered: vec![DeliveryStats::default(); nodes.len()],
            nodes,
            circuits: topology.circuits,
            sources: topology
                .traffic
                .into_iter()
                .map(|def| Source { def, emitted: 0 })
                .collect(),
            events,
            rng: StdRng::seed_from_u64(topology.seed),
            end: topology.duration,
            processed: 0,
            units_sent: 0,
            cells_sent: 0,
            cells_marked: 0,
            cells_dropped: 0,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn now(&self) -> Duration {
        self.events.now()
    }

    pub fn end(&self) -> Duration {
        self.end
    }

    /// Processes the next event. Returns `false` once the queue is empty or
    /// the next event lies past the end of the run.
    pub fn step(&mut self) -> bool {
        match self.events.peek_time() {
            Some(at) if at <= self.end => {}
            _ => return false,
        }
        let Some((now, event)) = self.events.pop() else {
            return false;
        };
        self.processed += 1;

        match event {
            SimEvent::Layer2(Event::FrameArrival { to, frame }) => {
                let deliveries =
                    self.nodes[to.node].receive_frame(to.interface, frame, now, &mut self.events);
                let stats = &mut self.delivered[to.node];
                for d in deliveries {
                    if d.control {
                        stats.control_cells += 1;
                        continue;
                    }
                    stats.cells += 1;
                    if d.end_of_pdu {
                        stats.units += 1;
                    }
                    if d.congestion_experienced {
                        stats.congestion_marked += 1;
                    }
                }
            }
            SimEvent::Layer2(Event::TransmissionFinished { at }) => {
                self.nodes[at.node].on_transmission_finished(at.interface, now, &mut self.events);
            }
            SimEvent::Emit { source } => self.emit(source, now),
            SimEvent::Release { circuit } => self.release(circuit),
        }
        true
    }

    fn emit(&mut self, source: usize, now: Duration) {
        let src = &mut self.sources[source];
        let def = &src.def;
        let unit = DataUnit {
            circuit: def.circuit,
            payload: Bytes::from(vec![src.emitted as u8; def.unit_bytes]),
            congestion_experienced: def.congestion_experienced,
            low_priority: def.low_priority,
        };
        let sent = self.nodes[def.node].send(def.out_interface, &unit, now, &mut self.events);
        self.units_sent += 1;
        self.cells_sent += sent.cells as u64;
        self.cells_marked += sent.marked as u64;
        self.cells_dropped += sent.dropped as u64;

        src.emitted += 1;
        if src.emitted < def.count {
            let spread = if def.jitter > 0.0 {
                def.jitter * (2.0 * self.rng.random::<f64>() - 1.0)
            } else {
                0.0
            };
            let gap = def.interval.mul_f64(1.0 + spread);
            self.events.schedule_in(gap, SimEvent::Emit { source });
        }
    }

    fn release(&mut self, circuit: usize) {
        let def = &self.circuits[circuit];
        for hop in &def.hops {
            let node = &mut self.nodes[hop.node];
            if hop.in_interface.is_some() {
                match node.router_mut().release(hop.in_circuit) {
                    Ok(_) => {}
                    Err(RoutingError::ReadOnly) => tracing::warn!(
                        circuit = %def.name,
                        node = %self.names[hop.node],
                        "static routes cannot be released"
                    ),
                    Err(e) => tracing::warn!(circuit = %def.name, error = %e, "release failed"),
                }
            }
            if def.bandwidth_bps > 0 {
                node.reserve_bandwidth(
                    hop.in_interface,
                    hop.out_interface,
                    def.bandwidth_bps,
                    false,
                );
            }
        }
        tracing::info!(circuit = %def.name, "circuit released");
    }

    /// Runs to the end time and collects the final reports.
    pub fn run(&mut self) -> RunSummary {
        while self.step() {}
        let summary = self.summary();
        tracing::info!(
            events = summary.events,
            units_sent = summary.units_sent,
            cells_dropped_on_send = summary.cells_dropped_on_send,
            "run finished"
        );
        summary
    }

    pub fn summary(&self) -> RunSummary {
        let mut interfaces = Vec::new();
        for node in &self.nodes {
            node.finalize(self.end, &mut interfaces);
        }
        RunSummary {
            elapsed_ns: self.end.as_nanos() as u64,
            events: self.processed,
            units_sent: self.units_sent,
            cells_sent: self.cells_sent,
            cells_marked_on_send: self.cells_marked,
            cells_dropped_on_send: self.cells_dropped,
            nodes: self
                .names
                .iter()
                .zip(&self.delivered)
                .enumerate()
                .map(|(id, (name, delivered))| NodeSummary {
                    id,
                    name: name.clone(),
                    delivered: delivered.clone(),
                })
                .collect(),
            interfaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR: &str = r#"
        duration_ms = 1000

        [defaults]
        link_bandwidth_bps = 112000
        propagation_delay_ms = 10
        layer2_statistics = true

        [[nodes]]
        name = "a"
        [[nodes]]
        name = "b"

        [[links]]
        a = "a"
        b = "b"

        [[circuits]]
        name = "c"
        path = ["a", "b"]
        vpi = 1
        vci = 32
        bandwidth_bps = 112000

        [[traffic]]
        circuit = "c"
        interval_ms = 20
        count = 10
        unit_bytes = 48
    "#;

    #[test]
    fn step_stops_at_end_time() {
        let mut topology = Topology::from_toml_str(PAIR).unwrap();
        topology.duration = Duration::from_millis(5);
        let mut net = Network::from_topology(topology).unwrap();
        while net.step() {}
        assert!(net.now() <= Duration::from_millis(5));
        let summary = net.summary();
        assert_eq!(summary.units_sent, 1);
        assert_eq!(summary.node("b").unwrap().delivered.cells, 0);
    }

    #[test]
    fn every_unit_reaches_the_far_end() {
        let mut net = Network::from_topology(Topology::from_toml_str(PAIR).unwrap()).unwrap();
        let summary = net.run();
        assert_eq!(summary.units_sent, 10);
        assert_eq!(summary.cells_sent, 10);
        let b = summary.node("b").unwrap();
        assert_eq!(b.delivered.cells, 10);
        assert_eq!(b.delivered.units, 10);
        assert_eq!(summary.interface(1, 0).unwrap().layer2.as_ref().unwrap().counters.cells_received, 10);
    }

    #[test]
    fn jitter_is_reproducible() {
        let toml = PAIR.replace("unit_bytes = 48", "unit_bytes = 48\njitter = 0.5");
        let run = || {
            let mut net = Network::from_topology(Topology::from_toml_str(&toml).unwrap()).unwrap();
            serde_json::to_string(&net.run()).unwrap()
        };
        assert_eq!(run(), run());
    }
}
