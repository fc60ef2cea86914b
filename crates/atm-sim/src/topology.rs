//! TOML topology: nodes, links, circuits and traffic.
//!
//! ```toml
//! seed = 7
//! duration_ms = 2000
//!
//! [defaults]
//! link_bandwidth_bps = 112000
//! layer2_statistics = true
//!
//! [[nodes]]
//! name = "a"
//! kind = "end_system"
//!
//! [[nodes]]
//! name = "sw"
//! kind = "switch"
//!
//! [[links]]
//! a = "a"
//! b = "sw"
//! propagation_delay_ms = 5
//!
//! [[circuits]]
//! name = "video"
//! path = ["a", "sw", "b"]
//! vpi = 1
//! vci = 32
//! bandwidth_bps = 56000
//!
//! [[traffic]]
//! circuit = "video"
//! interval_ms = 20
//! count = 100
//! unit_bytes = 192
//! ```
//!
//! Interfaces are numbered per node in the order its links appear. A
//! circuit uses VCI `vci + k` on the `k`-th link of its path, so every
//! switch along the way rewrites the header.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use atm_layer2::cell::{Circuit, HeaderFormat};
use atm_layer2::config::{Layer2Config, Layer2ConfigInput};
use atm_layer2::event::Endpoint;
use atm_layer2::node::{interface_format, NodeType};
use serde::Deserialize;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// Label used in traffic entries to send on the signalling circuit.
pub const SIGNALLING: &str = "signalling";

// ─── Raw input ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyInput {
    pub seed: u64,
    pub duration_ms: Option<u64>,
    pub defaults: Layer2ConfigInput,
    pub nodes: Vec<NodeInput>,
    pub links: Vec<LinkInput>,
    pub circuits: Vec<CircuitInput>,
    pub traffic: Vec<TrafficInput>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Static,
    #[default]
    Signaled,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeInput {
    pub name: String,
    pub kind: Option<NodeType>,
    pub routing: RoutingMode,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkInput {
    pub a: String,
    pub b: String,
    #[serde(flatten)]
    pub config: Layer2ConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CircuitInput {
    pub name: String,
    pub path: Vec<String>,
    pub vpi: u16,
    pub vci: u16,
    pub bandwidth_bps: u64,
    pub release_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrafficInput {
    /// Circuit name, or `"signalling"` for one-hop control traffic.
    pub circuit: String,
    /// Required for signalling traffic.
    pub from: Option<String>,
    pub to: Option<String>,
    pub start_ms: f64,
    pub interval_ms: f64,
    pub count: u64,
    pub unit_bytes: usize,
    /// Uniform jitter applied to each interval, as a fraction of it.
    pub jitter: f64,
    pub congestion_experienced: bool,
    pub low_priority: bool,
}

// ─── Resolved topology ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NodeDef {
    pub name: String,
    pub kind: NodeType,
    pub routing: RoutingMode,
    /// One entry per interface, in interface order.
    pub interfaces: Vec<InterfaceDef>,
}

#[derive(Debug, Clone)]
pub struct InterfaceDef {
    pub peer: Endpoint,
    pub format: HeaderFormat,
    pub config: Layer2Config,
}

/// One node's part in a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub node: usize,
    /// `None` where the circuit originates.
    pub in_interface: Option<usize>,
    pub in_circuit: Circuit,
    pub out_interface: usize,
    pub out_circuit: Circuit,
}

#[derive(Debug, Clone)]
pub struct CircuitDef {
    pub name: String,
    pub hops: Vec<Hop>,
    pub destination: usize,
    pub bandwidth_bps: u64,
    pub release_at: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TrafficDef {
    pub node: usize,
    pub out_interface: usize,
    pub circuit: Circuit,
    pub start: Duration,
    pub interval: Duration,
    pub count: u64,
    pub unit_bytes: usize,
    pub jitter: f64,
    pub congestion_experienced: bool,
    pub low_priority: bool,
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub seed: u64,
    pub duration: Duration,
    pub nodes: Vec<NodeDef>,
    pub circuits: Vec<CircuitDef>,
    pub traffic: Vec<TrafficDef>,
}

impl Topology {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let parsed: TopologyInput = toml::from_str(input).context("invalid topology TOML")?;
        parsed.resolve()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading topology {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading topology {}", path.display()))
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Interface of `node` whose link leads to `peer`.
    pub fn interface_towards(&self, node: usize, peer: usize) -> Option<usize> {
        self.nodes[node]
            .interfaces
            .iter()
            .position(|i| i.peer.node == peer)
    }
}

fn millis(ms: f64) -> Duration {
    Duration::from_nanos((ms.max(0.0) * 1_000_000.0).round() as u64)
}

impl TopologyInput {
    pub fn resolve(self) -> Result<Topology> {
        let mut names = HashMap::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (idx, node) in self.nodes.into_iter().enumerate() {
            let name = node.name.trim().to_string();
            anyhow::ensure!(!name.is_empty(), "node {idx} has no name");
            anyhow::ensure!(
                names.insert(name.clone(), idx).is_none(),
                "node {name:?} is defined twice"
            );
            nodes.push(NodeDef {
                name,
                kind: node.kind.unwrap_or(NodeType::EndSystem),
                routing: node.routing,
                interfaces: Vec::new(),
            });
        }
        let lookup = |name: &str| -> Result<usize> {
            names
                .get(name.trim())
                .copied()
                .ok_or_else(|| anyhow::anyhow!("unknown node {name:?}"))
        };

        for (idx, link) in self.links.into_iter().enumerate() {
            let a = lookup(link.a.as_str()).with_context(|| format!("link {idx}"))?;
            let b = lookup(link.b.as_str()).with_context(|| format!("link {idx}"))?;
            anyhow::ensure!(a != b, "link {idx} connects node {:?} to itself", link.a);
            let config = link
                .config
                .or(&self.defaults)
                .resolve()
                .with_context(|| format!("link {idx} ({} - {})", link.a, link.b))?;
            let format = interface_format(nodes[a].kind, nodes[b].kind);
            let a_if = nodes[a].interfaces.len();
            let b_if = nodes[b].interfaces.len();
            nodes[a].interfaces.push(InterfaceDef {
                peer: Endpoint::new(b, b_if),
                format,
                config: config.clone(),
            });
            nodes[b].interfaces.push(InterfaceDef {
                peer: Endpoint::new(a, a_if),
                format,
                config,
            });
        }

        let mut topology = Topology {
            seed: self.seed,
            duration: self
                .duration_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DURATION),
            nodes,
            circuits: Vec::new(),
            traffic: Vec::new(),
        };

        for circuit in self.circuits {
            let def = resolve_circuit(&topology, &circuit, &lookup)
                .with_context(|| format!("circuit {:?}", circuit.name))?;
            topology.circuits.push(def);
        }

        for (idx, t) in self.traffic.into_iter().enumerate() {
            let def = resolve_traffic(&topology, &t, &lookup)
                .with_context(|| format!("traffic {idx} on {:?}", t.circuit))?;
            topology.traffic.push(def);
        }

        Ok(topology)
    }
}

fn resolve_circuit(
    topology: &Topology,
    input: &CircuitInput,
    lookup: &impl Fn(&str) -> Result<usize>,
) -> Result<CircuitDef> {
    anyhow::ensure!(input.path.len() >= 2, "path needs at least two nodes");
    let path = input
        .path
        .iter()
        .map(|n| lookup(n.as_str()))
        .collect::<Result<Vec<_>>>()?;

    let label = |k: usize| -> Result<Circuit> {
        let vci = u16::try_from(usize::from(input.vci) + k)
            .map_err(|_| anyhow::anyhow!("VCI overflows on hop {k}"))?;
        let circuit = Circuit::new(input.vpi, vci);
        anyhow::ensure!(!circuit.is_signalling(), "circuit collides with the signalling circuit");
        Ok(circuit)
    };

    let mut hops = Vec::with_capacity(path.len() - 1);
    for k in 0..path.len() - 1 {
        let node = path[k];
        if k > 0 {
            anyhow::ensure!(
                topology.nodes[node].kind == NodeType::Switch,
                "{:?} is not a switch",
                topology.nodes[node].name
            );
        }
        let out_interface = topology
            .interface_towards(node, path[k + 1])
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no link between {:?} and {:?}",
                    topology.nodes[node].name,
                    topology.nodes[path[k + 1]].name
                )
            })?;
        let format = topology.nodes[node].interfaces[out_interface].format;
        anyhow::ensure!(
            input.vpi <= format.max_vpi(),
            "VPI {} does not fit a {format:?} header",
            input.vpi
        );
        let in_interface = if k == 0 {
            None
        } else {
            topology.interface_towards(node, path[k - 1])
        };
        hops.push(Hop {
            node,
            in_interface,
            in_circuit: if k == 0 { label(0)? } else { label(k - 1)? },
            out_interface,
            out_circuit: label(k)?,
        });
    }

    Ok(CircuitDef {
        name: input.name.clone(),
        hops,
        destination: path[path.len() - 1],
        bandwidth_bps: input.bandwidth_bps,
        release_at: input.release_at_ms.map(Duration::from_millis),
    })
}

fn resolve_traffic(
    topology: &Topology,
    input: &TrafficInput,
    lookup: &impl Fn(&str) -> Result<usize>,
) -> Result<TrafficDef> {
    anyhow::ensure!(input.interval_ms > 0.0 || input.count <= 1, "interval_ms must be positive");
    anyhow::ensure!((0.0..=1.0).contains(&input.jitter), "jitter must lie in [0, 1]");

    let (node, out_interface, circuit) = if input.circuit == SIGNALLING {
        let from = input
            .from
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("signalling traffic needs `from`"))?;
        let to = input
            .to
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("signalling traffic needs `to`"))?;
        let (from, to) = (lookup(from)?, lookup(to)?);
        let out = topology
            .interface_towards(from, to)
            .ok_or_else(|| anyhow::anyhow!("no link for signalling traffic"))?;
        (from, out, Circuit::SIGNALLING)
    } else {
        let def = topology
            .circuits
            .iter()
            .find(|c| c.name == input.circuit)
            .ok_or_else(|| anyhow::anyhow!("unknown circuit"))?;
        let first = &def.hops[0];
        (first.node, first.out_interface, first.out_circuit)
    };

    Ok(TrafficDef {
        node,
        out_interface,
        circuit,
        start: millis(input.start_ms),
        interval: millis(input.interval_ms),
        count: input.count,
        unit_bytes: input.unit_bytes,
        jitter: input.jitter,
        congestion_experienced: input.congestion_experienced,
        low_priority: input.low_priority,
    })
}
