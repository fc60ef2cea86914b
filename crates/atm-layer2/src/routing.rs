//! VPI/VCI translation tables used by switches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cell::Circuit;

/// Where a switched cell goes next and the circuit it carries there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub out_interface: usize,
    pub circuit: Circuit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("circuit {}/{} already has a route", .0.vpi, .0.vci)]
    AlreadyInstalled(Circuit),
    #[error("circuit {}/{} has no route", .0.vpi, .0.vci)]
    NotInstalled(Circuit),
    #[error("translation table is static")]
    ReadOnly,
}

/// Lookup from an incoming circuit to its outgoing interface and circuit.
pub trait CircuitRouter: std::fmt::Debug {
    fn route(&self, circuit: Circuit) -> Option<Route>;

    fn install(&mut self, circuit: Circuit, route: Route) -> Result<(), RoutingError> {
        let _ = (circuit, route);
        Err(RoutingError::ReadOnly)
    }

    fn release(&mut self, circuit: Circuit) -> Result<Route, RoutingError> {
        let _ = circuit;
        Err(RoutingError::ReadOnly)
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed table built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTranslationTable {
    entries: HashMap<Circuit, Route>,
}

impl StaticTranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails on the first circuit listed twice.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (Circuit, Route)>,
    ) -> Result<Self, RoutingError> {
        let mut map = HashMap::new();
        for (circuit, route) in entries {
            if map.insert(circuit, route).is_some() {
                return Err(RoutingError::AlreadyInstalled(circuit));
            }
        }
        Ok(Self { entries: map })
    }
}

impl CircuitRouter for StaticTranslationTable {
    fn route(&self, circuit: Circuit) -> Option<Route> {
        self.entries.get(&circuit).copied()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Table populated at run time as circuits are set up and torn down.
#[derive(Debug, Clone, Default)]
pub struct SignaledTranslationTable {
    entries: HashMap<Circuit, Route>,
    installed: u64,
    released: u64,
}

impl SignaledTranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Circuits set up over the table's lifetime.
    pub fn installed(&self) -> u64 {
        self.installed
    }

    pub fn released(&self) -> u64 {
        self.released
    }
}

impl CircuitRouter for SignaledTranslationTable {
    fn route(&self, circuit: Circuit) -> Option<Route> {
        self.entries.get(&circuit).copied()
    }

    fn install(&mut self, circuit: Circuit, route: Route) -> Result<(), RoutingError> {
        if self.entries.contains_key(&circuit) {
            return Err(RoutingError::AlreadyInstalled(circuit));
        }
        tracing::debug!(
            vpi = circuit.vpi,
            vci = circuit.vci,
            out_interface = route.out_interface,
            "circuit installed"
        );
        self.entries.insert(circuit, route);
        self.installed += 1;
        Ok(())
    }

    fn release(&mut self, circuit: Circuit) -> Result<Route, RoutingError> {
        let route = self
            .entries
            .remove(&circuit)
            .ok_or(RoutingError::NotInstalled(circuit))?;
        tracing::debug!(vpi = circuit.vpi, vci = circuit.vci, "circuit released");
        self.released += 1;
        Ok(route)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
