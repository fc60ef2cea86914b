//! Discrete-event network simulator built on `atm-layer2`.
//!
//! Reads a TOML topology of end systems, switches and point-to-point
//! links, sets up permanent circuits with their bandwidth reservations,
//! drives traffic sources through the layer-2 models and reports the
//! per-interface statistics at the end of the run.

pub mod network;
pub mod scenario;
pub mod topology;
