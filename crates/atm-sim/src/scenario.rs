//! Topologies shipped with the simulator.

use anyhow::Result;

use crate::topology::Topology;

const BUILTIN: &[(&str, &str)] = &[
    ("end_to_end", include_str!("../scenarios/end_to_end.toml")),
    ("switched", include_str!("../scenarios/switched.toml")),
    ("zero_bandwidth", include_str!("../scenarios/zero_bandwidth.toml")),
];

/// Names accepted by [`builtin`].
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTIN.iter().map(|(name, _)| *name)
}

/// Parses the built-in topology `name`.
pub fn builtin(name: &str) -> Result<Topology> {
    let (_, text) = BUILTIN
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "unknown scenario {name:?} (available: {})",
                names().collect::<Vec<_>>().join(", ")
            )
        })?;
    Topology::from_toml_str(text)
}
