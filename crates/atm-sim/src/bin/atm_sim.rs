use std::time::Duration;

use anyhow::{Context, Result};
use atm_layer2::metrics::render_prometheus;
use atm_layer2::stats::{StatsSink, TracingSink};
use atm_sim::network::Network;
use atm_sim::scenario;
use atm_sim::topology::Topology;

const USAGE: &str = "usage: atm-sim [--topology FILE | --scenario NAME] \
[--format json|prometheus|log] [--duration-ms N] [--seed N] [--list]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Json,
    Prometheus,
    Log,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut args = std::env::args().skip(1);
    let mut topology_path = None;
    let mut scenario_name = None;
    let mut output = Output::Json;
    let mut duration_ms = None;
    let mut seed = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--topology" => {
                topology_path = Some(args.next().context("missing --topology value")?);
            }
            "--scenario" => {
                scenario_name = Some(args.next().context("missing --scenario value")?);
            }
            "--format" => {
                output = match args.next().context("missing --format value")?.as_str() {
                    "json" => Output::Json,
                    "prometheus" => Output::Prometheus,
                    "log" => Output::Log,
                    other => anyhow::bail!("unknown format {other:?}\n{USAGE}"),
                };
            }
            "--duration-ms" => {
                let value = args.next().context("missing --duration-ms value")?;
                duration_ms = Some(value.parse::<u64>().context("--duration-ms")?);
            }
            "--seed" => {
                let value = args.next().context("missing --seed value")?;
                seed = Some(value.parse::<u64>().context("--seed")?);
            }
            "--list" => {
                for name in scenario::names() {
                    println!("{name}");
                }
                return Ok(());
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            other => anyhow::bail!("unexpected argument {other:?}\n{USAGE}"),
        }
    }

    let mut topology = match (topology_path, scenario_name) {
        (Some(path), None) => Topology::load(&path)?,
        (None, Some(name)) => scenario::builtin(&name)?,
        (None, None) => scenario::builtin("end_to_end")?,
        (Some(_), Some(_)) => anyhow::bail!("--topology and --scenario are exclusive"),
    };
    if let Some(ms) = duration_ms {
        topology.duration = Duration::from_millis(ms);
    }
    if let Some(seed) = seed {
        topology.seed = seed;
    }

    let mut network = Network::from_topology(topology)?;
    let summary = network.run();

    match output {
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Output::Prometheus => {
            print!("{}", render_prometheus(&summary.interfaces));
        }
        Output::Log => {
            let mut sink = TracingSink;
            for report in summary.interfaces {
                sink.record(report);
            }
        }
    }
    Ok(())
}
