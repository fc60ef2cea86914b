//! # Prometheus Metrics
//!
//! Renders end-of-run interface reports in Prometheus text exposition
//! format. Interfaces without a section enabled contribute no samples to
//! that section's families.

use std::fmt::Write;

use crate::stats::{InterfaceReport, Layer2Report};

fn family(out: &mut String, name: &str, help: &str, kind: &str) {
    writeln!(out, "# HELP {name} {help}").unwrap();
    writeln!(out, "# TYPE {name} {kind}").unwrap();
}

/// Render interface reports as Prometheus text exposition format.
pub fn render_prometheus(reports: &[InterfaceReport]) -> String {
    let mut out = String::with_capacity(4096);

    // ── Layer-2 counters ────────────────────────────────────────

    let layer2: Vec<_> = reports
        .iter()
        .filter_map(|r| r.layer2.as_ref().map(|l2| (r.node, r.interface, l2)))
        .collect();

    let counters: [(&str, &str, fn(&Layer2Report) -> u64); 7] = [
        (
            "atm_cells_received_total",
            "Data cells received on the interface.",
            |l: &Layer2Report| l.counters.cells_received,
        ),
        (
            "atm_cells_forwarded_total",
            "Cells transmitted on the interface.",
            |l: &Layer2Report| l.counters.cells_forwarded,
        ),
        (
            "atm_cells_no_route_total",
            "Cells discarded for lack of a translation entry.",
            |l: &Layer2Report| l.counters.cells_no_route,
        ),
        (
            "atm_cells_dropped_in_transit_total",
            "Switched cells refused by the outgoing queue.",
            |l: &Layer2Report| l.counters.cells_dropped_in_transit,
        ),
        (
            "atm_control_cells_total",
            "Signalling cells received.",
            |l: &Layer2Report| l.counters.control_cells,
        ),
        (
            "atm_cells_delivered_total",
            "Cells delivered to the adaptation layer.",
            |l: &Layer2Report| l.counters.cells_delivered,
        ),
        (
            "atm_frames_sent_total",
            "Frames put on the link.",
            |l: &Layer2Report| l.frames_sent,
        ),
    ];
    for (name, help, value) in counters {
        family(&mut out, name, help, "counter");
        for (node, iface, l2) in &layer2 {
            writeln!(
                out,
                "{name}{{node=\"{node}\",interface=\"{iface}\"}} {}",
                value(*l2)
            )
            .unwrap();
        }
    }

    family(
        &mut out,
        "atm_link_utilization",
        "Fraction of elapsed time the link spent transmitting (0.0-1.0).",
        "gauge",
    );
    for (node, iface, l2) in &layer2 {
        writeln!(
            out,
            "atm_link_utilization{{node=\"{node}\",interface=\"{iface}\"}} {:.6}",
            l2.link_utilization
        )
        .unwrap();
    }

    // ── Scheduler slots ─────────────────────────────────────────

    let slots: Vec<_> = reports
        .iter()
        .filter_map(|r| r.scheduler.as_ref().map(|s| (r.node, r.interface, s)))
        .flat_map(|(node, iface, s)| s.iter().map(move |slot| (node, iface, slot)))
        .collect();

    family(
        &mut out,
        "atm_queue_cells_dequeued_total",
        "Cells served from the queue.",
        "counter",
    );
    for (node, iface, slot) in &slots {
        writeln!(
            out,
            "atm_queue_cells_dequeued_total{{node=\"{node}\",interface=\"{iface}\",queue=\"{}\"}} {}",
            slot.priority, slot.cells_dequeued
        )
        .unwrap();
    }

    family(
        &mut out,
        "atm_queue_cells_dropped_total",
        "Cells refused by the queue.",
        "counter",
    );
    for (node, iface, slot) in &slots {
        for (reason, n) in [
            ("red", slot.queue.dropped_red),
            ("full", slot.queue.dropped_full),
        ] {
            writeln!(
                out,
                "atm_queue_cells_dropped_total{{node=\"{node}\",interface=\"{iface}\",queue=\"{}\",reason=\"{reason}\"}} {n}",
                slot.priority
            )
            .unwrap();
        }
    }

    family(
        &mut out,
        "atm_queue_service_ratio",
        "Dequeued cells over dequeue opportunities while backlogged.",
        "gauge",
    );
    for (node, iface, slot) in &slots {
        writeln!(
            out,
            "atm_queue_service_ratio{{node=\"{node}\",interface=\"{iface}\",queue=\"{}\"}} {:.6}",
            slot.priority, slot.service_ratio
        )
        .unwrap();
    }

    family(
        &mut out,
        "atm_queue_red_average",
        "RED average queue occupancy in cells.",
        "gauge",
    );
    for (node, iface, slot) in &slots {
        writeln!(
            out,
            "atm_queue_red_average{{node=\"{node}\",interface=\"{iface}\",queue=\"{}\"}} {:.3}",
            slot.priority, slot.queue.red_average
        )
        .unwrap();
    }

    // ── Aggregate metrics ───────────────────────────────────────

    let total_forwarded: u64 = layer2.iter().map(|(_, _, l)| l.counters.cells_forwarded).sum();
    family(
        &mut out,
        "atm_cells_forwarded_all_total",
        "Cells transmitted across all reported interfaces.",
        "counter",
    );
    writeln!(out, "atm_cells_forwarded_all_total {total_forwarded}").unwrap();

    out
}
