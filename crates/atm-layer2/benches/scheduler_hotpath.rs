//! Per-cell scheduling cost for atm-layer2.
//!
//! Measures:
//! - RedQueue insert + dequeue with RED active
//! - WrrScheduler select_next across 3 and 8 reserved queues
//! - assemble_frame from a backlogged scheduler
//!
//! Run with: cargo bench --package atm-layer2

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use atm_layer2::cell::{Cell, CellHeader, Circuit, HeaderFormat, CELL_LEN};
use atm_layer2::framer::assemble_frame;
use atm_layer2::queue::{QueueOperation, RedQueue};
use atm_layer2::red::RedParams;
use atm_layer2::scheduler::{WrrScheduler, CONTROL_PRIORITY};

const LINK_BPS: u64 = 155_520_000;

fn cell(vci: u16) -> Cell {
    Cell::new(
        &CellHeader::for_circuit(Circuit::new(1, vci)),
        HeaderFormat::Nni,
        &[0x5A; 48],
    )
}

fn red_params() -> RedParams {
    RedParams {
        min_threshold: 50.0,
        max_threshold: 150.0,
        queue_weight: 0.002,
        ..Default::default()
    }
}

fn scheduler(queues: usize) -> WrrScheduler {
    let mut s = WrrScheduler::new(LINK_BPS);
    s.add_queue(
        RedQueue::new(0, 1 << 20, red_params(), 0, Duration::ZERO),
        CONTROL_PRIORITY,
        0,
    );
    let share = LINK_BPS / queues as u64;
    for p in 1..=queues {
        s.add_queue(
            RedQueue::new(p, 1 << 20, red_params(), p as u64, Duration::ZERO),
            p,
            share * (1 + (p as u64 % 2)) / 2,
        );
    }
    s
}

fn bench_queue_insert_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("red_queue");
    group.throughput(Throughput::Bytes(CELL_LEN as u64));

    let mut q = RedQueue::new(1, 1 << 20, red_params(), 9, Duration::ZERO);
    let template = cell(32);
    let mut now = Duration::ZERO;
    group.bench_function("insert_dequeue", |b| {
        b.iter(|| {
            now += Duration::from_micros(3);
            black_box(q.insert(template.clone(), now));
            black_box(q.retrieve(QueueOperation::Dequeue, now));
        });
    });
    group.finish();
}

fn bench_select_next(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrr_select_next");
    group.throughput(Throughput::Elements(1));

    for queues in [3usize, 8] {
        let mut s = scheduler(queues);
        let template = cell(32);
        group.bench_function(format!("{queues}_queues"), |b| {
            b.iter(|| {
                for p in 1..=queues {
                    s.insert(p, template.clone(), Duration::ZERO);
                }
                for _ in 0..queues {
                    black_box(s.select_next(Duration::ZERO));
                }
            });
        });
    }
    group.finish();
}

fn bench_assemble_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble_frame");
    let mut s = scheduler(4);
    let template = cell(40);
    group.bench_function("backlogged_4_queues", |b| {
        b.iter(|| {
            for p in 1..=4 {
                s.insert(p, template.clone(), Duration::ZERO);
            }
            black_box(assemble_frame(&mut s, Duration::ZERO));
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_queue_insert_dequeue,
    bench_select_next,
    bench_assemble_frame
);
criterion_main!(benches);
