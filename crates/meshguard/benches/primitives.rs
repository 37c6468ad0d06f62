//! Microbenchmarks for the hot paths.
//!
//! Every primitive here sits on a per-request path in a mesh client, so
//! the interesting numbers are single-call overheads:
//!
//! - `window_add`: one rotation check plus an accumulate under the lock
//! - `throttle_allow`: one window reduce plus at most one random draw
//! - `ring_get`: one hash plus a binary search over the virtual nodes
//!
//! Run with: `cargo bench -p meshguard`

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::{hint::black_box, time::Duration};

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use meshguard::{AdaptiveThrottle, ConsistentHash, RollingWindow, SingleFlight, ThrottleConfig};

fn bench_window_add(c: &mut Criterion) {
    let win = RollingWindow::builder().size(40).interval(Duration::from_millis(250)).build();
    c.bench_function("window_add", |b| {
        b.iter(|| win.add(black_box(1.0)));
    });
}

fn bench_window_reduce(c: &mut Criterion) {
    let win = RollingWindow::builder().size(40).interval(Duration::from_millis(250)).build();
    for _ in 0..10_000 {
        win.add(1.0);
    }
    c.bench_function("window_reduce", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            win.reduce(|bucket| sum += bucket.sum);
            black_box(sum)
        });
    });
}

fn bench_throttle_allow(c: &mut Criterion) {
    let throttle = AdaptiveThrottle::new(ThrottleConfig::default());
    for _ in 0..1_000 {
        if let Ok(permit) = throttle.allow() {
            permit.accept();
        }
    }
    c.bench_function("throttle_allow", |b| {
        b.iter(|| {
            if let Ok(permit) = throttle.allow() {
                permit.accept();
            }
        });
    });
}

fn bench_singleflight_uncontended(c: &mut Criterion) {
    let group: SingleFlight<u64, std::convert::Infallible> = SingleFlight::new();
    c.bench_function("singleflight_uncontended", |b| {
        b.iter(|| group.run("key", || Ok(black_box(1))).unwrap());
    });
}

fn bench_ring_get(c: &mut Criterion) {
    let mut bench_group = c.benchmark_group("ring_get");
    for node_count in [4usize, 16, 64] {
        let ring = ConsistentHash::new();
        for i in 0..node_count {
            ring.add(format!("node-{i}"));
        }
        bench_group.bench_with_input(
            BenchmarkId::from_parameter(node_count),
            &node_count,
            |b, _| {
                let mut i = 0u64;
                b.iter(|| {
                    i = i.wrapping_add(1);
                    ring.get(black_box(i)).unwrap()
                });
            },
        );
    }
    bench_group.finish();
}

criterion_group!(
    benches,
    bench_window_add,
    bench_window_reduce,
    bench_throttle_allow,
    bench_singleflight_uncontended,
    bench_ring_get,
);
criterion_main!(benches);
