//! Cross-component concurrency tests.
//!
//! These tests hammer each primitive from many threads at once and check
//! that the aggregate bookkeeping stays exact. They complement the
//! per-module unit tests, which cover semantics single-threaded.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use meshguard::{AdaptiveThrottle, ConsistentHash, RollingWindow, SingleFlight, ThrottleConfig};

/// Reduces a window into a single (sum, count) pair.
fn totals(win: &RollingWindow) -> (f64, u64) {
    let mut sum = 0.0;
    let mut count = 0;
    win.reduce(|b| {
        sum += b.sum;
        count += b.count;
    });
    (sum, count)
}

#[test]
fn window_survives_concurrent_adds_and_reduces() {
    let win = Arc::new(
        RollingWindow::builder().size(40).interval(Duration::from_secs(3600)).build(),
    );
    let start = Arc::new(Barrier::new(9));

    let writers: Vec<_> = (0..8)
        .map(|_| {
            let win = Arc::clone(&win);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..5_000 {
                    win.add(1.0);
                }
            })
        })
        .collect();

    // Readers run alongside the writers; every observation must be a
    // consistent prefix of the add history.
    let reader = {
        let win = Arc::clone(&win);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            for _ in 0..1_000 {
                let (sum, count) = totals(&win);
                assert!(sum <= 40_000.0);
                assert_eq!(sum, count as f64);
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(totals(&win), (40_000.0, 40_000));
}

#[test]
fn singleflight_storm_executes_once_per_generation() {
    let group: Arc<SingleFlight<usize, std::convert::Infallible>> = Arc::new(SingleFlight::new());
    let executions = Arc::new(AtomicUsize::new(0));

    for generation in 0..20 {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let group = Arc::clone(&group);
                let executions = Arc::clone(&executions);
                thread::spawn(move || {
                    group
                        .run("resource", || {
                            executions.fetch_add(1, Ordering::SeqCst);
                            // Hold the call open long enough for siblings
                            // of this generation to pile on.
                            thread::sleep(Duration::from_millis(20));
                            Ok(generation)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), generation);
        }
    }

    // Far fewer executions than calls proves coalescing kicked in; at
    // least one execution per generation is unavoidable.
    let executed = executions.load(Ordering::SeqCst);
    assert!(executed >= 20, "executed {executed} times");
    assert!(executed < 20 * 16 / 2, "executed {executed} times, coalescing broken");
}

#[test]
fn throttle_accounting_is_exact_under_contention() {
    let throttle = Arc::new(AdaptiveThrottle::new(ThrottleConfig::default()));
    let admitted = Arc::new(AtomicUsize::new(0));
    let shed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let throttle = Arc::clone(&throttle);
            let admitted = Arc::clone(&admitted);
            let shed = Arc::clone(&shed);
            thread::spawn(move || {
                for i in 0..2_000 {
                    match throttle.allow() {
                        Ok(permit) => {
                            admitted.fetch_add(1, Ordering::SeqCst);
                            // Workers 0-3 report a healthy upstream, the
                            // rest a failing one.
                            if worker < 4 || i % 3 == 0 {
                                permit.accept();
                            } else {
                                permit.reject();
                            }
                        }
                        Err(_) => {
                            shed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst) + shed.load(Ordering::SeqCst), 16_000);
    // A majority-healthy history must not collapse into full shedding.
    assert!(admitted.load(Ordering::SeqCst) > 8_000);
}

#[test]
fn ring_lookups_stay_consistent_during_membership_churn() {
    let ring: Arc<ConsistentHash<String>> = Arc::new(ConsistentHash::new());
    for i in 0..8 {
        ring.add(format!("stable-{i}"));
    }

    let churner = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for round in 0..50 {
                let node = format!("flapping-{}", round % 4);
                ring.add(node.clone());
                thread::sleep(Duration::from_micros(100));
                ring.remove(&node);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|reader| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..10_000 {
                    let node = ring.get(format!("key-{reader}-{i}")).unwrap();
                    assert!(
                        node.starts_with("stable-") || node.starts_with("flapping-"),
                        "unexpected node {node}"
                    );
                }
            })
        })
        .collect();

    churner.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    // Once the churn settles, only the stable members remain.
    assert_eq!(ring.node_count(), 8);
    for i in 0..1_000 {
        assert!(ring.get(format!("final-{i}")).unwrap().starts_with("stable-"));
    }
}
