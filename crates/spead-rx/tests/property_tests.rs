//! Property tests for the `CellRing`'s testable invariants; the
//! `Receiver`-level invariants live in `spead-capture` instead.

use proptest::prelude::*;
use spead_rx::{CellRing, CellRingConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn small_ring() -> CellRing {
    CellRing::new(CellRingConfig::new(32, 8)).unwrap()
}

proptest! {
    /// INV-CELL: capacity after construction is a power of two >= requested.
    #[test]
    fn prop_capacity_is_power_of_two_and_at_least_requested(requested in 1usize..5000) {
        let cfg = CellRingConfig::new(16, requested);
        prop_assert!(cfg.nof_cells.is_power_of_two());
        prop_assert!(cfg.nof_cells >= requested);
    }

    /// INV-CELL-01: at quiescence, occupied == successful pushes - completed pulls.
    #[test]
    fn prop_occupied_equals_pushes_minus_pulls(
        ops in prop::collection::vec(prop::bool::ANY, 1..200)
    ) {
        let ring = small_ring();
        let mut successful_pushes = 0usize;
        let mut completed_pulls = 0usize;

        for push_op in ops {
            if push_op {
                if ring.push(b"payload") {
                    successful_pushes += 1;
                }
            } else if ring.pull_ready_now().is_some() {
                ring.pull_ready();
                completed_pulls += 1;
            }
        }

        prop_assert_eq!(ring.occupied(), successful_pushes - completed_pulls);
    }

    /// Payload round-trip: the next pull of a successfully pushed cell
    /// returns exactly the bytes that were pushed.
    #[test]
    fn prop_payload_round_trips(payload in prop::collection::vec(any::<u8>(), 1..32)) {
        let ring = small_ring();
        prop_assert!(ring.push(&payload));
        let got = ring.pull();
        prop_assert_eq!(got, payload.as_slice());
        ring.pull_ready();
    }

    /// A full ring rejects pushes and counts them as lost, without
    /// corrupting any already-filled cell.
    #[test]
    fn prop_full_ring_rejects_without_corruption(extra_pushes in 1usize..20) {
        let ring = CellRing::new(CellRingConfig::new(16, 4)).unwrap();
        let mut payloads = Vec::new();
        for i in 0..ring.capacity() {
            let payload = vec![i as u8; 4];
            prop_assert!(ring.push(&payload));
            payloads.push(payload);
        }

        for _ in 0..extra_pushes {
            prop_assert!(!ring.push(b"x"));
        }
        prop_assert_eq!(ring.metrics().lost, extra_pushes as u64);

        for expected in payloads {
            prop_assert_eq!(ring.pull(), expected.as_slice());
            ring.pull_ready();
        }
    }
}

/// With K concurrent producers and one consumer over M total pushes,
/// successful_pushes + lost == M.
#[test]
fn concurrent_producers_conserve_total_attempts() {
    let ring = Arc::new(CellRing::new(CellRingConfig::new(16, 32)).unwrap());
    let producers = 6;
    let pushes_each = 2_000;

    let handles: Vec<_> = (0..producers)
        .map(|id| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let payload = [id as u8; 8];
                let mut successes = 0u64;
                for _ in 0..pushes_each {
                    if ring.push(&payload) {
                        successes += 1;
                    }
                }
                successes
            })
        })
        .collect();

    // Drain concurrently with the producers so the ring does not fill up
    // and make every subsequent push a guaranteed loss.
    let consumer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            let mut count = 0u64;
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            while std::time::Instant::now() < deadline {
                if let Some(_cell) = ring.pull_timeout(Duration::from_millis(20)) {
                    ring.pull_ready();
                    count += 1;
                } else if ring.occupied() == 0 {
                    break;
                }
            }
            count
        })
    };

    let mut total_successes = 0u64;
    for h in handles {
        total_successes += h.join().unwrap();
    }
    let seen_cells = consumer.join().unwrap();

    let lost = ring.metrics().lost;
    assert_eq!(total_successes + lost, (producers * pushes_each) as u64);
    assert_eq!(seen_cells, total_successes);
}

/// A consumer slower than its producers sees pushes dropped, never
/// blocked: the producer loop completes in bounded time regardless of
/// consumer pace.
#[test]
fn slow_consumer_causes_drops_not_blocking() {
    let ring = CellRing::new(CellRingConfig::new(16, 8)).unwrap();
    let mut successes = 0u64;
    for _ in 0..1_000 {
        if ring.push(b"payload!") {
            successes += 1;
        }
    }
    assert_eq!(successes + ring.metrics().lost, 1_000);
    assert!(successes <= ring.capacity() as u64);
}
