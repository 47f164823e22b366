//! `CellRing`: fixed-capacity power-of-two ring of fixed-size cells.
//!
//! Multi-producer-safe, single-consumer. One ring is owned by exactly
//! one consumer; many capture workers may push concurrently. Producers
//! never block on a slow consumer — they skip past still-full cells and
//! drop once every cell is full (producer-precedence overwrite).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::cell::Cell;
use crate::config::CellRingConfig;
use crate::error::RingError;
use crate::invariants::{
    debug_assert_bounded_occupied, debug_assert_index_in_range, debug_assert_size_transition,
};
use crate::metrics::{CellRingMetrics, CellRingMetricsSnapshot};
use crate::payload::PayloadBuffer;
use crate::spin;
use crate::spin::CacheAligned;

const EMPTY_POLL_SLEEP: Duration = Duration::from_micros(100);

pub struct CellRing {
    config: CellRingConfig,
    mask: usize,
    producer: CacheAligned<AtomicUsize>,
    consumer: CacheAligned<AtomicUsize>,
    producer_advance_lock: CacheAligned<AtomicBool>,
    occupied: CacheAligned<AtomicUsize>,
    metrics: CellRingMetrics,
    cells: Box<[Cell]>,
    // Held only for its `Drop` impl; cell pointers are carved out of it
    // once at construction and never recomputed.
    _payload: PayloadBuffer,
}

// `cells`/`_payload` are accessed only through the atomics and per-cell
// spin locks above; every raw pointer dereference is gated by one of
// them.
unsafe impl Send for CellRing {}
unsafe impl Sync for CellRing {}

impl CellRing {
    /// Builds a ring from an already-validated [`CellRingConfig`].
    pub fn new(config: CellRingConfig) -> Result<Self, RingError> {
        let nof_cells = config.nof_cells;
        let cell_size = config.cell_size;
        debug_assert!(nof_cells.is_power_of_two());

        let payload = PayloadBuffer::new(nof_cells * cell_size)?;
        let mut cells = Vec::with_capacity(nof_cells);
        for i in 0..nof_cells {
            // SAFETY: `i * cell_size` stays within the `nof_cells *
            // cell_size` region just mapped above.
            let data = unsafe { payload.as_ptr().add(i * cell_size) };
            cells.push(Cell::new(data, cell_size));
        }

        Ok(Self {
            config,
            mask: nof_cells - 1,
            producer: CacheAligned(AtomicUsize::new(0)),
            consumer: CacheAligned(AtomicUsize::new(0)),
            producer_advance_lock: CacheAligned(AtomicBool::new(false)),
            occupied: CacheAligned(AtomicUsize::new(0)),
            metrics: CellRingMetrics::default(),
            cells: cells.into_boxed_slice(),
            _payload: payload,
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.nof_cells
    }

    #[must_use]
    pub fn cell_size(&self) -> usize {
        self.config.cell_size
    }

    #[must_use]
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_hugepage_backed(&self) -> bool {
        self._payload.is_hugepage()
    }

    #[must_use]
    pub fn metrics(&self) -> CellRingMetricsSnapshot {
        self.metrics.snapshot(self.occupied())
    }

    /// Reads and resets the cumulative lost-push counter.
    pub fn take_lost(&self) -> u64 {
        self.metrics.take_lost()
    }

    /// Advances the producer index by one slot under the dedicated
    /// producer-advance spin lock (the simpler bare `fetch_add`
    /// alternative is discussed in `DESIGN.md`).
    fn advance_producer(&self) {
        spin::enter(&self.producer_advance_lock);
        let next = (self.producer.load(Ordering::Relaxed) + 1) & self.mask;
        debug_assert_index_in_range!(next, self.config.nof_cells);
        self.producer.store(next, Ordering::Release);
        spin::leave(&self.producer_advance_lock);
    }

    /// Attempts to deposit a copy of `data` into the next producer cell.
    ///
    /// Returns `false` (and bumps the lost counter) when every cell is
    /// full. A payload larger than the ring's `cell_size` is rejected
    /// without being counted as loss — it is a caller-configuration
    /// error, not overload.
    pub fn push(&self, data: &[u8]) -> bool {
        debug_assert!(!data.is_empty(), "zero-sized pushes are not permitted");
        if data.is_empty() || data.len() > self.config.cell_size {
            return false;
        }

        loop {
            let occupied = self.occupied.load(Ordering::Acquire);
            debug_assert_bounded_occupied!(occupied, self.config.nof_cells);
            if occupied >= self.config.nof_cells {
                self.metrics.record_lost();
                return false;
            }

            let p = self.producer.load(Ordering::Relaxed) & self.mask;
            debug_assert_index_in_range!(p, self.config.nof_cells);
            let cell = &self.cells[p];

            spin::enter(&cell.lock);
            let size = cell.size.load(Ordering::Relaxed);
            if size > 0 {
                // Slot not yet drained; skip it rather than block.
                spin::leave(&cell.lock);
                self.advance_producer();
                continue;
            }

            // SAFETY: `cell.lock` is held, so no other producer or the
            // consumer can touch `cell.data` concurrently; `data.len()`
            // was checked against `cell.capacity` above.
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), cell.data, data.len());
            }
            debug_assert_size_transition!(size, data.len());
            cell.size.store(data.len(), Ordering::Release);
            self.occupied.fetch_add(1, Ordering::AcqRel);
            self.advance_producer();
            spin::leave(&cell.lock);
            self.metrics.record_pushed();
            return true;
        }
    }

    /// Blocking drain: waits until the current consumer cell holds a
    /// payload and returns a borrow of it. The cell remains locked;
    /// callers must call [`CellRing::pull_ready`] to release it.
    pub fn pull(&self) -> &[u8] {
        loop {
            if let Some(slice) = self.try_pull_once() {
                return slice;
            }
        }
    }

    /// As [`CellRing::pull`], but gives up once `timeout` has elapsed
    /// since the call began, returning `None` instead of the C API's
    /// `SIZE_MAX` sentinel (see `DESIGN.md`).
    pub fn pull_timeout(&self, timeout: Duration) -> Option<&[u8]> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(slice) = self.try_pull_once() {
                return Some(slice);
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }

    /// Non-blocking single attempt: returns `Some` only if a cell is
    /// already filled, without ever sleeping.
    pub fn pull_ready_now(&self) -> Option<&[u8]> {
        let c = self.consumer.load(Ordering::Relaxed) & self.mask;
        let cell = &self.cells[c];
        spin::enter(&cell.lock);
        let size = cell.size.load(Ordering::Acquire);
        if size == 0 {
            spin::leave(&cell.lock);
            return None;
        }
        self.metrics.record_pulled();
        // SAFETY: `cell.lock` is held across the return; the caller
        // must call `pull_ready` before the next pull attempt.
        Some(unsafe { std::slice::from_raw_parts(cell.data, size) })
    }

    fn try_pull_once(&self) -> Option<&[u8]> {
        let c = self.consumer.load(Ordering::Relaxed) & self.mask;
        debug_assert_index_in_range!(c, self.config.nof_cells);
        let cell = &self.cells[c];

        spin::enter(&cell.lock);
        let size = cell.size.load(Ordering::Acquire);
        if size == 0 {
            spin::leave(&cell.lock);
            if self.occupied.load(Ordering::Relaxed) == 0 {
                thread::sleep(EMPTY_POLL_SLEEP);
            } else {
                // A gap arose from producer interleaving; step past it.
                let next = (c + 1) & self.mask;
                self.consumer.store(next, Ordering::Relaxed);
            }
            return None;
        }

        self.metrics.record_pulled();
        // SAFETY: see `pull_ready_now`.
        Some(unsafe { std::slice::from_raw_parts(cell.data, size) })
    }

    /// Releases the cell most recently returned by `pull`/`pull_timeout`,
    /// decrementing `occupied` and advancing the consumer index.
    pub fn pull_ready(&self) {
        let c = self.consumer.load(Ordering::Relaxed) & self.mask;
        let cell = &self.cells[c];
        let size = cell.size.load(Ordering::Relaxed);
        debug_assert_size_transition!(size, 0usize);
        cell.size.store(0, Ordering::Release);
        spin::leave(&cell.lock);
        let next = (c + 1) & self.mask;
        self.consumer.store(next, Ordering::Relaxed);
        let occupied = self.occupied.fetch_sub(1, Ordering::AcqRel);
        debug_assert_bounded_occupied!(occupied, self.config.nof_cells + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ring(cell_size: usize, nof_cells: usize) -> CellRing {
        CellRing::new(CellRingConfig::new(cell_size, nof_cells)).unwrap()
    }

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let r = ring(64, 5);
        assert_eq!(r.capacity(), 8);
    }

    #[test]
    fn push_then_pull_round_trips_payload() {
        let r = ring(64, 4);
        assert!(r.push(b"hello"));
        let got = r.pull();
        assert_eq!(got, b"hello");
        r.pull_ready();
        assert_eq!(r.occupied(), 0);
    }

    #[test]
    fn zero_sized_push_is_rejected() {
        let r = ring(64, 4);
        assert!(!r.push(b""));
        assert_eq!(r.metrics().pushed, 0);
    }

    #[test]
    fn oversized_push_is_rejected_without_counting_loss() {
        let r = ring(4, 4);
        let oversized = vec![0xABu8; r.cell_size() + 1];
        assert!(!r.push(&oversized));
        assert_eq!(r.metrics().lost, 0);
    }

    #[test]
    fn full_ring_rejects_push_and_counts_loss() {
        let r = ring(8, 2);
        assert!(r.push(b"a"));
        assert!(r.push(b"b"));
        assert!(!r.push(b"c"));
        assert_eq!(r.metrics().lost, 1);
        // Existing cells are untouched.
        assert_eq!(r.pull(), b"a");
        r.pull_ready();
        assert_eq!(r.pull(), b"b");
        r.pull_ready();
    }

    #[test]
    fn pull_timeout_returns_none_on_empty_ring() {
        let r = ring(8, 2);
        assert!(r.pull_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn pull_ready_now_is_non_blocking() {
        let r = ring(8, 2);
        assert!(r.pull_ready_now().is_none());
        assert!(r.push(b"x"));
        assert_eq!(r.pull_ready_now(), Some(&b"x"[..]));
        r.pull_ready();
    }

    #[test]
    fn concurrent_producers_conserve_success_plus_lost() {
        let r = Arc::new(ring(8, 16));
        let producers = 4;
        let pushes_each = 500;

        let handles: Vec<_> = (0..producers)
            .map(|_| {
                let r = Arc::clone(&r);
                thread::spawn(move || {
                    let mut successes = 0u64;
                    for _ in 0..pushes_each {
                        if r.push(b"payload!") {
                            successes += 1;
                        }
                    }
                    successes
                })
            })
            .collect();

        let mut total_success = 0u64;
        for h in handles {
            total_success += h.join().unwrap();
        }

        let snap = r.metrics();
        assert_eq!(total_success, snap.pushed);
        assert_eq!(total_success + snap.lost, (producers * pushes_each) as u64);
    }

    #[test]
    fn slow_consumer_drops_rather_than_blocks() {
        let r = ring(8, 4);
        let mut successes = 0;
        for _ in 0..100 {
            if r.push(b"x") {
                successes += 1;
            }
        }
        // Never blocked: all 100 attempts returned promptly.
        assert_eq!(successes + r.metrics().lost, 100);
        assert!(successes <= 4);
    }
}
