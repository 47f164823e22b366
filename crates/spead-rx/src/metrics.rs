use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time read of a `CellRing`'s counters.
///
/// `lost` is cumulative and is never reset internally (per the ring's
/// edge-case contract); a diagnostics thread that wants a rate calls
/// [`CellRingMetrics::take_lost`] to read-and-reset it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellRingMetricsSnapshot {
    pub occupied: usize,
    pub lost: u64,
    pub pushed: u64,
    pub pulled: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CellRingMetrics {
    lost: AtomicU64,
    pushed: AtomicU64,
    pulled: AtomicU64,
}

impl CellRingMetrics {
    #[inline]
    pub(crate) fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_pushed(&self) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_pulled(&self) {
        self.pulled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, occupied: usize) -> CellRingMetricsSnapshot {
        CellRingMetricsSnapshot {
            occupied,
            lost: self.lost.load(Ordering::Relaxed),
            pushed: self.pushed.load(Ordering::Relaxed),
            pulled: self.pulled.load(Ordering::Relaxed),
        }
    }

    /// Reads and resets the cumulative lost counter, for a reporting
    /// thread that wants a per-interval rate rather than a running total.
    pub(crate) fn take_lost(&self) -> u64 {
        self.lost.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let m = CellRingMetrics::default();
        m.record_pushed();
        m.record_pushed();
        m.record_pulled();
        m.record_lost();

        let snap = m.snapshot(1);
        assert_eq!(snap.occupied, 1);
        assert_eq!(snap.pushed, 2);
        assert_eq!(snap.pulled, 1);
        assert_eq!(snap.lost, 1);
    }

    #[test]
    fn take_lost_resets_but_other_counters_stay() {
        let m = CellRingMetrics::default();
        m.record_lost();
        m.record_lost();
        assert_eq!(m.take_lost(), 2);
        assert_eq!(m.snapshot(0).lost, 0);
    }
}
