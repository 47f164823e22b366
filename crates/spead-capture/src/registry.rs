//! Consumer registry: (consumer_id, `CellRing` handle, predicate)
//! triples, capacity 6. Mutated under a mutex; read by capture workers
//! through an atomic count and index-stable vectors so a worker never
//! dereferences a removed slot.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use spead_rx::CellRing;

use crate::error::ConsumerError;

pub type Predicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

struct Entry {
    id: u32,
    ring: Arc<CellRing>,
    predicate: Predicate,
}

pub struct Registry {
    capacity: usize,
    entries: Mutex<Vec<Entry>>,
    count: AtomicUsize,
    next_id: AtomicU32,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
            count: AtomicUsize::new(0),
            next_id: AtomicU32::new(1),
        }
    }

    /// Registers a consumer, returning its assigned id. Rejects if the
    /// registry is already at capacity.
    pub fn register(
        &self,
        ring: Arc<CellRing>,
        predicate: Predicate,
    ) -> Result<u32, ConsumerError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            return Err(ConsumerError::RegistryFull);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.push(Entry { id, ring, predicate });
        // count is updated last so a worker that already snapshotted the
        // old count never indexes into the new, not-yet-fully-published
        // entry.
        self.count.store(entries.len(), Ordering::Release);
        Ok(id)
    }

    /// Removes the registration for `id`, reindexing the remaining
    /// entries. Workers iterate `[0, count)`, and `count` is written
    /// last, so a worker never dereferences a removed slot.
    pub fn unregister(&self, id: u32) -> Result<(), ConsumerError> {
        let mut entries = self.entries.lock().unwrap();
        let pos = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(ConsumerError::NotRegistered(id))?;
        // Shrink the published count first so workers stop touching the
        // tail slot before it is overwritten by swap_remove.
        self.count.store(entries.len() - 1, Ordering::Release);
        entries.swap_remove(pos);
        Ok(())
    }

    /// Relaxed snapshot of how many entries are currently safe to index.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns the ring/predicate pair at `index`, if still within the
    /// last-observed count. Intended to be called only with `index <
    /// self.count()` taken just before.
    pub fn get(&self, index: usize) -> Option<(Arc<CellRing>, Predicate)> {
        let entries = self.entries.lock().unwrap();
        entries.get(index).map(|e| (Arc::clone(&e.ring), Arc::clone(&e.predicate)))
    }

    /// Clones out every current (ring, predicate) pair in one lock
    /// acquisition, for a worker to iterate per-block rather than
    /// locking per packet.
    pub fn snapshot(&self) -> Vec<(Arc<CellRing>, Predicate)> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|e| (Arc::clone(&e.ring), Arc::clone(&e.predicate)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spead_rx::CellRingConfig;

    fn ring() -> Arc<CellRing> {
        Arc::new(CellRing::new(CellRingConfig::new(64, 4)).unwrap())
    }

    #[test]
    fn register_up_to_capacity_then_rejects() {
        let reg = Registry::new(2);
        assert!(reg.register(ring(), Arc::new(|_| true)).is_ok());
        assert!(reg.register(ring(), Arc::new(|_| true)).is_ok());
        assert!(matches!(
            reg.register(ring(), Arc::new(|_| true)),
            Err(ConsumerError::RegistryFull)
        ));
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn unregister_removes_and_shrinks_count() {
        let reg = Registry::new(6);
        let id_a = reg.register(ring(), Arc::new(|_| true)).unwrap();
        let _id_b = reg.register(ring(), Arc::new(|_| true)).unwrap();
        assert_eq!(reg.count(), 2);
        reg.unregister(id_a).unwrap();
        assert_eq!(reg.count(), 1);
        assert!(matches!(
            reg.unregister(id_a),
            Err(ConsumerError::NotRegistered(_))
        ));
    }
}
