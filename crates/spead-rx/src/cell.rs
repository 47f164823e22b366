use std::sync::atomic::{AtomicBool, AtomicUsize};

use crate::spin::CacheAligned;

/// A fixed-capacity byte slot plus its size field and payload lock.
///
/// `size` transitions `0` (empty) `-> >0` (filled, producer) `-> 0`
/// (drained, consumer). `lock` is held for the entirety of a produce or
/// a consume. `data` is computed once at ring construction from the
/// owning [`PayloadBuffer`](crate::payload::PayloadBuffer) and never
/// changes afterwards.
pub(crate) struct Cell {
    pub(crate) lock: CacheAligned<AtomicBool>,
    pub(crate) size: CacheAligned<AtomicUsize>,
    pub(crate) data: *mut u8,
    pub(crate) capacity: usize,
}

// `data` points into a `PayloadBuffer` owned alongside the `Cell` array
// for the ring's whole lifetime; access is mediated by `lock`/`size`.
unsafe impl Send for Cell {}
unsafe impl Sync for Cell {}

impl Cell {
    pub(crate) fn new(data: *mut u8, capacity: usize) -> Self {
        Self {
            lock: CacheAligned(AtomicBool::new(false)),
            size: CacheAligned(AtomicUsize::new(0)),
            data,
            capacity,
        }
    }
}
