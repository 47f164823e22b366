//! Exponential-backoff spin coordination over a caller-owned `AtomicBool`.
//!
//! `SpinCoord` is not a struct you instantiate per lock; it is a pair of
//! free functions operating on whichever `AtomicBool` the caller is using
//! as a lock cell (a cell's payload lock, the ring's producer-advance
//! lock). The design assumes very short critical sections and bounded
//! contention (at most `nof_workers + 1` waiters).

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;

/// Relaxed-load polls to endure before falling back to sleeping between
/// polls, rather than pinning a core indefinitely.
const MAX_WAIT_ITERS: u64 = 65_536;

/// Upper bound on the exponential backoff spin count.
const MAX_BACKOFF: u32 = 1024;

const STALL_SLEEP: Duration = Duration::from_micros(500);

/// Cacheline-aligned wrapper to keep hot atomics from false-sharing with
/// their neighbors.
#[repr(align(128))]
pub(crate) struct CacheAligned<T>(pub(crate) T);

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Acquire `lock`, spinning (and eventually sleeping) until it is free.
///
/// Busy-polls with relaxed loads until `false` is observed, then attempts
/// an acquire-ordered `compare_exchange`. On failure, backs off for a
/// uniformly random number of pause hints in `[0, cur_max]`, doubling
/// `cur_max` up to `MAX_BACKOFF` each time. After `MAX_WAIT_ITERS` relaxed
/// polls without observing release, the waiter sleeps between polls
/// instead of spinning, to avoid pinning a core.
#[inline]
pub(crate) fn enter(lock: &AtomicBool) {
    let mut cur_max: u32 = 1;
    let mut polls: u64 = 0;

    loop {
        while lock.load(Ordering::Relaxed) {
            polls += 1;
            if polls >= MAX_WAIT_ITERS {
                thread::sleep(STALL_SLEEP);
            } else {
                hint::spin_loop();
            }
        }

        if lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }

        let iters = rand::thread_rng().gen_range(0..=cur_max);
        for _ in 0..iters {
            hint::spin_loop();
        }
        cur_max = (cur_max * 2).min(MAX_BACKOFF);
    }
}

/// Release `lock`. A plain release store; no fairness is provided.
#[inline]
pub(crate) fn leave(lock: &AtomicBool) {
    lock.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn enter_then_leave_round_trips() {
        let lock = AtomicBool::new(false);
        enter(&lock);
        assert!(lock.load(Ordering::Relaxed));
        leave(&lock);
        assert!(!lock.load(Ordering::Relaxed));
    }

    #[test]
    fn contended_acquire_is_mutually_exclusive() {
        let lock = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    enter(&lock);
                    let before = counter.fetch_add(1, Ordering::Relaxed);
                    // If another thread were inside the critical section,
                    // this would observe a torn increment.
                    assert_eq!(counter.load(Ordering::Relaxed), before + 1);
                    leave(&lock);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 8 * 200);
    }
}
