use crate::error::RingError;

/// Cacheline-aligned, huge-page-preferred backing store for a ring's
/// cells. All cell `data` pointers are carved out of a single mapping
/// made once at construction, so the hot path never calls into the
/// allocator.
pub(crate) struct PayloadBuffer {
    ptr: *mut u8,
    len: usize,
    hugepage: bool,
}

// The mapping outlives every `Cell` pointer derived from it; `CellRing`
// is the sole owner and only ever hands out borrows tied to its own
// lifetime.
unsafe impl Send for PayloadBuffer {}
unsafe impl Sync for PayloadBuffer {}

impl PayloadBuffer {
    /// Maps `len` bytes, preferring huge pages and falling back to
    /// ordinary anonymous pages when the kernel has none reserved — huge
    /// pages are an optional throughput optimization, so the fallback
    /// path must not fail.
    pub(crate) fn new(len: usize) -> Result<Self, RingError> {
        let len = len.max(1);

        let hugepage_flags = libc::MAP_PRIVATE
            | libc::MAP_ANONYMOUS
            | libc::MAP_LOCKED
            | libc::MAP_NORESERVE
            | libc::MAP_HUGETLB;

        if let Some(ptr) = try_mmap(len, hugepage_flags) {
            return Ok(Self {
                ptr,
                len,
                hugepage: true,
            });
        }

        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_LOCKED | libc::MAP_NORESERVE;
        if let Some(ptr) = try_mmap(len, flags) {
            return Ok(Self {
                ptr,
                len,
                hugepage: false,
            });
        }

        // Last resort: drop MAP_LOCKED too, in case the caller lacks
        // IPC_LOCK; correctness does not depend on the pages being
        // resident, only throughput does.
        let plain_flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        match try_mmap(len, plain_flags) {
            Some(ptr) => Ok(Self {
                ptr,
                len,
                hugepage: false,
            }),
            None => Err(RingError::PayloadMapFailed {
                bytes: len,
                source: std::io::Error::last_os_error(),
            }),
        }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub(crate) fn is_hugepage(&self) -> bool {
        self.hugepage
    }
}

fn try_mmap(len: usize, flags: libc::c_int) -> Option<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        None
    } else {
        Some(ptr.cast::<u8>())
    }
}

impl Drop for PayloadBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_requested_length_and_is_writable() {
        let buf = PayloadBuffer::new(4096).unwrap();
        unsafe {
            std::ptr::write_bytes(buf.as_ptr(), 0xAB, 4096);
            assert_eq!(*buf.as_ptr(), 0xAB);
        }
    }

    #[test]
    fn zero_length_request_still_succeeds() {
        assert!(PayloadBuffer::new(0).is_ok());
    }
}
