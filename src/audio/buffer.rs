//! Lock-free SPSC byte ring buffer
//!
//! Fixed-capacity circular byte queue feeding the render loop from the
//! network ingress thread. The buffer is split at construction into a
//! [`RingWriter`] and a [`RingReader`]; the halves are `Send` but not
//! clonable, so the single-producer/single-consumer discipline is enforced
//! by ownership rather than convention.
//!
//! Cursors are absolute (monotonically increasing) byte counts reduced
//! modulo the capacity on access. Invariant: `write - read <= capacity`.
//! The writer publishes data with a `Release` store of the write cursor and
//! the reader observes it with an `Acquire` load; the read cursor is
//! synchronized the same way in the other direction. Writes that would
//! overflow fail atomically — nothing is copied and no cursor moves.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RingCore {
    data: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    /// Absolute bytes written, wraps at usize::MAX
    write_pos: AtomicUsize,
    /// Absolute bytes consumed, wraps at usize::MAX
    read_pos: AtomicUsize,
    /// Rejected writes since construction
    overflow_count: AtomicUsize,
}

// The writer only touches the free region and the reader only the occupied
// region; the regions are disjoint and delimited by the Acquire/Release
// cursor pair.
unsafe impl Sync for RingCore {}
unsafe impl Send for RingCore {}

impl RingCore {
    fn data_ptr(&self) -> *mut u8 {
        // UnsafeCell<u8> is repr(transparent) over u8.
        self.data.as_ptr() as *mut u8
    }
}

/// Create a ring buffer of the given byte capacity, split into halves.
pub fn ring_buffer(capacity: usize) -> (RingWriter, RingReader) {
    assert!(capacity > 0, "ring buffer capacity must be non-zero");
    let data = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();
    let core = Arc::new(RingCore {
        data,
        capacity,
        write_pos: AtomicUsize::new(0),
        read_pos: AtomicUsize::new(0),
        overflow_count: AtomicUsize::new(0),
    });
    (
        RingWriter { core: core.clone() },
        RingReader { core },
    )
}

/// Producer half of the ring buffer
pub struct RingWriter {
    core: Arc<RingCore>,
}

impl RingWriter {
    /// Append `bytes` if the buffer has room for all of them.
    ///
    /// Returns `false` (bumping the overflow counter, copying nothing) when
    /// free space is insufficient. The caller decides whether to drop the
    /// chunk or apply backpressure.
    pub fn write(&mut self, bytes: &[u8]) -> bool {
        let core = &*self.core;
        let write = core.write_pos.load(Ordering::Relaxed);
        let read = core.read_pos.load(Ordering::Acquire);
        let used = write.wrapping_sub(read);
        let free = core.capacity - used;

        if bytes.len() > free {
            core.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if bytes.is_empty() {
            return true;
        }

        let idx = write % core.capacity;
        let first = bytes.len().min(core.capacity - idx);
        // SAFETY: [idx, idx + first) and [0, len - first) both lie in the
        // free region; the reader never dereferences free bytes until the
        // Release store below makes them visible.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), core.data_ptr().add(idx), first);
            if first < bytes.len() {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr().add(first),
                    core.data_ptr(),
                    bytes.len() - first,
                );
            }
        }

        core.write_pos
            .store(write.wrapping_add(bytes.len()), Ordering::Release);
        true
    }

    /// Free space in bytes
    pub fn free(&self) -> usize {
        let write = self.core.write_pos.load(Ordering::Relaxed);
        let read = self.core.read_pos.load(Ordering::Acquire);
        self.core.capacity - write.wrapping_sub(read)
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// Number of writes rejected for lack of space
    pub fn overflow_count(&self) -> usize {
        self.core.overflow_count.load(Ordering::Relaxed)
    }
}

/// Consumer half of the ring buffer
pub struct RingReader {
    core: Arc<RingCore>,
}

impl RingReader {
    /// Unread bytes currently available
    pub fn available(&self) -> usize {
        let read = self.core.read_pos.load(Ordering::Relaxed);
        let write = self.core.write_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// First contiguous span of unread bytes.
    ///
    /// When the occupied region wraps past the end of storage this returns
    /// only the leading part; [`as_slices`](Self::as_slices) exposes both.
    pub fn readable_span(&self) -> &[u8] {
        self.as_slices().0
    }

    /// Both spans of unread bytes, second non-empty only on wrap-around.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        let core = &*self.core;
        let read = core.read_pos.load(Ordering::Relaxed);
        let write = core.write_pos.load(Ordering::Acquire);
        let avail = write.wrapping_sub(read);
        if avail == 0 {
            return (&[], &[]);
        }

        let idx = read % core.capacity;
        let first = avail.min(core.capacity - idx);
        // SAFETY: both ranges lie in the occupied region [read, write),
        // which the writer does not touch; the Acquire load of `write_pos`
        // ordered the data writes before this read. The borrow of `self`
        // keeps `consume` (which needs `&mut self`) from invalidating the
        // region while these slices live.
        unsafe {
            (
                std::slice::from_raw_parts(core.data_ptr().add(idx), first),
                std::slice::from_raw_parts(core.data_ptr(), avail - first),
            )
        }
    }

    /// Advance the read cursor by `n` bytes.
    ///
    /// `n` must not exceed [`available`](Self::available); exceeding it is a
    /// contract violation and panics.
    pub fn consume(&mut self, n: usize) {
        let core = &*self.core;
        let read = core.read_pos.load(Ordering::Relaxed);
        let write = core.write_pos.load(Ordering::Acquire);
        let avail = write.wrapping_sub(read);
        assert!(n <= avail, "consume({n}) exceeds available ({avail})");
        core.read_pos.store(read.wrapping_add(n), Ordering::Release);
    }

    /// Copy exactly `buf.len()` unread bytes into `buf` without consuming.
    ///
    /// Returns `false` (copying nothing) if fewer bytes are available.
    pub fn peek_exact(&self, buf: &mut [u8]) -> bool {
        let (a, b) = self.as_slices();
        if a.len() + b.len() < buf.len() {
            return false;
        }
        let total = buf.len();
        let first = total.min(a.len());
        buf[..first].copy_from_slice(&a[..first]);
        if first < total {
            buf[first..].copy_from_slice(&b[..total - first]);
        }
        true
    }

    /// Number of writes the producer rejected for lack of space
    pub fn overflow_count(&self) -> usize {
        self.core.overflow_count.load(Ordering::Relaxed)
    }
}
