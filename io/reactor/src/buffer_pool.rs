//! Size-classed pool of reusable byte buffers.
//!
//! Four capacity classes keep per-connection allocations bounded: a released
//! buffer is filed under the largest class its capacity satisfies and handed
//! back out on the next acquire of that class or smaller. Free lists are
//! bounded; overflow is simply dropped.

use bytes::BytesMut;
use parking_lot::Mutex;

/// Buffer capacity classes, ascending.
pub const SIZE_CLASSES: [usize; 4] = [4 * 1024, 16 * 1024, 64 * 1024, 256 * 1024];

/// Maximum buffers kept per class.
pub const MAX_POOLED_PER_CLASS: usize = 100;

/// Thread-safe, size-classed buffer pool.
///
/// Each class has its own lock; critical sections are a push or pop.
pub struct BufferPool {
    classes: [Mutex<Vec<BytesMut>>; SIZE_CLASSES.len()],
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            classes: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
        }
    }

    /// Get a buffer with capacity of at least `min_capacity` and length 0.
    ///
    /// Contents are unspecified. Requests above the largest class are
    /// allocated directly.
    pub fn acquire(&self, min_capacity: usize) -> BytesMut {
        match class_for_acquire(min_capacity) {
            Some(class) => {
                if let Some(buf) = self.classes[class].lock().pop() {
                    return buf;
                }
                BytesMut::with_capacity(SIZE_CLASSES[class])
            }
            None => BytesMut::with_capacity(min_capacity),
        }
    }

    /// Return a buffer to the pool.
    ///
    /// The length is cleared (capacity preserved) and the buffer is filed
    /// under the largest class its capacity covers. Buffers smaller than the
    /// smallest class, larger-than-class leftovers past the per-class cap,
    /// and shared buffers that cannot reclaim their capacity are dropped.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let Some(class) = class_for_release(buf.capacity()) else {
            return;
        };
        let mut free = self.classes[class].lock();
        if free.len() < MAX_POOLED_PER_CLASS {
            free.push(buf);
        }
    }

    /// Total buffers currently pooled across all classes.
    pub fn pooled_count(&self) -> usize {
        self.classes.iter().map(|c| c.lock().len()).sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest class whose capacity satisfies the request.
fn class_for_acquire(min_capacity: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&size| size >= min_capacity)
}

/// Largest class the capacity covers.
fn class_for_release(capacity: usize) -> Option<usize> {
    SIZE_CLASSES.iter().rposition(|&size| capacity >= size)
}
