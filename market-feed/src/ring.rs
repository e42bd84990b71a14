//! Bounded lock-free single-producer single-consumer ring.
//!
//! Hands raw text frames from the I/O thread to the parser thread. The
//! capacity is rounded up to a power of two so the slot index is a mask
//! of a free-running counter; `head` and `tail` live on separate cache
//! lines. Acquire/release on the two indices is the only synchronization.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Shared<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,
    mask: usize,
    /// Next slot the consumer will read. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next slot the producer will write. Written only by the producer.
    tail: CachePadded<AtomicUsize>,
}

// The buffer is only touched through the single producer and single
// consumer handles, which never alias a live slot.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let mut idx = head;
        while idx != tail {
            unsafe { (*self.buffer[idx & self.mask].get()).assume_init_drop() };
            idx = idx.wrapping_add(1);
        }
    }
}

/// Producer half of the ring. Exactly one exists per ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half of the ring. Exactly one exists per ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

/// Create a ring holding up to `capacity` elements (rounded up to the
/// next power of two) and split it into its two handles.
pub fn with_capacity<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.max(1).next_power_of_two();
    let buffer = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        buffer,
        capacity,
        mask: capacity - 1,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });

    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

impl<T> Producer<T> {
    /// Push a value, returning it back when the ring is full. Never
    /// blocks and never allocates.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let head = shared.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == shared.capacity {
            return Err(value);
        }

        unsafe { (*shared.buffer[tail & shared.mask].get()).write(value) };
        shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl<T> Consumer<T> {
    /// Pop the oldest value, or `None` when the ring is empty.
    pub fn try_pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let tail = shared.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let value = unsafe { (*shared.buffer[head & shared.mask].get()).assume_init_read() };
        shared.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    pub fn is_empty(&self) -> bool {
        let shared = &*self.shared;
        shared.head.load(Ordering::Relaxed) == shared.tail.load(Ordering::Acquire)
    }
}
