//! Core lock-free SPSC ring queue algorithm.
//!
//! Each slot carries a binary readiness flag next to its payload storage:
//! clear means the slot is empty and owned by the producer, set means it
//! holds a payload and is owned by the consumer. The producer and consumer
//! each advance a monotonically increasing cursor; the physical slot for a
//! cursor value is `cursor & (capacity - 1)`, so capacities must be powers
//! of two.
//!
//! # Safety
//!
//! The push/pop methods are unsafe because they require the caller to uphold
//! the SPSC invariant: exactly one producer and one consumer, with no
//! concurrent access to either role. Neither cursor is protected by a
//! compare-and-swap, so two racing producers (or consumers) would both read
//! the same cursor value and claim the same slot.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crate::error::{self, ConfigError};
use crate::shim::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One cell of the ring: a readiness flag plus payload storage.
struct Slot<T> {
    /// Clear: empty, producer side may fill. Set: full, consumer side may
    /// drain. Flipped with release ordering after the payload access so the
    /// other side never observes a half-written slot.
    full: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            full: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Producer-side cursor, padded onto its own cache line so producer stores
/// do not invalidate the consumer's line.
#[repr(align(64))]
struct ProducerState {
    /// Monotonic enqueue cursor. Written only by the producer; read by
    /// `len()` from anywhere.
    head: AtomicUsize,
}

/// Consumer-side cursor, padded like [`ProducerState`].
#[repr(align(64))]
struct ConsumerState {
    /// Monotonic dequeue cursor. Written only by the consumer.
    tail: AtomicUsize,
}

/// Shared ring state behind the [`super::Producer`]/[`super::Consumer`] pair.
pub(crate) struct RingQueue<T> {
    producer: ProducerState,
    consumer: ConsumerState,
    slots: Box<[Slot<T>]>,
    mask: usize,
}

impl<T> RingQueue<T> {
    /// Minimum ring capacity.
    pub(crate) const MIN_CAPACITY: usize = 2;

    /// Creates a ring with the given capacity (power of two, at least 2).
    pub(crate) fn new(capacity: usize) -> Result<Self, ConfigError> {
        error::check_capacity(capacity, Self::MIN_CAPACITY)?;

        let slots = (0..capacity).map(|_| Slot::new()).collect();

        Ok(Self {
            producer: ProducerState {
                head: AtomicUsize::new(0),
            },
            consumer: ConsumerState {
                tail: AtomicUsize::new(0),
            },
            slots,
            mask: capacity - 1,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Advisory snapshot of the number of queued items.
    ///
    /// The two cursors are read independently, so the result can be stale
    /// the moment it is returned under concurrent access.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        let head = self.producer.head.load(Ordering::Acquire);
        let tail = self.consumer.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Attempts to push an item onto the queue.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the ring is full, without mutating any state.
    ///
    /// # Safety
    ///
    /// Caller must be the only thread acting as producer.
    #[inline]
    pub(crate) unsafe fn push(&self, item: T) -> Result<(), T> {
        // Producer-local cursor: no other thread writes it.
        let head = self.producer.head.load(Ordering::Relaxed);
        let slot = &self.slots[head & self.mask];

        // Acquire pairs with the consumer's release clear below: once the
        // flag reads clear, the consumer's read of the previous payload has
        // completed and the slot is safe to overwrite.
        if slot.full.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: the flag is clear, so the consumer will not touch this
        // slot until the release store below, and this thread is the only
        // producer per the contract.
        unsafe {
            (*slot.value.get()).write(item);
        }

        // Publish: the payload write above must be visible before the flag.
        slot.full.store(true, Ordering::Release);

        self.producer
            .head
            .store(head.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Attempts to pop an item from the queue.
    ///
    /// Returns `None` if the ring is empty.
    ///
    /// # Safety
    ///
    /// Caller must be the only thread acting as consumer.
    #[inline]
    pub(crate) unsafe fn pop(&self) -> Option<T> {
        let tail = self.consumer.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail & self.mask];

        // Acquire pairs with the producer's release set: a set flag means
        // the payload write is fully visible.
        if !slot.full.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the flag is set, so the producer published a payload here
        // and will not write again until the release clear below.
        let item = unsafe { (*slot.value.get()).assume_init_read() };

        // Hand the slot back to the producer side.
        slot.full.store(false, Ordering::Release);

        self.consumer
            .tail
            .store(tail.wrapping_add(1), Ordering::Release);

        Some(item)
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        // Exclusive access here: drain whatever the consumer never claimed.
        let mut tail = self.consumer.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[tail & self.mask];
            if !slot.full.load(Ordering::Relaxed) {
                break;
            }
            // SAFETY: the flag says the slot holds an initialized payload,
            // and no other thread can exist during drop.
            unsafe {
                (*slot.value.get()).assume_init_drop();
            }
            slot.full.store(false, Ordering::Relaxed);
            tail = tail.wrapping_add(1);
        }
    }
}

// SAFETY: RingQueue is shared between the producer and consumer threads.
// All slot accesses are mediated by the per-slot flag with release/acquire
// pairing, and the cursors are atomics.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}
