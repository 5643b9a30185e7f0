//! Multi-producer/multi-consumer ring buffer.
//!
//! A bounded lock-free ring safe for any number of concurrent producers and
//! consumers. Instead of guarding a shared cursor with a lock, every slot
//! carries its own sequence number (the classic bounded-MPMC design):
//!
//! - Slots start with `seq = index`.
//! - A producer may claim the slot at position `pos` only while
//!   `slot.seq == pos`; it claims by compare-and-swapping the enqueue cursor
//!   from `pos` to `pos + 1`, writes the payload, then publishes with
//!   `slot.seq = pos + 1`.
//! - A consumer may claim the slot only once `slot.seq == pos + 1`; it
//!   compare-and-swaps the dequeue cursor, reads the payload, then frees the
//!   slot for the *next* lap with `slot.seq = pos + capacity`. Freeing at
//!   `pos + 1` instead would let a producer on the same lap race the
//!   still-draining consumer.
//!
//! Two producers racing for one position resolve through the cursor CAS:
//! exactly one wins, the loser re-reads the cursor and tries the next
//! position. The operations are lock-free (the system always makes progress)
//! but not wait-free (an individual thread can retry indefinitely under
//! adversarial scheduling).
//!
//! This is the generalization of [`crate::spsc`] that tolerates concurrent
//! producers and consumers, at the cost of one CAS per operation instead of
//! a plain store.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! let ring = Arc::new(hermes::mpmc::Ring::<u64>::new(64)?);
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|p| {
//!         let ring = Arc::clone(&ring);
//!         std::thread::spawn(move || {
//!             for i in 0..10 {
//!                 while ring.push(p * 100 + i).is_err() {
//!                     std::thread::yield_now();
//!                 }
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! let mut drained = 0;
//! while ring.pop().is_some() {
//!     drained += 1;
//! }
//! assert_eq!(drained, 40);
//! # Ok::<(), hermes::ConfigError>(())
//! ```

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;

use minstant::Instant;

use crate::error::{self, ConfigError};
use crate::shim::atomic::{AtomicUsize, Ordering};
use crate::wait::{Timeout, spin_backoff};

/// A slot with a sequence number coordinating which cursor value owns it.
struct Slot<T> {
    /// - `index`: initial, free for the first lap
    /// - `pos + 1`: payload published at position `pos`
    /// - `pos + capacity`: drained, free for the next lap
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new(seq: usize) -> Self {
        Self {
            seq: AtomicUsize::new(seq),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Enqueue cursor, padded onto its own cache line: producer traffic must not
/// invalidate the consumers' line and vice versa.
#[repr(align(64))]
struct EnqueueCursor {
    pos: AtomicUsize,
}

/// Dequeue cursor, padded like [`EnqueueCursor`].
#[repr(align(64))]
struct DequeueCursor {
    pos: AtomicUsize,
}

/// Bounded lock-free MPMC ring buffer.
///
/// All operations take `&self`; share the ring between threads with
/// [`std::sync::Arc`].
pub struct Ring<T> {
    enqueue: EnqueueCursor,
    dequeue: DequeueCursor,
    slots: Box<[Slot<T>]>,
    mask: usize,
}

impl<T> Ring<T> {
    /// Minimum ring capacity.
    pub const MIN_CAPACITY: usize = 2;

    /// Creates a ring with the given capacity (power of two, at least 2).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the capacity is out of range or not a
    /// power of two.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        error::check_capacity(capacity, Self::MIN_CAPACITY)?;

        let slots = (0..capacity).map(Slot::new).collect();

        Ok(Self {
            enqueue: EnqueueCursor {
                pos: AtomicUsize::new(0),
            },
            dequeue: DequeueCursor {
                pos: AtomicUsize::new(0),
            },
            slots,
            mask: capacity - 1,
        })
    }

    /// The fixed capacity of the ring.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Advisory snapshot of the number of buffered items.
    ///
    /// The two cursors are read independently, so the result can be stale
    /// the moment it is returned under concurrent access.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        let enqueue = self.enqueue.pos.load(Ordering::Acquire);
        let dequeue = self.dequeue.pos.load(Ordering::Acquire);
        enqueue.wrapping_sub(dequeue)
    }

    /// Returns `true` if the ring appears empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to push an item without blocking.
    ///
    /// Safe to call from any number of threads concurrently.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the ring is full, allowing retry.
    pub fn push(&self, item: T) -> Result<(), T> {
        loop {
            let pos = self.enqueue.pos.load(Ordering::Relaxed);
            let slot = &self.slots[pos & self.mask];

            // Acquire pairs with the consumer's release in pop(): observing
            // seq == pos means the previous lap's payload has been read out.
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                // Slot is free at this position; claim it by advancing the
                // cursor. Exactly one racing producer wins.
                if self
                    .enqueue
                    .pos
                    .compare_exchange(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // SAFETY: the CAS granted exclusive write ownership of
                    // this slot for position `pos`; no consumer reads it
                    // until the release store below.
                    unsafe {
                        (*slot.value.get()).write(item);
                    }
                    slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
                // CAS lost: another producer claimed `pos`. Retry.
            } else if diff < 0 {
                // The slot has not been freed since the previous lap: no
                // position ahead of us can be free either. Ring is full.
                return Err(item);
            }
            // diff > 0: the cursor moved past this position under us.
            // Re-read and retry.
        }
    }

    /// Attempts to pop an item without blocking.
    ///
    /// Safe to call from any number of threads concurrently. Returns `None`
    /// if the ring is empty.
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        loop {
            let pos = self.dequeue.pos.load(Ordering::Relaxed);
            let slot = &self.slots[pos & self.mask];

            // Acquire pairs with the producer's release publish.
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                // Payload published at this position; claim it.
                if self
                    .dequeue
                    .pos
                    .compare_exchange(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // SAFETY: the CAS granted exclusive read ownership, and
                    // the acquire load of seq synchronized with the
                    // producer's release publish of the payload.
                    let item = unsafe { (*slot.value.get()).assume_init_read() };

                    // Free the slot for the next lap.
                    slot.seq
                        .store(pos.wrapping_add(self.capacity()), Ordering::Release);
                    return Some(item);
                }
            } else if diff < 0 {
                // Nothing published here yet. Ring is empty.
                return None;
            }
            // diff > 0: another consumer already drained this position.
        }
    }

    /// Spins until space is available, then pushes.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` on timeout.
    pub fn push_blocking(&self, mut item: T, timeout: Timeout) -> Result<(), T> {
        let deadline = timeout.deadline();
        let mut spins = 0u32;
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if let Some(dl) = deadline
                        && Instant::now() > dl
                    {
                        return Err(item);
                    }
                    spin_backoff(&mut spins);
                }
            }
        }
    }

    /// Spins until an item is available, then pops.
    ///
    /// Returns `None` on timeout.
    #[must_use]
    pub fn pop_blocking(&self, timeout: Timeout) -> Option<T> {
        let deadline = timeout.deadline();
        let mut spins = 0u32;
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                return None;
            }
            spin_backoff(&mut spins);
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // Exclusive access here: drain anything still published.
        while self.pop().is_some() {}
    }
}

impl<T> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// SAFETY: slot access is mediated by the per-slot sequence protocol with
// release/acquire pairing, and cursor claims go through CAS, so concurrent
// producers and consumers never touch the same slot at the same time.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}
