//! Segmented lock-free object pool.
//!
//! An unbounded pool built from an append-only, singly-linked chain of
//! fixed-capacity segments. Acquire and release are lock-free in the steady
//! state; a mutex guards only the rare transitions (advancing the drain
//! segment, appending a fill segment). Each appended segment doubles the
//! previous capacity, so growth frequency falls off geometrically.
//!
//! Items live on the heap as [`Box`]es: handing one back to the pool is a
//! single pointer exchange, and a reacquired item keeps its address, so the
//! pool never reallocates what it recycles.
//!
//! Behavioral notes:
//!
//! - An empty pool never blocks: [`Pool::acquire`] falls back to the factory
//!   and returns a fresh item.
//! - No ordering is guaranteed between releases and subsequent acquires;
//!   the only promise is "some previously released or freshly minted item."
//! - The pool never shrinks. Segments stay allocated until the pool drops.
//! - The slot handoff inside acquire/release spins while a racing thread
//!   finishes its claimed transfer. The wait is transient by construction
//!   but unbounded under pathological starvation; callers with hard
//!   real-time bounds should treat the pool as best-effort.
//!
//! # Example
//!
//! ```
//! let pool = hermes::pool::Pool::new(16, || Vec::<u8>::with_capacity(1500))?;
//!
//! let mut buf = pool.acquire();
//! buf.extend_from_slice(b"payload");
//! buf.clear();
//! pool.release(buf);
//!
//! // The next acquire reuses the released buffer instead of allocating.
//! let buf = pool.acquire();
//! assert!(buf.capacity() >= 1500);
//! # Ok::<(), hermes::ConfigError>(())
//! ```

use std::ptr;

use crate::error::{self, ConfigError};
use crate::shim::atomic::{AtomicPtr, AtomicUsize, Ordering};
use crate::shim::sync::Mutex;
use crate::trace;
use crate::wait::spin_backoff;

/// Fixed-capacity block of item slots within the pool's growth chain.
struct Segment<T> {
    /// Item cells; null means empty. Ownership of an item transfers through
    /// a single pointer exchange on its cell.
    slots: Box<[AtomicPtr<T>]>,
    mask: usize,
    /// Claim cursor for acquires. Monotonic; the physical slot is
    /// `low & mask`.
    low: AtomicUsize,
    /// Claim cursor for releases.
    high: AtomicUsize,
    /// Number of items currently available in this segment. Guarded by CAS:
    /// a successful decrement entitles the caller to drain one slot, a
    /// successful increment to fill one.
    count: AtomicUsize,
    /// Forward link to the next, larger segment. Null until appended; once
    /// set it never changes.
    next: AtomicPtr<Segment<T>>,
}

impl<T> Segment<T> {
    fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self {
            slots,
            mask: capacity - 1,
            low: AtomicUsize::new(0),
            high: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// Unbounded lock-free pool of reusable heap objects.
///
/// All operations take `&self`; share the pool between threads with
/// [`std::sync::Arc`].
pub struct Pool<T: 'static> {
    /// Segment currently drained by acquires. Only ever swings forward
    /// along the chain.
    head: AtomicPtr<Segment<T>>,
    /// Segment currently filled by releases. Always the last in the chain.
    tail: AtomicPtr<Segment<T>>,
    /// Chain origin, kept so `Drop` can walk every segment. Segments are
    /// never freed while the pool is alive, even after `head` passes them.
    first: *mut Segment<T>,
    /// Guards head-advance and tail-append only. Never held during the slot
    /// transfer of an acquire or release.
    grow: Mutex<()>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T: 'static> Pool<T> {
    /// Minimum segment capacity.
    pub const MIN_CAPACITY: usize = 1;

    /// Creates a pool whose initial segment holds `capacity` items, with
    /// `factory` producing fresh items whenever the pool is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] unless `capacity` is a positive power of two.
    pub fn new<F>(capacity: usize, factory: F) -> Result<Self, ConfigError>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        error::check_capacity(capacity, Self::MIN_CAPACITY)?;

        let first = Box::into_raw(Box::new(Segment::new(capacity)));

        Ok(Self {
            head: AtomicPtr::new(first),
            tail: AtomicPtr::new(first),
            first,
            grow: Mutex::new(()),
            factory: Box::new(factory),
        })
    }

    /// Takes an item out of the pool, or mints a fresh one via the factory
    /// if no released item is available.
    ///
    /// Never blocks on an empty pool.
    #[must_use]
    pub fn acquire(&self) -> Box<T> {
        loop {
            let head_ptr = self.head.load(Ordering::Acquire);
            // SAFETY: segments are never freed while the pool is alive.
            let head = unsafe { &*head_ptr };
            let count = head.count.load(Ordering::Acquire);

            if count == 0 {
                if head.next.load(Ordering::Acquire).is_null() {
                    // Pool miss: hand out a fresh item rather than wait.
                    return Box::new((self.factory)());
                }

                // A later segment exists, so this one is drained for good.
                // Swing `head` forward under the lock; the lock only
                // serializes racing swings, the new head is then read
                // lock-free by everyone.
                let _guard = self.grow.lock().expect("pool lock poisoned");
                let current_ptr = self.head.load(Ordering::Relaxed);
                // SAFETY: as above; the chain outlives the pool.
                let current = unsafe { &*current_ptr };
                let next = current.next.load(Ordering::Relaxed);
                if !next.is_null() && current.count.load(Ordering::Relaxed) == 0 {
                    self.head.store(next, Ordering::Release);
                    trace::trace!("pool drain segment advanced");
                }
                continue;
            }

            // Claim one of the available items by decrementing the count.
            // Losing the race just means retrying against fresh state.
            if head
                .count
                .compare_exchange(count, count - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            // The claim owns exactly one item somewhere in this segment.
            // Take the next drain slot; if the racing release that made
            // `count` visible hasn't landed its pointer yet, spin until it
            // does.
            let low = head.low.fetch_add(1, Ordering::Relaxed);
            let slot = &head.slots[low & head.mask];
            let mut spins = 0u32;
            loop {
                let item = slot.swap(ptr::null_mut(), Ordering::Acquire);
                if !item.is_null() {
                    // SAFETY: the pointer came from `Box::into_raw` in
                    // `release`, and the swap transferred ownership to this
                    // thread exactly once.
                    return unsafe { Box::from_raw(item) };
                }
                spin_backoff(&mut spins);
            }
        }
    }

    /// Returns an item to the pool for later reuse.
    ///
    /// Any item of the right type is accepted, whether it came from
    /// [`Pool::acquire`] or elsewhere. The pool grows a new segment when
    /// the current fill segment is full, so no release is ever dropped.
    pub fn release(&self, item: Box<T>) {
        let raw = Box::into_raw(item);

        loop {
            let tail_ptr = self.tail.load(Ordering::Acquire);
            // SAFETY: segments are never freed while the pool is alive.
            let tail = unsafe { &*tail_ptr };
            let count = tail.count.load(Ordering::Acquire);

            if count == tail.capacity() {
                // Fill segment is full. Append a doubled segment unless a
                // racing release already has; either way, retry against the
                // updated tail.
                let _guard = self.grow.lock().expect("pool lock poisoned");
                let current_ptr = self.tail.load(Ordering::Relaxed);
                // SAFETY: as above; the chain outlives the pool.
                let current = unsafe { &*current_ptr };
                if current.next.load(Ordering::Relaxed).is_null()
                    && current.count.load(Ordering::Relaxed) == current.capacity()
                {
                    let capacity = current.capacity() << 1;
                    let segment = Box::into_raw(Box::new(Segment::new(capacity)));
                    current.next.store(segment, Ordering::Release);
                    self.tail.store(segment, Ordering::Release);
                    trace::debug!("pool grew: appended segment of {capacity} slots");
                }
                continue;
            }

            // Claim room for one item, then place it in the next fill slot.
            if tail
                .count
                .compare_exchange(count, count + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            let high = tail.high.fetch_add(1, Ordering::Relaxed);
            let slot = &tail.slots[high & tail.mask];
            let mut spins = 0u32;
            loop {
                // The slot can transiently still hold an item an acquirer
                // has claimed but not yet taken; wait for it to empty.
                if slot
                    .compare_exchange(ptr::null_mut(), raw, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                spin_backoff(&mut spins);
            }
        }
    }

    /// Number of segments in the growth chain.
    #[cfg(test)]
    fn segment_count(&self) -> usize {
        let mut n = 0;
        let mut seg_ptr = self.first;
        while !seg_ptr.is_null() {
            n += 1;
            // SAFETY: chain pointers stay valid for the pool's lifetime.
            seg_ptr = unsafe { &*seg_ptr }.next.load(Ordering::Relaxed);
        }
        n
    }
}

impl<T: Default + 'static> Pool<T> {
    /// Creates a pool whose factory is `T::default`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] unless `capacity` is a positive power of two.
    pub fn with_default(capacity: usize) -> Result<Self, ConfigError> {
        Self::new(capacity, T::default)
    }
}

impl<T: 'static> Drop for Pool<T> {
    fn drop(&mut self) {
        // Exclusive access here: free every parked item, then the chain.
        let mut seg_ptr = self.first;
        while !seg_ptr.is_null() {
            // SAFETY: every segment was created by Box::into_raw and
            // appears in the chain exactly once.
            let segment = unsafe { Box::from_raw(seg_ptr) };
            for slot in &segment.slots {
                let item = slot.load(Ordering::Relaxed);
                if !item.is_null() {
                    // SAFETY: a non-null cell owns the item it points to.
                    drop(unsafe { Box::from_raw(item) });
                }
            }
            seg_ptr = segment.next.load(Ordering::Relaxed);
        }
    }
}

// SAFETY: item ownership moves through atomic pointer exchanges, segment
// links are published with release stores (or under the growth lock), and
// segments are only freed in Drop where access is exclusive.
unsafe impl<T: Send + 'static> Send for Pool<T> {}
unsafe impl<T: Send + 'static> Sync for Pool<T> {}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ConfigError;

    /// Pool whose factory counts how many fresh items it minted.
    fn counting_pool(capacity: usize) -> (Pool<u64>, Arc<AtomicUsize>) {
        let minted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&minted);
        let pool = Pool::new(capacity, move || {
            counter.fetch_add(1, Ordering::Relaxed);
            0u64
        })
        .unwrap();
        (pool, minted)
    }

    #[test]
    fn test_invalid_capacity() {
        assert_eq!(
            Pool::<u64>::with_default(0).err(),
            Some(ConfigError::CapacityTooSmall { got: 0, min: 1 })
        );
        assert_eq!(
            Pool::<u64>::with_default(3).err(),
            Some(ConfigError::CapacityNotPowerOfTwo(3))
        );
        assert_eq!(
            Pool::<u64>::with_default(6).err(),
            Some(ConfigError::CapacityNotPowerOfTwo(6))
        );
        // A single-slot initial segment is legal, unlike the rings.
        assert!(Pool::<u64>::with_default(1).is_ok());
        assert!(Pool::<u64>::with_default(64).is_ok());
    }

    #[test]
    fn test_empty_pool_uses_factory() {
        let (pool, minted) = counting_pool(4);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(minted.load(Ordering::Relaxed), 2);

        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn test_release_then_acquire_reuses_item() {
        let (pool, minted) = counting_pool(4);

        let item = pool.acquire();
        assert_eq!(minted.load(Ordering::Relaxed), 1);
        let addr = &*item as *const u64 as usize;

        pool.release(item);
        let again = pool.acquire();

        // Identity is preserved and the factory was not consulted again.
        assert_eq!(&*again as *const u64 as usize, addr);
        assert_eq!(minted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_growth_appends_doubling_segments() {
        let (pool, minted) = counting_pool(2);
        assert_eq!(pool.segment_count(), 1);

        // 7 releases need 2 + 4 slots and then one more segment.
        let items: Vec<_> = (0..7).map(|_| pool.acquire()).collect();
        for item in items {
            pool.release(item);
        }
        assert_eq!(pool.segment_count(), 3);

        // Everything released comes back out without touching the factory.
        let before = minted.load(Ordering::Relaxed);
        for _ in 0..7 {
            let _ = pool.acquire();
        }
        assert_eq!(minted.load(Ordering::Relaxed), before);

        // Draining past what was released is a pool miss again.
        let _ = pool.acquire();
        assert_eq!(minted.load(Ordering::Relaxed), before + 1);
    }

    #[test]
    fn test_single_slot_segment() {
        let (pool, _) = counting_pool(1);

        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.segment_count(), 2);

        let _ = pool.acquire();
        let _ = pool.acquire();
    }

    #[test]
    fn test_with_default() {
        let pool = Pool::<Vec<u8>>::with_default(8).unwrap();
        let item = pool.acquire();
        assert!(item.is_empty());
        pool.release(item);
    }

    #[test]
    fn test_churn_single_thread() {
        let (pool, minted) = counting_pool(2);

        // Interleave acquires and releases across the growth boundary.
        let mut held = Vec::new();
        for round in 0..50 {
            for _ in 0..(round % 5) + 1 {
                held.push(pool.acquire());
            }
            while let Some(item) = held.pop() {
                pool.release(item);
            }
        }

        // Steady-state churn mints far fewer items than it recycles.
        assert!(minted.load(Ordering::Relaxed) <= 5);
    }

    #[test]
    fn test_drop_frees_parked_items() {
        struct Tracked(Arc<AtomicUsize>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&drops);
        let pool = Pool::new(2, move || Tracked(Arc::clone(&handle))).unwrap();

        for _ in 0..5 {
            let item = Box::new(Tracked(Arc::clone(&drops)));
            pool.release(item);
        }
        drop(pool.acquire());
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        // The four still-parked items are freed with the pool.
        drop(pool);
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }
}
