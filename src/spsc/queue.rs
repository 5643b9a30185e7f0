//! Safe producer/consumer handles over the SPSC ring core.
//!
//! [`channel`] allocates the shared ring and returns exactly one [`Producer`]
//! and one [`Consumer`]. Both handles are [`Send`] but not [`Sync`]: each can
//! move to its thread, neither can be shared, which upholds the single
//! producer/single consumer contract of the underlying algorithm at compile
//! time and zero runtime cost.

use std::cell::Cell;
use std::marker::PhantomData;

use minstant::Instant;

use crate::error::ConfigError;
use crate::shim::sync::Arc;
use crate::spsc::ring::RingQueue;
use crate::wait::{Timeout, spin_backoff};

/// Marker type to opt out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Producer` (no concurrent `push()`)
pub struct Producer<T: Send> {
    ring: Arc<RingQueue<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue.
///
/// Same thread-safety semantics as [`Producer`], applied to the consumer
/// role.
pub struct Consumer<T: Send> {
    ring: Arc<RingQueue<T>>,
    _unsync: PhantomUnsync,
}

/// Creates a new SPSC channel with the given capacity.
///
/// Returns a `(Producer, Consumer)` pair. The capacity must be a power of
/// two and at least 2.
///
/// # Errors
///
/// Returns [`ConfigError`] if the capacity is out of range or not a power
/// of two.
///
/// # Example
///
/// ```
/// let (tx, rx) = hermes::spsc::channel::<String>(16)?;
///
/// tx.push("hello".to_string()).unwrap();
/// assert_eq!(rx.pop(), Some("hello".to_string()));
/// # Ok::<(), hermes::ConfigError>(())
/// ```
pub fn channel<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), ConfigError> {
    let ring = Arc::new(RingQueue::new(capacity)?);

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    Ok((producer, consumer))
}

impl<T: Send> Producer<T> {
    /// Attempts to push an item onto the queue without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this handle is the only producer; it is not Sync and only
        // one was ever created for this ring.
        unsafe { self.ring.push(item) }
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

    /// Advisory snapshot of the number of queued items.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` if the queue appears empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed capacity of the queue.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop an item from the queue without blocking.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: this handle is the only consumer; it is not Sync and only
        // one was ever created for this ring.
        unsafe { self.ring.pop() }
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

    /// Advisory snapshot of the number of queued items.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` if the queue appears empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed capacity of the queue.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ConfigError;

    #[test]
    fn test_invalid_capacity() {
        assert_eq!(
            channel::<u64>(0).err(),
            Some(ConfigError::CapacityTooSmall { got: 0, min: 2 })
        );
        assert_eq!(
            channel::<u64>(1).err(),
            Some(ConfigError::CapacityTooSmall { got: 1, min: 2 })
        );
        assert_eq!(
            channel::<u64>(3).err(),
            Some(ConfigError::CapacityNotPowerOfTwo(3))
        );
        assert_eq!(
            channel::<u64>(5).err(),
            Some(ConfigError::CapacityNotPowerOfTwo(5))
        );
        assert!(channel::<u64>(2).is_ok());
        assert!(channel::<u64>(1024).is_ok());
    }

    #[test]
    fn test_basic_push_pop() {
        let (producer, consumer) = channel::<u64>(8).unwrap();

        assert!(producer.push(42).is_ok());
        assert_eq!(consumer.pop(), Some(42));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_fifo_order() {
        let (producer, consumer) = channel::<u64>(8).unwrap();

        for i in [1, 2, 3] {
            assert!(producer.push(i).is_ok());
        }

        assert_eq!(consumer.pop(), Some(1));
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(consumer.pop(), Some(3));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_queue_full() {
        let (producer, consumer) = channel::<u64>(4).unwrap();

        for i in 0..4 {
            assert!(producer.push(i).is_ok(), "Failed to push item {i}");
        }

        assert_eq!(producer.push(999), Err(999));

        assert_eq!(consumer.pop(), Some(0));
        assert!(producer.push(4).is_ok());
        assert_eq!(producer.push(1000), Err(1000));
    }

    #[test]
    fn test_len() {
        let (producer, consumer) = channel::<u64>(8).unwrap();
        assert_eq!(producer.len(), 0);
        assert!(consumer.is_empty());
        assert_eq!(producer.capacity(), 8);

        producer.push(1).unwrap();
        producer.push(2).unwrap();
        assert_eq!(producer.len(), 2);
        assert_eq!(consumer.len(), 2);

        consumer.pop().unwrap();
        assert_eq!(consumer.len(), 1);
    }

    #[test]
    fn test_wrapping_behavior() {
        let (producer, consumer) = channel::<u64>(4).unwrap();

        for round in 0..5 {
            for i in 0..4 {
                assert!(producer.push(round * 10 + i).is_ok());
            }

            for i in 0..4 {
                assert_eq!(consumer.pop(), Some(round * 10 + i));
            }

            assert_eq!(consumer.pop(), None);
        }
    }

    #[test]
    fn test_interleaved_operations() {
        let (producer, consumer) = channel::<u64>(8).unwrap();

        producer.push(1).unwrap();
        producer.push(2).unwrap();
        assert_eq!(consumer.pop(), Some(1));
        producer.push(3).unwrap();
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(consumer.pop(), Some(3));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_non_copy_type() {
        let (producer, consumer) = channel::<String>(8).unwrap();

        producer.push("hello".to_string()).unwrap();
        producer.push("world".to_string()).unwrap();

        assert_eq!(consumer.pop(), Some("hello".to_string()));
        assert_eq!(consumer.pop(), Some("world".to_string()));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_blocking_timeout() {
        let (producer, consumer) = channel::<u64>(2).unwrap();

        // Empty queue: pop_blocking expires.
        assert_eq!(
            consumer.pop_blocking(Timeout::from(Duration::from_millis(10))),
            None
        );

        producer.push(1).unwrap();
        producer.push(2).unwrap();

        // Full queue: push_blocking expires and hands the item back.
        assert_eq!(
            producer.push_blocking(3, Timeout::from(Duration::from_millis(10))),
            Err(3)
        );

        // With room available the blocking variants return immediately.
        assert_eq!(consumer.pop_blocking(Timeout::Infinite), Some(1));
        assert!(producer.push_blocking(3, Timeout::Infinite).is_ok());
    }

    #[test]
    fn test_concurrent_push_pop() {
        let (producer, consumer) = channel::<u64>(64).unwrap();
        let count = 10_000u64;

        let producer_handle = std::thread::spawn(move || {
            for i in 0..count {
                while producer.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let consumer_handle = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(count as usize);
            while received.len() < count as usize {
                if let Some(item) = consumer.pop() {
                    received.push(item);
                } else {
                    std::hint::spin_loop();
                }
            }
            received
        });

        producer_handle.join().unwrap();
        let received = consumer_handle.join().unwrap();

        // FIFO order end to end.
        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }

    #[test]
    fn test_drop_drains_pending_items() {
        use std::sync::Arc as StdArc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Debug)]
        struct Tracked(StdArc<AtomicUsize>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = StdArc::new(AtomicUsize::new(0));
        let (producer, consumer) = channel::<Tracked>(8).unwrap();

        for _ in 0..5 {
            producer.push(Tracked(StdArc::clone(&drops))).unwrap();
        }
        drop(consumer.pop().unwrap());
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        // Dropping both handles drops the four undelivered payloads.
        drop(producer);
        drop(consumer);
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }
}
