//! Single-producer/single-consumer ring queue.
//!
//! A fixed-capacity circular queue for exactly one producer thread and one
//! consumer thread. Because each side owns its cursor outright, neither side
//! ever executes a compare-and-swap: publication is a plain release store,
//! which is what makes this the cheapest of the ring types.
//!
//! The single-producer/single-consumer restriction is deliberate and is not
//! checked at runtime (a runtime check would cost the lock-free property).
//! Instead it is encoded in the types: [`channel`] hands out exactly one
//! [`Producer`] and one [`Consumer`], each of which can move to another
//! thread but cannot be shared between threads. Code that needs concurrent
//! producers or consumers wants [`crate::mpmc::Ring`] instead.
//!
//! # Example
//!
//! ```
//! let (producer, consumer) = hermes::spsc::channel::<u64>(1024)?;
//!
//! let sender = std::thread::spawn(move || {
//!     for i in 0..100 {
//!         while producer.push(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! let mut next = 0;
//! while next < 100 {
//!     if let Some(value) = consumer.pop() {
//!         assert_eq!(value, next);
//!         next += 1;
//!     }
//! }
//! sender.join().unwrap();
//! # Ok::<(), hermes::ConfigError>(())
//! ```

pub(crate) mod ring;

mod queue;

pub use queue::{Consumer, Producer, channel};
