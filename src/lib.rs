//! Lock-free data-exchange primitives for real-time producer/consumer
//! pipelines.
//!
//! This crate provides three independent concurrent containers, each
//! designed for shared-memory multi-core execution with no locks and no
//! blocking syscalls in the hot path:
//!
//! - [`spsc`]: a fixed-capacity ring queue for exactly one producer thread
//!   and one consumer thread. No compare-and-swap anywhere; publication is a
//!   plain release store.
//! - [`mpmc`]: a fixed-capacity ring buffer for any number of concurrent
//!   producers and consumers, coordinated by per-slot sequence numbers and
//!   one CAS per operation.
//! - [`pool`]: an unbounded object pool built from a growing chain of
//!   fixed-capacity segments, lock-free in the steady state.
//!
//! Ring capacities are fixed at construction and must be powers of two so
//! cursor masking replaces modulo. Non-blocking operations signal full/empty
//! through their return values; blocking variants spin with progressive
//! backoff and an optional [`Timeout`]. The containers move owned payloads:
//! ownership passes from producer to container to consumer, with no
//! reference counting on the hot path.

pub mod error;
pub mod mpmc;
pub mod pool;
pub mod spsc;
pub mod wait;

mod shim;
mod trace;

pub use error::ConfigError;
pub use trace::init_tracing;
pub use wait::Timeout;
