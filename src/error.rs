//! Construction-time configuration errors.
//!
//! Only misconfiguration at construction is an error. Steady-state outcomes
//! of the containers (ring full, ring empty, pool miss) are expected
//! conditions and surface through the return values of the operations
//! themselves, never through this type.

use thiserror::Error;

/// Error raised when a container is constructed with an invalid capacity.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The requested capacity is below the container's minimum.
    #[error("capacity {got} is below the minimum of {min}")]
    CapacityTooSmall {
        /// The capacity that was requested.
        got: usize,
        /// The smallest capacity this container accepts.
        min: usize,
    },

    /// Capacities must be powers of two so cursors can be masked instead of
    /// taking a modulo.
    #[error("capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),
}

/// Validates a capacity: at least `min`, and a power of two.
pub(crate) fn check_capacity(capacity: usize, min: usize) -> Result<(), ConfigError> {
    if capacity < min {
        return Err(ConfigError::CapacityTooSmall { got: capacity, min });
    }
    if !capacity.is_power_of_two() {
        return Err(ConfigError::CapacityNotPowerOfTwo(capacity));
    }
    Ok(())
}
