//! Retry policy for device faults.
//!
//! The adapter never retries on its own. A policy supplied at construction
//! decides, per failed attempt, whether the operation is issued again.

use crate::domain::error::DeviceError;

/// Decides whether a failed block-device operation is attempted again.
pub trait RetryPolicy {
    /// Called after every failure. `attempt` counts failures so far,
    /// starting at 1. Returning `false` surfaces `error` to the caller.
    fn should_retry(&mut self, error: &DeviceError, attempt: u32) -> bool;
}

/// Surface every fault immediately.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    #[inline]
    fn should_retry(&mut self, _error: &DeviceError, _attempt: u32) -> bool {
        false
    }
}

/// Retry each operation up to `n` extra times.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTimes(pub u32);

impl RetryPolicy for RetryTimes {
    #[inline]
    fn should_retry(&mut self, _error: &DeviceError, attempt: u32) -> bool {
        attempt <= self.0
    }
}

impl<F> RetryPolicy for F
where
    F: FnMut(&DeviceError, u32) -> bool,
{
    fn should_retry(&mut self, error: &DeviceError, attempt: u32) -> bool {
        self(error, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{FlashFault, Operation};

    const ERR: DeviceError = DeviceError::new(Operation::Read, 0, FlashFault::Other);

    #[test]
    fn test_no_retry() {
        assert!(!NoRetry.should_retry(&ERR, 1));
    }

    #[test]
    fn test_retry_times() {
        let mut policy = RetryTimes(2);
        assert!(policy.should_retry(&ERR, 1));
        assert!(policy.should_retry(&ERR, 2));
        assert!(!policy.should_retry(&ERR, 3));
    }

    #[test]
    fn test_closure_policy() {
        let mut reads_only = |error: &DeviceError, attempt: u32| {
            error.operation == Operation::Read && attempt < 2
        };
        assert!(reads_only.should_retry(&ERR, 1));
        assert!(!reads_only.should_retry(&ERR, 2));

        let erase = DeviceError::new(Operation::Erase, 0, FlashFault::Other);
        assert!(!reads_only.should_retry(&erase, 1));
    }
}
