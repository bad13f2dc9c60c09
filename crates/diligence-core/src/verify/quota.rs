//! Shared external-lookup budget.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Returned when a lookup is attempted with no budget left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("search quota exhausted ({max} of {max} used)")]
pub struct QuotaExhausted {
    pub max: u32,
}

/// Counter with `used <= max` at all times.
///
/// Check-and-increment is one atomic step, so the quota can be shared
/// across concurrent verifications behind an `Arc`. A rejected attempt
/// changes nothing.
#[derive(Debug)]
pub struct SearchQuota {
    max: u32,
    used: AtomicU32,
}

impl SearchQuota {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            used: AtomicU32::new(0),
        }
    }

    /// Claims one lookup. Returns the number of lookups remaining after it.
    pub fn try_acquire(&self) -> Result<u32, QuotaExhausted> {
        let max = self.max;
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < max).then_some(used + 1)
            })
            .map(|prev| max - (prev + 1))
            .map_err(|_| QuotaExhausted { max })
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rejects_attempt_past_max() {
        let quota = SearchQuota::new(2);
        assert_eq!(quota.try_acquire(), Ok(1));
        assert_eq!(quota.try_acquire(), Ok(0));
        assert_eq!(quota.try_acquire(), Err(QuotaExhausted { max: 2 }));
        assert_eq!(quota.used(), 2);
    }

    #[test]
    fn zero_quota_never_grants() {
        let quota = SearchQuota::new(0);
        assert!(quota.try_acquire().is_err());
        assert_eq!(quota.used(), 0);
    }

    #[test]
    fn concurrent_acquires_never_exceed_max() {
        let quota = Arc::new(SearchQuota::new(10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let q = quota.clone();
                std::thread::spawn(move || (0..5).filter(|_| q.try_acquire().is_ok()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 10);
        assert_eq!(quota.used(), 10);
        assert!(quota.try_acquire().is_err());
    }
}
