//! Bookkeeping for DE replenishment
//!
//! Two triggers refill the on-chain queue: a periodic comparison against the
//! on-chain count and a usage counter bumped by every signing request that
//! draws one of our DEs. Both reserve through the same mutex, so the amount
//! already in flight is never requested twice.

use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    /// Submitted, not yet committed or rejected
    pending: u64,
    /// Drawn by signings since the last refill
    used: u64,
}

#[derive(Debug, Default)]
pub struct DeCounter {
    counts: Mutex<Counts>,
}

impl DeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_counts<T>(&self, f: impl FnOnce(&mut Counts) -> T) -> T {
        match self.counts.lock() {
            Ok(mut counts) => f(&mut counts),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// How many DEs to submit so the queue refills to `max`
    ///
    /// Nothing is reserved while `on_chain + pending` is at least `expected`.
    /// A reservation also clears the usage counter it covers.
    pub fn compute_and_add_missing(&self, on_chain: u64, expected: u64, max: u64) -> u64 {
        self.with_counts(|counts| {
            let have = on_chain + counts.pending;
            if have >= expected {
                return 0;
            }
            let missing = max.saturating_sub(have);
            counts.pending += missing;
            counts.used = 0;
            missing
        })
    }

    /// Count one drawn DE; once `threshold` have been drawn, reserve that
    /// many replacements and return the amount
    pub fn check_usage_and_add_pending(&self, threshold: u64) -> u64 {
        self.with_counts(|counts| {
            counts.used += 1;
            if counts.used < threshold.max(1) {
                return 0;
            }
            let refill = counts.used;
            counts.used = 0;
            counts.pending += refill;
            refill
        })
    }

    pub fn update_committed(&self, n: u64) {
        self.with_counts(|counts| counts.pending = counts.pending.saturating_sub(n));
    }

    /// Same bookkeeping as a commit; the rejected DEs must be regenerated
    pub fn update_rejected(&self, n: u64) {
        self.with_counts(|counts| counts.pending = counts.pending.saturating_sub(n));
    }

    pub fn pending(&self) -> u64 {
        self.with_counts(|counts| counts.pending)
    }

    pub fn used(&self) -> u64 {
        self.with_counts(|counts| counts.used)
    }
}

/// Interval trigger: refill once the queue drops below two thirds
pub fn expected_de_count(max_de_size: u64) -> u64 {
    max_de_size * 2 / 3
}

/// Usage trigger: refill after a sixth of the queue was drawn
pub fn usage_threshold(max_de_size: u64) -> u64 {
    max_de_size / 6
}
