//! Two-sided gate coupling sample and insert rates.
//!
//! The limiter tracks how many inserts, samples and deletes a table has
//! committed and answers two predicates: may one more insert proceed, and
//! may one more sample proceed. Both are evaluated under the table's mutex;
//! the table parks callers on its condition variables until the relevant
//! predicate flips or the deadline expires.
//!
//! With `samples_per_insert = ρ`, the gates keep the running difference
//! `ρ·inserts − samples` inside `[min_diff, max_diff]`: an insert is
//! admitted while the post-insert difference stays at or below `max_diff`,
//! a sample while the post-sample difference stays at or above `min_diff`.
//! Two size-based escape hatches make start-up and drain behave: inserts
//! are always admitted while the table holds fewer than
//! `min_size_to_sample` items, and samples are never admitted below that
//! size (deletes count against the size, not against the ratio).

use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Construction parameters for a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Target number of samples per insert (ρ). Must be finite and positive.
    pub samples_per_insert: f64,
    /// Number of items the table must hold before sampling is admitted.
    pub min_size_to_sample: i64,
    /// Lower bound on `ρ·inserts − samples` after a sample.
    pub min_diff: f64,
    /// Upper bound on `ρ·inserts − samples` after an insert.
    pub max_diff: f64,
}

impl Default for RateLimiterConfig {
    /// A limiter that only waits for the first item: one sample per insert,
    /// min size 1, and an unbounded diff window.
    fn default() -> Self {
        Self {
            samples_per_insert: 1.0,
            min_size_to_sample: 1,
            min_diff: f64::MIN,
            max_diff: f64::MAX,
        }
    }
}

impl RateLimiterConfig {
    /// Create a config with the given parameters.
    pub fn new(samples_per_insert: f64, min_size_to_sample: i64, min_diff: f64, max_diff: f64) -> Self {
        Self {
            samples_per_insert,
            min_size_to_sample,
            min_diff,
            max_diff,
        }
    }

    /// Config for queue-like tables: inserts block once `max_size` items
    /// are pending, samples block on empty.
    pub fn queue(max_size: i64) -> Self {
        Self::new(1.0, 1, 0.0, max_size as f64)
    }
}

/// Counter snapshot of a rate limiter, as stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterCheckpoint {
    /// Target number of samples per insert.
    pub samples_per_insert: f64,
    /// Minimum table size before sampling is admitted.
    pub min_size_to_sample: i64,
    /// Lower bound of the diff window.
    pub min_diff: f64,
    /// Upper bound of the diff window.
    pub max_diff: f64,
    /// Number of samples committed when the checkpoint was taken.
    pub sample_count: i64,
    /// Number of inserts committed when the checkpoint was taken.
    pub insert_count: i64,
}

/// The sample/insert coupling gate.
///
/// Pure bookkeeping: all blocking lives in the table, which owns the mutex
/// and condition variables this state is evaluated under.
#[derive(Debug)]
pub struct RateLimiter {
    samples_per_insert: f64,
    min_size_to_sample: i64,
    min_diff: f64,
    max_diff: f64,
    inserts: i64,
    samples: i64,
    deletes: i64,
    cancelled: bool,
}

impl RateLimiter {
    /// Create a limiter, validating the parameters.
    pub fn new(config: RateLimiterConfig) -> Result<Self, TableError> {
        if !config.samples_per_insert.is_finite() || config.samples_per_insert <= 0.0 {
            return Err(TableError::InvalidArgument(format!(
                "samples_per_insert {} must be finite and positive",
                config.samples_per_insert
            )));
        }
        if config.min_size_to_sample < 1 {
            return Err(TableError::InvalidArgument(format!(
                "min_size_to_sample {} must be at least 1",
                config.min_size_to_sample
            )));
        }
        if config.min_diff.is_nan() || config.max_diff.is_nan() || config.min_diff > config.max_diff {
            return Err(TableError::InvalidArgument(format!(
                "diff window [{}, {}] is not a valid interval",
                config.min_diff, config.max_diff
            )));
        }
        Ok(Self {
            samples_per_insert: config.samples_per_insert,
            min_size_to_sample: config.min_size_to_sample,
            min_diff: config.min_diff,
            max_diff: config.max_diff,
            inserts: 0,
            samples: 0,
            deletes: 0,
            cancelled: false,
        })
    }

    /// Rebuild a limiter from checkpointed parameters and counters.
    ///
    /// The delete counter restarts at zero: a restored table only replays
    /// the items that survived, so there is nothing left to subtract.
    pub fn from_checkpoint(checkpoint: &RateLimiterCheckpoint) -> Result<Self, TableError> {
        let mut limiter = Self::new(RateLimiterConfig::new(
            checkpoint.samples_per_insert,
            checkpoint.min_size_to_sample,
            checkpoint.min_diff,
            checkpoint.max_diff,
        ))?;
        limiter.inserts = checkpoint.insert_count;
        limiter.samples = checkpoint.sample_count;
        Ok(limiter)
    }

    /// Check whether `num_inserts` more inserts may proceed.
    pub fn can_insert(&self, num_inserts: i64) -> bool {
        // Below the min size, inserts are always admitted.
        if self.inserts + num_inserts - self.deletes <= self.min_size_to_sample {
            return true;
        }
        let diff =
            (self.inserts + num_inserts) as f64 * self.samples_per_insert - self.samples as f64;
        diff <= self.max_diff
    }

    /// Check whether `num_samples` more samples may proceed.
    pub fn can_sample(&self, num_samples: i64) -> bool {
        if self.inserts - self.deletes < self.min_size_to_sample {
            return false;
        }
        let diff = self.inserts as f64 * self.samples_per_insert
            - (self.samples + num_samples) as f64;
        diff >= self.min_diff
    }

    /// Record a committed insert. Call only after `can_insert` admitted it.
    pub(crate) fn insert(&mut self) {
        self.inserts += 1;
    }

    /// Record a committed sample. Call only after `can_sample` admitted it.
    pub(crate) fn sample(&mut self) {
        self.samples += 1;
    }

    /// Record a deletion (explicit, eviction or auto-delete).
    pub(crate) fn delete(&mut self) {
        self.deletes += 1;
    }

    /// Zero all counters.
    pub(crate) fn reset(&mut self) {
        self.inserts = 0;
        self.samples = 0;
        self.deletes = 0;
    }

    /// Mark every pending and future wait as cancelled. Irreversible.
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Whether the limiter has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of inserts committed since construction or the last reset.
    pub fn insert_count(&self) -> i64 {
        self.inserts
    }

    /// Number of samples committed since construction or the last reset.
    pub fn sample_count(&self) -> i64 {
        self.samples
    }

    /// Number of deletions recorded since construction or the last reset.
    pub fn delete_count(&self) -> i64 {
        self.deletes
    }

    /// Snapshot parameters and counters for a checkpoint.
    pub fn checkpoint(&self) -> RateLimiterCheckpoint {
        RateLimiterCheckpoint {
            samples_per_insert: self.samples_per_insert,
            min_size_to_sample: self.min_size_to_sample,
            min_diff: self.min_diff,
            max_diff: self.max_diff,
            sample_count: self.samples,
            insert_count: self.inserts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(samples_per_insert: f64, min_size: i64, min_diff: f64, max_diff: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig::new(
            samples_per_insert,
            min_size,
            min_diff,
            max_diff,
        ))
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(RateLimiter::new(RateLimiterConfig::new(0.0, 1, -1.0, 1.0)).is_err());
        assert!(RateLimiter::new(RateLimiterConfig::new(-1.0, 1, -1.0, 1.0)).is_err());
        assert!(RateLimiter::new(RateLimiterConfig::new(1.0, 0, -1.0, 1.0)).is_err());
        assert!(RateLimiter::new(RateLimiterConfig::new(1.0, 1, 2.0, 1.0)).is_err());
        assert!(RateLimiter::new(RateLimiterConfig::new(1.0, 1, f64::NAN, 1.0)).is_err());
        assert!(RateLimiter::new(RateLimiterConfig::default()).is_ok());
    }

    #[test]
    fn test_sampling_waits_for_min_size() {
        let mut limiter = limiter(1.0, 3, f64::MIN, f64::MAX);
        assert!(!limiter.can_sample(1));
        limiter.insert();
        limiter.insert();
        assert!(!limiter.can_sample(1));
        limiter.insert();
        assert!(limiter.can_sample(1));
    }

    #[test]
    fn test_insert_blocks_until_sample_catches_up() {
        let mut limiter = limiter(1.0, 1, -1.0, 1.0);
        assert!(limiter.can_insert(1));
        limiter.insert();
        // One item in, none sampled: a second insert would push the diff to 2.
        assert!(!limiter.can_insert(1));
        limiter.sample();
        assert!(limiter.can_insert(1));
    }

    #[test]
    fn test_deletes_count_against_size() {
        let mut limiter = limiter(1.0, 3, 0.0, 5.0);
        for _ in 0..3 {
            limiter.insert();
        }
        assert!(limiter.can_sample(1));
        limiter.delete();
        assert!(!limiter.can_sample(1));
        // Below min size the insert is admitted regardless of the window.
        assert!(limiter.can_insert(1));
        limiter.insert();
        assert!(limiter.can_sample(1));
    }

    #[test]
    fn test_queue_window() {
        let mut limiter = RateLimiter::new(RateLimiterConfig::queue(10)).unwrap();
        for _ in 0..10 {
            assert!(limiter.can_insert(1));
            limiter.insert();
        }
        assert!(!limiter.can_insert(1));
        limiter.sample();
        limiter.delete();
        assert!(limiter.can_insert(1));
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let mut limiter = limiter(1.0, 1, -1.0, 1.0);
        limiter.insert();
        limiter.sample();
        limiter.delete();
        limiter.reset();
        assert_eq!(limiter.insert_count(), 0);
        assert_eq!(limiter.sample_count(), 0);
        assert_eq!(limiter.delete_count(), 0);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let mut limiter = limiter(2.0, 3, -10.0, 7.0);
        for _ in 0..5 {
            limiter.insert();
        }
        limiter.sample();

        let checkpoint = limiter.checkpoint();
        assert_eq!(checkpoint.insert_count, 5);
        assert_eq!(checkpoint.sample_count, 1);
        assert_eq!(checkpoint.min_size_to_sample, 3);

        let restored = RateLimiter::from_checkpoint(&checkpoint).unwrap();
        assert_eq!(restored.insert_count(), 5);
        assert_eq!(restored.sample_count(), 1);
        assert_eq!(restored.delete_count(), 0);
        assert_eq!(restored.checkpoint(), checkpoint);
    }

    #[test]
    fn test_cancel_is_sticky() {
        let mut limiter = limiter(1.0, 1, -1.0, 1.0);
        assert!(!limiter.is_cancelled());
        limiter.cancel();
        limiter.reset();
        assert!(limiter.is_cancelled());
    }
}
