//! Key distributions: sampling strategies over the live key set of a table.
//!
//! A distribution maintains a probability mass over the keys currently in a
//! table and answers `sample` with a key drawn from that mass. Tables use
//! one distribution as the *sampler* (which key a consumer receives) and one
//! as the *remover* (which key is evicted on overflow). The variants differ
//! in how the mass is shaped:
//!
//! - [`UniformDistribution`]: every key equally likely, O(1)
//! - [`FifoDistribution`]: the oldest key, probability 1, O(1)
//! - [`LifoDistribution`]: the newest key, probability 1, O(1)
//! - [`PrioritizedDistribution`]: mass proportional to `priority^alpha`,
//!   O(log n) via a sum tree

mod order;

pub mod fifo;
pub mod lifo;
pub mod prioritized;
pub mod uniform;

pub use fifo::FifoDistribution;
pub use lifo::LifoDistribution;
pub use prioritized::PrioritizedDistribution;
pub use uniform::UniformDistribution;

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::item::Key;
use crate::error::TableError;

/// A sampled key together with the probability it was drawn under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyWithProbability {
    /// The sampled key.
    pub key: Key,
    /// Probability of drawing `key` under the distribution's current mass.
    pub probability: f64,
}

/// Error surfaced by distribution mutations.
///
/// Callers that treat absence as idempotent (batched mutations) drop the
/// `NotFound` variant; the table converts the rest into
/// [`TableError::InvalidArgument`](crate::error::TableError).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistributionError {
    /// `insert` was called with a key that is already present.
    AlreadyExists(Key),
    /// `update` or `delete` was called with an unknown key.
    NotFound(Key),
    /// The priority is negative or not finite.
    InvalidPriority(f64),
}

impl fmt::Display for DistributionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionError::AlreadyExists(key) => {
                write!(f, "key {} already exists", key)
            }
            DistributionError::NotFound(key) => write!(f, "key {} not found", key),
            DistributionError::InvalidPriority(priority) => {
                write!(f, "priority {} must be finite and non-negative", priority)
            }
        }
    }
}

impl Error for DistributionError {}

/// A probability mass over a dynamic key set.
///
/// `sample` must only be called on a non-empty distribution; the table's
/// rate limiter guarantees this for the sampler and the overflow check for
/// the remover. Variants that ignore priorities still validate key
/// existence on `update`.
pub trait KeyDistribution: Send {
    /// Add a new key. Fails if the key is already present.
    fn insert(&mut self, key: Key, priority: f64) -> Result<(), DistributionError>;

    /// Change the priority of an existing key.
    fn update(&mut self, key: Key, priority: f64) -> Result<(), DistributionError>;

    /// Remove a key.
    fn delete(&mut self, key: Key) -> Result<(), DistributionError>;

    /// Draw a key from the current mass.
    ///
    /// # Panics
    ///
    /// Panics if the distribution is empty.
    fn sample(&self) -> KeyWithProbability;

    /// Remove all keys.
    fn clear(&mut self);

    /// Number of keys currently held.
    fn len(&self) -> usize;

    /// Check whether no key is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the keys in the distribution's canonical iteration order.
    ///
    /// For FIFO and LIFO this is insertion order; for the others it is the
    /// backing-array order. Checkpoints store items in the *remover's* order
    /// so that replaying them on restore rebuilds the same eviction queue.
    fn keys(&self) -> Vec<Key>;

    /// Variant tag recorded in checkpoints.
    fn options(&self) -> DistributionOptions;
}

/// Variant descriptor of a distribution, as stored in checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DistributionOptions {
    /// All live keys equally likely.
    Uniform,
    /// Oldest key first.
    Fifo,
    /// Newest key first.
    Lifo,
    /// Mass proportional to `priority^priority_exponent`.
    Prioritized {
        /// Exponent applied to priorities before they enter the mass.
        priority_exponent: f64,
    },
}

impl DistributionOptions {
    /// Construct the distribution this descriptor tags, in its sampler form.
    pub fn build(self) -> Result<Box<dyn KeyDistribution>, TableError> {
        match self {
            DistributionOptions::Uniform => Ok(Box::new(UniformDistribution::new())),
            DistributionOptions::Fifo => Ok(Box::new(FifoDistribution::new())),
            DistributionOptions::Lifo => Ok(Box::new(LifoDistribution::new())),
            DistributionOptions::Prioritized { priority_exponent } => Ok(Box::new(
                PrioritizedDistribution::new(priority_exponent)?,
            )),
        }
    }

    /// Construct the distribution this descriptor tags, in its remover form.
    ///
    /// A remover picks eviction victims, so the prioritized variant inverts
    /// its mass: low-priority keys are evicted first. The other variants
    /// behave the same in either role.
    pub fn build_remover(self) -> Result<Box<dyn KeyDistribution>, TableError> {
        match self {
            DistributionOptions::Prioritized { priority_exponent } => Ok(Box::new(
                PrioritizedDistribution::new_inverted(priority_exponent)?,
            )),
            other => other.build(),
        }
    }
}
