//! First-in-first-out sampling.

use crate::core::item::Key;
use crate::distributions::order::InsertionOrder;
use crate::distributions::{
    DistributionError, DistributionOptions, KeyDistribution, KeyWithProbability,
};

/// Always samples the oldest live key, with probability 1.
///
/// Priorities are ignored; `update` only verifies the key exists. All
/// operations are O(1).
#[derive(Debug, Default)]
pub struct FifoDistribution {
    order: InsertionOrder,
}

impl FifoDistribution {
    /// Create an empty FIFO distribution.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyDistribution for FifoDistribution {
    fn insert(&mut self, key: Key, _priority: f64) -> Result<(), DistributionError> {
        if !self.order.push_back(key) {
            return Err(DistributionError::AlreadyExists(key));
        }
        Ok(())
    }

    fn update(&mut self, key: Key, _priority: f64) -> Result<(), DistributionError> {
        if !self.order.contains(key) {
            return Err(DistributionError::NotFound(key));
        }
        Ok(())
    }

    fn delete(&mut self, key: Key) -> Result<(), DistributionError> {
        if !self.order.remove(key) {
            return Err(DistributionError::NotFound(key));
        }
        Ok(())
    }

    fn sample(&self) -> KeyWithProbability {
        let key = self
            .order
            .front()
            .expect("sample called on empty distribution");
        KeyWithProbability {
            key,
            probability: 1.0,
        }
    }

    fn clear(&mut self) {
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn keys(&self) -> Vec<Key> {
        self.order.keys()
    }

    fn options(&self) -> DistributionOptions {
        DistributionOptions::Fifo
    }
}
