//! Last-in-first-out sampling.

use crate::core::item::Key;
use crate::distributions::order::InsertionOrder;
use crate::distributions::{
    DistributionError, DistributionOptions, KeyDistribution, KeyWithProbability,
};

/// Always samples the newest live key, with probability 1.
///
/// Same structure as [`FifoDistribution`](crate::distributions::FifoDistribution),
/// sampled from the other end. `keys()` still reports insertion order, which
/// is what checkpoint replay needs.
#[derive(Debug, Default)]
pub struct LifoDistribution {
    order: InsertionOrder,
}

impl LifoDistribution {
    /// Create an empty LIFO distribution.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyDistribution for LifoDistribution {
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
            .back()
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
        DistributionOptions::Lifo
    }
}
