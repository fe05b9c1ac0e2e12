//! Uniform sampling over the live key set.

use std::collections::HashMap;

use rand::Rng;

use crate::core::item::Key;
use crate::distributions::{
    DistributionError, DistributionOptions, KeyDistribution, KeyWithProbability,
};

/// Samples every live key with probability `1/n`.
///
/// Keys live in a dense array with a hash map from key to array index, so
/// insert appends, delete swap-removes, and sample picks a uniform index.
/// All operations are O(1). Priorities are ignored.
#[derive(Debug, Default)]
pub struct UniformDistribution {
    keys: Vec<Key>,
    key_to_index: HashMap<Key, usize>,
}

impl UniformDistribution {
    /// Create an empty uniform distribution.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyDistribution for UniformDistribution {
    fn insert(&mut self, key: Key, _priority: f64) -> Result<(), DistributionError> {
        if self.key_to_index.contains_key(&key) {
            return Err(DistributionError::AlreadyExists(key));
        }
        self.key_to_index.insert(key, self.keys.len());
        self.keys.push(key);
        Ok(())
    }

    fn update(&mut self, key: Key, _priority: f64) -> Result<(), DistributionError> {
        if !self.key_to_index.contains_key(&key) {
            return Err(DistributionError::NotFound(key));
        }
        Ok(())
    }

    fn delete(&mut self, key: Key) -> Result<(), DistributionError> {
        let Some(index) = self.key_to_index.remove(&key) else {
            return Err(DistributionError::NotFound(key));
        };
        self.keys.swap_remove(index);
        if index < self.keys.len() {
            self.key_to_index.insert(self.keys[index], index);
        }
        Ok(())
    }

    fn sample(&self) -> KeyWithProbability {
        assert!(!self.keys.is_empty(), "sample called on empty distribution");
        let index = rand::thread_rng().gen_range(0..self.keys.len());
        KeyWithProbability {
            key: self.keys[index],
            probability: 1.0 / self.keys.len() as f64,
        }
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.key_to_index.clear();
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn keys(&self) -> Vec<Key> {
        self.keys.clone()
    }

    fn options(&self) -> DistributionOptions {
        DistributionOptions::Uniform
    }
}
