//! Priority-proportional sampling via a sum tree.

use std::collections::HashMap;

use rand::Rng;

use crate::core::item::Key;
use crate::distributions::{
    DistributionError, DistributionOptions, KeyDistribution, KeyWithProbability,
};
use crate::error::TableError;

#[derive(Debug, Clone, Copy)]
struct Node {
    key: Key,
    /// Exponentiated priority of this node plus all its descendants.
    sum: f64,
}

/// Floor added to priorities before inverting the mass, so a zero priority
/// keeps a finite (and dominant) weight.
const INVERTED_MASS_FLOOR: f64 = 1e-6;

/// Samples keys with probability proportional to `priority^priority_exponent`.
///
/// The mass is kept in an implicit binary tree stored as a flat vector:
/// each node carries its own exponentiated priority plus the sum of its
/// subtree, so insert, update, delete and sample are all O(log n). Deletion
/// swaps the last node into the vacated slot.
///
/// Built via [`new_inverted`](Self::new_inverted) the mass is
/// `(priority + ε)^-priority_exponent` instead, so *low*-priority keys
/// dominate the draw. Tables use this form for the remover, which must
/// evict low-priority items first.
///
/// Priorities and sums are `f64`, so incremental updates accumulate rounding
/// error when the relative spread of priorities is large. Keep priorities on
/// a similar scale and the exponent small (typically below 2).
#[derive(Debug)]
pub struct PrioritizedDistribution {
    /// Exponent applied to priorities before they enter the tree. Zero makes
    /// all keys with positive priority equally likely.
    priority_exponent: f64,
    /// Whether the mass is inverted (low priorities weigh most).
    invert_mass: bool,
    nodes: Vec<Node>,
    key_to_index: HashMap<Key, usize>,
}

impl PrioritizedDistribution {
    /// Create an empty prioritized distribution.
    ///
    /// Fails if `priority_exponent` is negative or not finite.
    pub fn new(priority_exponent: f64) -> Result<Self, TableError> {
        Self::with_mass(priority_exponent, false)
    }

    /// Create an empty prioritized distribution with an inverted mass:
    /// weights are `(priority + ε)^-priority_exponent`, so the lowest
    /// priorities are the most likely to be drawn. This is the remover form.
    pub fn new_inverted(priority_exponent: f64) -> Result<Self, TableError> {
        Self::with_mass(priority_exponent, true)
    }

    fn with_mass(priority_exponent: f64, invert_mass: bool) -> Result<Self, TableError> {
        if !priority_exponent.is_finite() || priority_exponent < 0.0 {
            return Err(TableError::InvalidArgument(format!(
                "priority_exponent {} must be finite and non-negative",
                priority_exponent
            )));
        }
        Ok(Self {
            priority_exponent,
            invert_mass,
            nodes: Vec::new(),
            key_to_index: HashMap::new(),
        })
    }

    /// The configured priority exponent.
    pub fn priority_exponent(&self) -> f64 {
        self.priority_exponent
    }

    /// Whether the mass is inverted (the remover form).
    pub fn is_inverted(&self) -> bool {
        self.invert_mass
    }

    fn weight(&self, priority: f64) -> f64 {
        if self.invert_mass {
            (priority + INVERTED_MASS_FLOOR).powf(-self.priority_exponent)
        } else {
            priority.powf(self.priority_exponent)
        }
    }

    fn check_priority(priority: f64) -> Result<(), DistributionError> {
        if !priority.is_finite() || priority < 0.0 {
            return Err(DistributionError::InvalidPriority(priority));
        }
        Ok(())
    }

    /// Subtree sum of node `index`, or 0 if the index is out of bounds.
    fn node_sum(&self, index: usize) -> f64 {
        self.nodes.get(index).map_or(0.0, |node| node.sum)
    }

    /// Own exponentiated priority of node `index`, without its descendants.
    fn node_value(&self, index: usize) -> f64 {
        self.nodes[index].sum - self.node_sum(2 * index + 1) - self.node_sum(2 * index + 2)
    }

    /// Set the own value of node `index`, propagating the difference to the
    /// root.
    fn set_node(&mut self, index: usize, value: f64) {
        let diff = value - self.node_value(index);
        let mut cursor = index;
        loop {
            self.nodes[cursor].sum += diff;
            if cursor == 0 {
                break;
            }
            cursor = (cursor - 1) / 2;
        }
    }
}

impl KeyDistribution for PrioritizedDistribution {
    fn insert(&mut self, key: Key, priority: f64) -> Result<(), DistributionError> {
        Self::check_priority(priority)?;
        if self.key_to_index.contains_key(&key) {
            return Err(DistributionError::AlreadyExists(key));
        }
        let index = self.nodes.len();
        self.nodes.push(Node { key, sum: 0.0 });
        let weight = self.weight(priority);
        self.set_node(index, weight);
        self.key_to_index.insert(key, index);
        Ok(())
    }

    fn update(&mut self, key: Key, priority: f64) -> Result<(), DistributionError> {
        Self::check_priority(priority)?;
        let Some(&index) = self.key_to_index.get(&key) else {
            return Err(DistributionError::NotFound(key));
        };
        let weight = self.weight(priority);
        self.set_node(index, weight);
        Ok(())
    }

    fn delete(&mut self, key: Key) -> Result<(), DistributionError> {
        let Some(index) = self.key_to_index.remove(&key) else {
            return Err(DistributionError::NotFound(key));
        };
        let last = self.nodes.len() - 1;
        if index != last {
            let moved_key = self.nodes[last].key;
            let moved_value = self.node_value(last);
            self.set_node(last, 0.0);
            self.set_node(index, moved_value);
            self.nodes[index].key = moved_key;
            self.key_to_index.insert(moved_key, index);
        } else {
            self.set_node(index, 0.0);
        }
        self.nodes.pop();
        Ok(())
    }

    fn sample(&self) -> KeyWithProbability {
        assert!(!self.nodes.is_empty(), "sample called on empty distribution");
        let total = self.nodes[0].sum;
        assert!(
            total > 0.0,
            "cannot sample: all priorities have zero weight"
        );
        let mut target = rand::thread_rng().gen_range(0.0..total);
        let mut index = 0;
        loop {
            let left = 2 * index + 1;
            let left_sum = self.node_sum(left);
            if target < left_sum {
                index = left;
                continue;
            }
            target -= left_sum;
            let own = self.node_value(index);
            let right = 2 * index + 2;
            // Rounding error can push the target past every subtree; land on
            // the current node rather than walking out of bounds.
            if target < own || right >= self.nodes.len() {
                break;
            }
            target -= own;
            index = right;
        }
        KeyWithProbability {
            key: self.nodes[index].key,
            probability: self.node_value(index) / total,
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.key_to_index.clear();
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn keys(&self) -> Vec<Key> {
        self.nodes.iter().map(|node| node.key).collect()
    }

    fn options(&self) -> DistributionOptions {
        DistributionOptions::Prioritized {
            priority_exponent: self.priority_exponent,
        }
    }
}
