//! Hashing utilities for versions
//!
//! - BLAKE3 for ring point placement
//! - Consistent hash ring for spreading asset paths over alias hosts

use std::collections::{BTreeMap, HashMap};

/// Virtual points placed on the ring per unit of weight
const POINTS_PER_WEIGHT: u32 = 160;

/// Hash arbitrary input to a ring position
fn ring_position(input: &str) -> u64 {
    let hash = blake3::hash(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

/// Consistent hash ring
///
/// Maps keys (asset paths) to nodes (alias hosts). Adding a node only moves
/// the keys that land on its new points; every other assignment is kept.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: BTreeMap<u64, String>,
    weights: HashMap<String, u32>,
}

impl HashRing {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::default();
        for node in nodes {
            ring.add(node);
        }
        ring
    }

    /// Add a node with weight 1. Existing nodes are left untouched.
    pub fn add(&mut self, node: impl Into<String>) -> bool {
        self.add_weighted(node, 1)
    }

    /// Add a node whose share of the ring scales with `weight`
    pub fn add_weighted(&mut self, node: impl Into<String>, weight: u32) -> bool {
        let node = node.into();
        if node.is_empty() || weight == 0 || self.weights.contains_key(&node) {
            return false;
        }

        for point in 0..POINTS_PER_WEIGHT * weight {
            let position = ring_position(&format!("{}#{}", node, point));
            self.points.entry(position).or_insert_with(|| node.clone());
        }
        self.weights.insert(node, weight);
        true
    }

    /// Remove a node and its points
    pub fn remove(&mut self, node: &str) -> bool {
        if self.weights.remove(node).is_none() {
            return false;
        }
        self.points.retain(|_, owner| owner != node);
        true
    }

    /// Node responsible for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        let position = ring_position(key);
        self.points
            .range(position..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node.as_str())
    }

    pub fn contains(&self, node: &str) -> bool {
        self.weights.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
