//! Inbound message deduplication.
//!
//! The server delivers at least once, so a reconnect may replay frames the
//! client already applied. Ids are remembered until the set reaches its
//! high-water mark, then only the most recent half is kept.

use std::collections::{HashSet, VecDeque};

use crate::config::{DEFAULT_DEDUP_HIGH_WATER, DEFAULT_DEDUP_RETAIN};

#[derive(Debug)]
pub struct ProcessedMessages {
    order: VecDeque<String>,
    seen: HashSet<String>,
    high_water: usize,
    retain: usize,
}

impl Default for ProcessedMessages {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_HIGH_WATER, DEFAULT_DEDUP_RETAIN)
    }
}

impl ProcessedMessages {
    pub fn new(high_water: usize, retain: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            high_water: high_water.max(1),
            retain: retain.min(high_water),
        }
    }

    /// Record `id`. Returns `false` if it was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }

        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());

        if self.order.len() > self.high_water {
            let excess = self.order.len() - self.retain;
            for old in self.order.drain(..excess) {
                self.seen.remove(&old);
            }
        }

        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
