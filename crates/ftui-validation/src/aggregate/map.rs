#![forbid(unsafe_code)]

//! Net change of a map across many edits.
//!
//! Removals are tracked by key and upserts by key and value. An upsert that
//! restores a key's original value, or a removal of a key that was only
//! added this epoch, cancels out.

use std::hash::Hash;

use ahash::{AHashMap, AHashSet};

/// Keys to remove from, and entries to upsert into, the original map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDelta<K: Eq + Hash, V> {
    pub removed: AHashSet<K>,
    pub added: AHashMap<K, V>,
}

impl<K: Eq + Hash, V> Default for MapDelta<K, V> {
    fn default() -> Self {
        Self {
            removed: AHashSet::new(),
            added: AHashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash, V: Clone> MapDelta<K, V> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    pub fn apply_to(&self, map: &mut AHashMap<K, V>) {
        for key in &self.removed {
            map.remove(key);
        }
        map.extend(self.added.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Accumulates key removals and upserts relative to an unchanging original
/// map.
#[derive(Debug, Clone)]
pub struct MapChangeAggregator<K: Eq + Hash, V> {
    delta: MapDelta<K, V>,
}

impl<K: Eq + Hash, V> Default for MapChangeAggregator<K, V> {
    fn default() -> Self {
        Self {
            delta: MapDelta::default(),
        }
    }
}

impl<K: Clone + Eq + Hash, V: Clone + PartialEq> MapChangeAggregator<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    pub fn record_removed(&mut self, key: K, original: &AHashMap<K, V>) {
        self.delta.added.remove(&key);
        if original.contains_key(&key) {
            self.delta.removed.insert(key);
        }
    }

    pub fn record_inserted(&mut self, key: K, value: V, original: &AHashMap<K, V>) {
        self.delta.removed.remove(&key);
        if original.get(&key) == Some(&value) {
            self.delta.added.remove(&key);
        } else {
            self.delta.added.insert(key, value);
        }
    }

    #[must_use]
    pub fn peek(&self) -> MapDelta<K, V> {
        self.delta.clone()
    }

    pub fn complete(&mut self) -> MapDelta<K, V> {
        std::mem::take(&mut self.delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> AHashMap<&'static str, i32> {
        [("a", 1), ("b", 2)].into_iter().collect()
    }

    #[test]
    fn replacement_keeps_new_value() {
        let base = original();
        let mut agg = MapChangeAggregator::new();
        agg.record_removed("a", &base);
        agg.record_inserted("a", 10, &base);
        let mut applied = base.clone();
        agg.complete().apply_to(&mut applied);
        assert_eq!(applied.get("a"), Some(&10));
        assert_eq!(applied.len(), 2);
    }

    #[test]
    fn restoring_original_value_cancels() {
        let base = original();
        let mut agg = MapChangeAggregator::new();
        agg.record_inserted("a", 5, &base);
        agg.record_inserted("a", 1, &base);
        agg.record_inserted("c", 3, &base);
        agg.record_removed("c", &base);
        assert!(agg.is_empty());
    }

    #[test]
    fn removal_then_reinsert_of_original_cancels() {
        let base = original();
        let mut agg = MapChangeAggregator::new();
        agg.record_removed("b", &base);
        agg.record_inserted("b", 2, &base);
        assert!(agg.peek().is_empty());
    }
}
