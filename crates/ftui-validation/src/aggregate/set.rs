#![forbid(unsafe_code)]

//! Net membership change of a set across many edits.

use std::hash::Hash;

use ahash::AHashSet;

/// Elements to remove from and add to the original set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDelta<E: Eq + Hash> {
    pub removed: AHashSet<E>,
    pub added: AHashSet<E>,
}

impl<E: Eq + Hash> Default for SetDelta<E> {
    fn default() -> Self {
        Self {
            removed: AHashSet::new(),
            added: AHashSet::new(),
        }
    }
}

impl<E: Clone + Eq + Hash> SetDelta<E> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    pub fn apply_to(&self, set: &mut AHashSet<E>) {
        for item in &self.removed {
            set.remove(item);
        }
        set.extend(self.added.iter().cloned());
    }
}

/// Accumulates additions and removals; an element added and removed within
/// the same epoch (or the reverse) cancels out.
#[derive(Debug, Clone)]
pub struct SetChangeAggregator<E: Eq + Hash> {
    delta: SetDelta<E>,
}

impl<E: Eq + Hash> Default for SetChangeAggregator<E> {
    fn default() -> Self {
        Self {
            delta: SetDelta::default(),
        }
    }
}

impl<E: Clone + Eq + Hash> SetChangeAggregator<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    pub fn record_added(&mut self, item: E) {
        if !self.delta.removed.remove(&item) {
            self.delta.added.insert(item);
        }
    }

    pub fn record_removed(&mut self, item: E) {
        if !self.delta.added.remove(&item) {
            self.delta.removed.insert(item);
        }
    }

    #[must_use]
    pub fn peek(&self) -> SetDelta<E> {
        self.delta.clone()
    }

    pub fn complete(&mut self) -> SetDelta<E> {
        std::mem::take(&mut self.delta)
    }
}
