#![forbid(unsafe_code)]

//! Constrained values: read-only views that only advance on commit.
//!
//! Each deferred container pairs a visible observable (what readers see)
//! with a staging area (the latest stored scalar, or the aggregated edits of
//! a collection). The owning helper stages changes as they arrive and calls
//! `apply` when a validation epoch commits as valid. Readers therefore see
//! the constrained value change at most once per commit, and only to a value
//! that passed every constraint.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::aggregate::{ListChangeAggregator, ListDelta, ListEdit, MapChangeAggregator, SetChangeAggregator};
use crate::reactive::{
    Dependency, ListEvent, MapEvent, Observable, ObservableMap, ObservableSet, ObservableVec, SetEvent,
    Subscription,
};

/// Deferred scalar.
pub struct DeferredValue<T> {
    visible: Observable<T>,
    staged: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        Self {
            visible: self.visible.clone(),
            staged: Rc::clone(&self.staged),
        }
    }
}

impl<T: Clone + PartialEq + 'static> DeferredValue<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            visible: Observable::new(initial),
            staged: Rc::new(RefCell::new(None)),
        }
    }

    pub(crate) fn store(&self, value: T) {
        *self.staged.borrow_mut() = Some(value);
    }

    /// Publish the staged value. Returns true if readers saw a change.
    pub(crate) fn apply(&self) -> bool {
        let staged = self.staged.borrow_mut().take();
        match staged {
            Some(value) => {
                let before = self.visible.version();
                self.visible.set(value);
                self.visible.version() != before
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.visible.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.visible.with(f)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.visible.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.visible.subscribe(callback)
    }

    #[must_use]
    pub fn as_dependency(&self) -> Dependency {
        self.visible.as_dependency()
    }
}

/// Deferred list.
pub struct DeferredVec<E> {
    visible: ObservableVec<E>,
    staged: Rc<RefCell<ListChangeAggregator<E>>>,
}

impl<E> Clone for DeferredVec<E> {
    fn clone(&self) -> Self {
        Self {
            visible: self.visible.clone(),
            staged: Rc::clone(&self.staged),
        }
    }
}

impl<E: Clone + PartialEq + 'static> DeferredVec<E> {
    pub(crate) fn new(initial: Vec<E>) -> Self {
        Self {
            visible: ObservableVec::new(initial),
            staged: Rc::new(RefCell::new(ListChangeAggregator::new())),
        }
    }

    pub(crate) fn record(&self, edit: ListEdit<E>) {
        let mut staged = self.staged.borrow_mut();
        self.visible.with(|original| staged.add(edit, original));
    }

    pub(crate) fn apply(&self) -> bool {
        let delta = self
            .visible
            .with(|original| self.staged.borrow_mut().complete(original));
        if delta.is_empty() {
            return false;
        }
        self.visible.splice(delta.at..delta.at + delta.removed, delta.added);
        true
    }

    /// Net splice waiting for the next commit.
    #[must_use]
    pub fn staged(&self) -> ListDelta<E> {
        self.visible.with(|original| self.staged.borrow().peek(original))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<E> {
        self.visible.get(index)
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<E> {
        self.visible.to_vec()
    }

    pub fn with<R>(&self, f: impl FnOnce(&[E]) -> R) -> R {
        self.visible.with(f)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.visible.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&ListEvent<E>) + 'static) -> Subscription {
        self.visible.subscribe(callback)
    }

    #[must_use]
    pub fn as_dependency(&self) -> Dependency {
        self.visible.as_dependency()
    }
}

/// Deferred set.
pub struct DeferredSet<E: Eq + Hash> {
    visible: ObservableSet<E>,
    staged: Rc<RefCell<SetChangeAggregator<E>>>,
}

impl<E: Eq + Hash> Clone for DeferredSet<E> {
    fn clone(&self) -> Self {
        Self {
            visible: self.visible.clone(),
            staged: Rc::clone(&self.staged),
        }
    }
}

impl<E: Clone + Eq + Hash + 'static> DeferredSet<E> {
    pub(crate) fn new(initial: AHashSet<E>) -> Self {
        Self {
            visible: ObservableSet::new(initial),
            staged: Rc::new(RefCell::new(SetChangeAggregator::new())),
        }
    }

    pub(crate) fn record_added(&self, item: E) {
        self.staged.borrow_mut().record_added(item);
    }

    pub(crate) fn record_removed(&self, item: E) {
        self.staged.borrow_mut().record_removed(item);
    }

    pub(crate) fn apply(&self) -> bool {
        let delta = self.staged.borrow_mut().complete();
        if delta.is_empty() {
            return false;
        }
        self.visible
            .exchange(delta.removed.into_iter().collect(), delta.added.into_iter().collect())
            > 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    #[must_use]
    pub fn contains(&self, item: &E) -> bool {
        self.visible.contains(item)
    }

    #[must_use]
    pub fn snapshot(&self) -> AHashSet<E> {
        self.visible.snapshot()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.visible.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&SetEvent<E>) + 'static) -> Subscription {
        self.visible.subscribe(callback)
    }
}

/// Deferred map.
pub struct DeferredMap<K: Eq + Hash, V> {
    visible: ObservableMap<K, V>,
    staged: Rc<RefCell<MapChangeAggregator<K, V>>>,
}

impl<K: Eq + Hash, V> Clone for DeferredMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            visible: self.visible.clone(),
            staged: Rc::clone(&self.staged),
        }
    }
}

impl<K, V> DeferredMap<K, V>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
{
    pub(crate) fn new(initial: AHashMap<K, V>) -> Self {
        Self {
            visible: ObservableMap::new(initial),
            staged: Rc::new(RefCell::new(MapChangeAggregator::new())),
        }
    }

    pub(crate) fn record_removed(&self, key: K) {
        let mut staged = self.staged.borrow_mut();
        self.visible.with(|original| staged.record_removed(key, original));
    }

    pub(crate) fn record_inserted(&self, key: K, value: V) {
        let mut staged = self.staged.borrow_mut();
        self.visible
            .with(|original| staged.record_inserted(key, value, original));
    }

    pub(crate) fn apply(&self) -> bool {
        let delta = self.staged.borrow_mut().complete();
        if delta.is_empty() {
            return false;
        }
        self.visible
            .exchange(delta.removed.into_iter().collect(), delta.added.into_iter().collect())
            > 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.visible.get(key)
    }

    #[must_use]
    pub fn snapshot(&self) -> AHashMap<K, V> {
        self.visible.snapshot()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.visible.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&MapEvent<K, V>) + 'static) -> Subscription {
        self.visible.subscribe(callback)
    }
}
