#![forbid(unsafe_code)]

//! Observable ordered lists.
//!
//! Every mutation is reported as a [`ListEvent`]: an ordered sequence of
//! [`ListOp`]s. Each op's indices are relative to the list state produced by
//! the ops before it, so replaying the ops in order against a copy of the
//! previous contents reproduces the current contents.
//!
//! # Invariants
//!
//! 1. Mutations that change nothing emit no event and do not bump `version`.
//! 2. A whole-list [`reset`](ObservableVec::reset) is a single
//!    [`ListOp::Replaced`] covering the entire old range.
//! 3. A [`ListOp::Permuted`] never changes the multiset of elements.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use super::observable::{Dependency, Listener, Subscription, live_listeners};

/// One structural step of a list mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOp<E> {
    Added {
        at: usize,
        added: Vec<E>,
    },
    Removed {
        at: usize,
        removed: Vec<E>,
    },
    Replaced {
        at: usize,
        removed: Vec<E>,
        added: Vec<E>,
    },
    /// Elements in `from..from + permutation.len()` moved; the element
    /// previously at `from + i` now sits at absolute index `permutation[i]`.
    /// `reordered` is the affected range after the move.
    Permuted {
        from: usize,
        permutation: Vec<usize>,
        reordered: Vec<E>,
    },
}

/// Ordered batch of [`ListOp`]s emitted by one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEvent<E> {
    pub ops: Vec<ListOp<E>>,
}

impl<E: Clone> ListEvent<E> {
    /// Replay the ops against `list`, turning the previous contents into the
    /// current ones.
    pub fn apply_to(&self, list: &mut Vec<E>) {
        for op in &self.ops {
            match op {
                ListOp::Added { at, added } => {
                    list.splice(*at..*at, added.iter().cloned());
                }
                ListOp::Removed { at, removed } => {
                    list.drain(*at..*at + removed.len());
                }
                ListOp::Replaced { at, removed, added } => {
                    list.splice(*at..*at + removed.len(), added.iter().cloned());
                }
                ListOp::Permuted {
                    from, reordered, ..
                } => {
                    list.splice(*from..*from + reordered.len(), reordered.iter().cloned());
                }
            }
        }
    }
}

struct VecInner<E> {
    items: Vec<E>,
    version: u64,
    subscribers: Vec<Listener<ListEvent<E>>>,
}

/// A shared, observable `Vec`.
///
/// Cloning creates another handle to the **same** list.
pub struct ObservableVec<E> {
    inner: Rc<RefCell<VecInner<E>>>,
}

impl<E> Clone for ObservableVec<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for ObservableVec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ObservableVec")
            .field("items", &inner.items)
            .field("version", &inner.version)
            .finish()
    }
}

impl<E: Clone + PartialEq + 'static> Default for ObservableVec<E> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<E: Clone + PartialEq + 'static> ObservableVec<E> {
    pub fn new(items: Vec<E>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(VecInner {
                items,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<E> {
        self.inner.borrow().items.get(index).cloned()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<E> {
        self.inner.borrow().items.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&[E]) -> R) -> R {
        f(&self.inner.borrow().items)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    pub fn subscribe(&self, callback: impl Fn(&ListEvent<E>) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&ListEvent<E>)> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription::new(strong)
    }

    #[must_use]
    pub fn as_dependency(&self) -> Dependency {
        let source = self.clone();
        Dependency::new(
            Rc::as_ptr(&self.inner) as *const () as usize,
            move |callback| source.subscribe(move |_| callback()),
        )
    }

    pub fn push(&self, value: E) {
        let at = self.len();
        self.splice(at..at, vec![value]);
    }

    /// # Panics
    ///
    /// Panics if `at > len`.
    pub fn insert(&self, at: usize, value: E) {
        self.splice(at..at, vec![value]);
    }

    /// # Panics
    ///
    /// Panics if `at >= len`.
    pub fn remove(&self, at: usize) -> E {
        let mut removed = self.splice(at..at + 1, Vec::new());
        removed.remove(0)
    }

    /// Replace the element at `at`, returning the old one. Writing an equal
    /// value emits nothing.
    ///
    /// # Panics
    ///
    /// Panics if `at >= len`.
    pub fn set(&self, at: usize, value: E) -> E {
        let current = self.with(|items| items[at].clone());
        if current == value {
            return current;
        }
        let mut removed = self.splice(at..at + 1, vec![value]);
        removed.remove(0)
    }

    /// Replace `range` with `values`, returning the removed elements.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn splice(&self, range: Range<usize>, values: Vec<E>) -> Vec<E> {
        let at = range.start;
        let removed: Vec<E> = {
            let mut inner = self.inner.borrow_mut();
            inner.items.splice(range, values.iter().cloned()).collect()
        };
        let op = match (removed.is_empty(), values.is_empty()) {
            (true, true) => return removed,
            (true, false) => ListOp::Added { at, added: values },
            (false, true) => ListOp::Removed {
                at,
                removed: removed.clone(),
            },
            (false, false) => ListOp::Replaced {
                at,
                removed: removed.clone(),
                added: values,
            },
        };
        self.emit(vec![op]);
        removed
    }

    pub fn clear(&self) {
        let len = self.len();
        self.splice(0..len, Vec::new());
    }

    /// Swap the whole contents for `items`.
    pub fn reset(&self, items: Vec<E>) {
        let len = self.len();
        self.splice(0..len, items);
    }

    /// Remove every element for which `keep` returns false, as one event.
    ///
    /// `keep` runs against a snapshot, so it may read this list.
    pub fn retain(&self, mut keep: impl FnMut(&E) -> bool) {
        let snapshot = self.to_vec();
        let mut ops = Vec::new();
        let mut kept = Vec::with_capacity(snapshot.len());
        let mut run: Vec<E> = Vec::new();
        for item in snapshot {
            if keep(&item) {
                if !run.is_empty() {
                    ops.push(ListOp::Removed {
                        at: kept.len(),
                        removed: std::mem::take(&mut run),
                    });
                }
                kept.push(item);
            } else {
                run.push(item);
            }
        }
        if !run.is_empty() {
            ops.push(ListOp::Removed {
                at: kept.len(),
                removed: run,
            });
        }
        if !ops.is_empty() {
            self.inner.borrow_mut().items = kept;
            self.emit(ops);
        }
    }

    /// Stable sort. Emits a single [`ListOp::Permuted`] if anything moved.
    ///
    /// `compare` runs against a snapshot, so it may read this list.
    pub fn sort_by(&self, mut compare: impl FnMut(&E, &E) -> Ordering) {
        let snapshot = self.to_vec();
        let mut order: Vec<usize> = (0..snapshot.len()).collect();
        order.sort_by(|&a, &b| compare(&snapshot[a], &snapshot[b]));
        if order.iter().enumerate().all(|(new, &old)| new == old) {
            return;
        }
        let mut permutation = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            permutation[old] = new;
        }
        let reordered: Vec<E> = order.iter().map(|&old| snapshot[old].clone()).collect();
        self.inner.borrow_mut().items.clone_from(&reordered);
        self.emit(vec![ListOp::Permuted {
            from: 0,
            permutation,
            reordered,
        }]);
    }

    /// Swap two elements as a permutation.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn swap(&self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (lo, hi) = (a.min(b), a.max(b));
        let op = {
            let mut inner = self.inner.borrow_mut();
            inner.items.swap(lo, hi);
            let mut permutation: Vec<usize> = (lo..=hi).collect();
            permutation[0] = hi;
            permutation[hi - lo] = lo;
            ListOp::Permuted {
                from: lo,
                permutation,
                reordered: inner.items[lo..=hi].to_vec(),
            }
        };
        self.emit(vec![op]);
    }

    fn emit(&self, ops: Vec<ListOp<E>>) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            inner.version += 1;
            live_listeners(&mut inner.subscribers)
        };
        let event = ListEvent { ops };
        for callback in callbacks {
            callback(&event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
