#![forbid(unsafe_code)]

//! Observable, index-ordered list of validation diagnostics.
//!
//! Each diagnostic belongs to one constraint slot, identified by the slot's
//! index. The list holds at most one diagnostic per index and keeps entries
//! sorted by index. Two derived views partition the entries by validity:
//! [`DiagnosticView::Valid`] (warnings from passing constraints) and
//! [`DiagnosticView::Invalid`] (errors).
//!
//! # Invariants
//!
//! 1. Every view is sorted by index with no duplicate indices.
//! 2. `Valid` and `Invalid` are disjoint and their union is `All`.
//! 3. Changes are delivered per view as one batch per mutation, or one batch
//!    per bracket while a batch is open.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Result, UsageError};
use crate::reactive::Subscription;
use crate::reactive::observable::live_listeners;

/// A diagnostic payload tagged with its slot index and validity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic<D> {
    pub value: D,
    pub index: usize,
    pub valid: bool,
}

/// Which partition of the list to read or observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticView {
    All,
    Valid,
    Invalid,
}

impl DiagnosticView {
    const ALL: [DiagnosticView; 3] = [Self::All, Self::Valid, Self::Invalid];

    fn slot(self) -> usize {
        match self {
            Self::All => 0,
            Self::Valid => 1,
            Self::Invalid => 2,
        }
    }
}

/// One positional change within a view. `position` is relative to the view
/// at the time of the change; `index` is the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticChange {
    Added { position: usize, index: usize },
    Replaced { position: usize, index: usize },
    Removed { position: usize, index: usize },
}

type ChangeListener = std::rc::Weak<dyn Fn(&[DiagnosticChange])>;

struct DiagnosticInner<D> {
    views: [Vec<Diagnostic<D>>; 3],
    pending: [Vec<DiagnosticChange>; 3],
    subscribers: [Vec<ChangeListener>; 3],
    batching: bool,
    version: u64,
}

impl<D: Clone> DiagnosticInner<D> {
    fn upsert(&mut self, view: DiagnosticView, entry: Diagnostic<D>) {
        let slot = view.slot();
        let index = entry.index;
        let list = &mut self.views[slot];
        let change = match list.binary_search_by_key(&index, |d| d.index) {
            Ok(position) => {
                list[position] = entry;
                DiagnosticChange::Replaced { position, index }
            }
            Err(position) => {
                list.insert(position, entry);
                DiagnosticChange::Added { position, index }
            }
        };
        self.pending[slot].push(change);
    }

    fn remove(&mut self, view: DiagnosticView, index: usize) -> bool {
        let slot = view.slot();
        let list = &mut self.views[slot];
        match list.binary_search_by_key(&index, |d| d.index) {
            Ok(position) => {
                list.remove(position);
                self.pending[slot].push(DiagnosticChange::Removed { position, index });
                true
            }
            Err(_) => false,
        }
    }
}

/// Shared, observable diagnostic list. Cloning shares the list.
pub struct DiagnosticList<D> {
    inner: Rc<RefCell<DiagnosticInner<D>>>,
}

impl<D> Clone for DiagnosticList<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<D: fmt::Debug> fmt::Debug for DiagnosticList<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("DiagnosticList")
            .field("entries", &inner.views[0])
            .field("batching", &inner.batching)
            .finish()
    }
}

impl<D: Clone + 'static> Default for DiagnosticList<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone + 'static> DiagnosticList<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DiagnosticInner {
                views: [Vec::new(), Vec::new(), Vec::new()],
                pending: [Vec::new(), Vec::new(), Vec::new()],
                subscribers: [Vec::new(), Vec::new(), Vec::new()],
                batching: false,
                version: 0,
            })),
        }
    }

    #[must_use]
    pub fn len(&self, view: DiagnosticView) -> usize {
        self.inner.borrow().views[view.slot()].len()
    }

    #[must_use]
    pub fn is_empty(&self, view: DiagnosticView) -> bool {
        self.len(view) == 0
    }

    #[must_use]
    pub fn get(&self, view: DiagnosticView, position: usize) -> Option<Diagnostic<D>> {
        self.inner.borrow().views[view.slot()].get(position).cloned()
    }

    /// Entries of `view`, in index order.
    #[must_use]
    pub fn entries(&self, view: DiagnosticView) -> Vec<Diagnostic<D>> {
        self.inner.borrow().views[view.slot()].clone()
    }

    /// Payloads of `view`, in index order.
    #[must_use]
    pub fn values(&self, view: DiagnosticView) -> Vec<D> {
        self.inner.borrow().views[view.slot()]
            .iter()
            .map(|d| d.value.clone())
            .collect()
    }

    /// Diagnostic currently held for slot `index`.
    #[must_use]
    pub fn for_index(&self, index: usize) -> Option<Diagnostic<D>> {
        let inner = self.inner.borrow();
        let all = &inner.views[0];
        all.binary_search_by_key(&index, |d| d.index)
            .ok()
            .map(|position| all[position].clone())
    }

    /// Bumped once per delivered batch that changed anything.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    pub fn subscribe(
        &self,
        view: DiagnosticView,
        callback: impl Fn(&[DiagnosticChange]) + 'static,
    ) -> Subscription {
        let strong: Rc<dyn Fn(&[DiagnosticChange])> = Rc::new(callback);
        self.inner.borrow_mut().subscribers[view.slot()].push(Rc::downgrade(&strong));
        Subscription::new(strong)
    }

    /// Set the diagnostic for slot `index`, moving it between the valid and
    /// invalid views as needed.
    pub(crate) fn set(&self, index: usize, value: D, valid: bool) {
        {
            let mut inner = self.inner.borrow_mut();
            let entry = Diagnostic { value, index, valid };
            let (into, out_of) = if valid {
                (DiagnosticView::Valid, DiagnosticView::Invalid)
            } else {
                (DiagnosticView::Invalid, DiagnosticView::Valid)
            };
            inner.upsert(DiagnosticView::All, entry.clone());
            inner.upsert(into, entry);
            inner.remove(out_of, index);
        }
        self.flush_unless_batching();
    }

    /// Remove the diagnostic for slot `index`, if any.
    pub(crate) fn clear(&self, index: usize) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.remove(DiagnosticView::All, index) {
                let valid = inner.remove(DiagnosticView::Valid, index);
                if !valid {
                    inner.remove(DiagnosticView::Invalid, index);
                }
            }
        }
        self.flush_unless_batching();
    }

    pub(crate) fn begin_batch(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.batching {
            return Err(UsageError::NestedQuiescence);
        }
        inner.batching = true;
        Ok(())
    }

    pub(crate) fn end_batch(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.batching {
                return Err(UsageError::QuiescenceNotActive);
            }
            inner.batching = false;
        }
        self.flush();
        Ok(())
    }

    fn flush_unless_batching(&self) {
        if !self.inner.borrow().batching {
            self.flush();
        }
    }

    fn flush(&self) {
        let deliveries: Vec<(Vec<DiagnosticChange>, Vec<Rc<dyn Fn(&[DiagnosticChange])>>)> = {
            let mut inner = self.inner.borrow_mut();
            let inner = &mut *inner;
            if inner.pending.iter().all(Vec::is_empty) {
                return;
            }
            inner.version += 1;
            DiagnosticView::ALL
                .iter()
                .map(|view| {
                    let slot = view.slot();
                    let changes = std::mem::take(&mut inner.pending[slot]);
                    let callbacks = live_listeners(&mut inner.subscribers[slot]);
                    (changes, callbacks)
                })
                .collect()
        };
        for (changes, callbacks) in deliveries {
            if changes.is_empty() {
                continue;
            }
            for callback in callbacks {
                callback(&changes);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
