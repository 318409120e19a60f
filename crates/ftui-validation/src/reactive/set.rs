#![forbid(unsafe_code)]

//! Observable hash sets.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashSet;

use super::observable::{Dependency, Listener, Subscription, live_listeners};

/// Net membership change produced by one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEvent<E> {
    pub removed: Vec<E>,
    pub added: Vec<E>,
}

struct SetInner<E> {
    items: AHashSet<E>,
    version: u64,
    subscribers: Vec<Listener<SetEvent<E>>>,
}

/// A shared, observable `AHashSet`.
pub struct ObservableSet<E> {
    inner: Rc<RefCell<SetInner<E>>>,
}

impl<E> Clone for ObservableSet<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for ObservableSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ObservableSet")
            .field("items", &inner.items)
            .field("version", &inner.version)
            .finish()
    }
}

impl<E: Clone + Eq + Hash + 'static> Default for ObservableSet<E> {
    fn default() -> Self {
        Self::new(AHashSet::new())
    }
}

impl<E: Clone + Eq + Hash + 'static> ObservableSet<E> {
    pub fn new(items: AHashSet<E>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SetInner {
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
    pub fn contains(&self, value: &E) -> bool {
        self.inner.borrow().items.contains(value)
    }

    #[must_use]
    pub fn snapshot(&self) -> AHashSet<E> {
        self.inner.borrow().items.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&AHashSet<E>) -> R) -> R {
        f(&self.inner.borrow().items)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    pub fn subscribe(&self, callback: impl Fn(&SetEvent<E>) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&SetEvent<E>)> = Rc::new(callback);
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

    /// Returns true if `value` was not yet present.
    pub fn insert(&self, value: E) -> bool {
        self.exchange(Vec::new(), vec![value]) > 0
    }

    /// Returns true if `value` was present.
    pub fn remove(&self, value: &E) -> bool {
        self.exchange(vec![value.clone()], Vec::new()) > 0
    }

    pub fn clear(&self) {
        let all: Vec<E> = self.inner.borrow().items.iter().cloned().collect();
        self.exchange(all, Vec::new());
    }

    /// Swap the whole contents for `items`.
    pub fn reset(&self, items: impl IntoIterator<Item = E>) {
        let next: AHashSet<E> = items.into_iter().collect();
        let removed: Vec<E> = self
            .inner
            .borrow()
            .items
            .iter()
            .filter(|item| !next.contains(*item))
            .cloned()
            .collect();
        self.exchange(removed, next.into_iter().collect());
    }

    /// Remove then add as one event. Entries that are not effective changes
    /// are dropped from the event. Returns the number of effective changes.
    pub fn exchange(&self, removed: Vec<E>, added: Vec<E>) -> usize {
        let event = {
            let mut inner = self.inner.borrow_mut();
            let removed: Vec<E> = removed
                .into_iter()
                .filter(|item| inner.items.remove(item))
                .collect();
            let added: Vec<E> = added
                .into_iter()
                .filter(|item| inner.items.insert(item.clone()))
                .collect();
            if removed.is_empty() && added.is_empty() {
                return 0;
            }
            inner.version += 1;
            SetEvent { removed, added }
        };
        let changes = event.removed.len() + event.added.len();
        let callbacks = live_listeners(&mut self.inner.borrow_mut().subscribers);
        for callback in callbacks {
            callback(&event);
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insert_is_silent() {
        let set = ObservableSet::default();
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&events);
        let _sub = set.subscribe(move |ev: &SetEvent<u8>| e.borrow_mut().push(ev.clone()));
        assert!(set.insert(1));
        assert!(!set.insert(1));
        assert!(!set.remove(&2));
        assert_eq!(events.borrow().len(), 1);
        assert_eq!(set.version(), 1);
    }

    #[test]
    fn reset_reports_only_differences() {
        let set = ObservableSet::new([1, 2, 3].into_iter().collect());
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&events);
        let _sub = set.subscribe(move |ev: &SetEvent<i32>| e.borrow_mut().push(ev.clone()));
        set.reset([2, 3, 4]);
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].removed, vec![1]);
        assert_eq!(events[0].added, vec![4]);
    }
}
