#![forbid(unsafe_code)]

//! Observable hash maps.
//!
//! Overwriting a key with a different value is reported as one event that
//! carries both the old entry (in `removed`) and the new one (in `added`).

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashMap;

use super::observable::{Dependency, Listener, Subscription, live_listeners};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEvent<K, V> {
    pub removed: Vec<(K, V)>,
    pub added: Vec<(K, V)>,
}

struct MapInner<K, V> {
    entries: AHashMap<K, V>,
    version: u64,
    subscribers: Vec<Listener<MapEvent<K, V>>>,
}

/// A shared, observable `AHashMap`.
pub struct ObservableMap<K, V> {
    inner: Rc<RefCell<MapInner<K, V>>>,
}

impl<K, V> Clone for ObservableMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for ObservableMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ObservableMap")
            .field("entries", &inner.entries)
            .field("version", &inner.version)
            .finish()
    }
}

impl<K, V> Default for ObservableMap<K, V>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new(AHashMap::new())
    }
}

impl<K, V> ObservableMap<K, V>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new(entries: AHashMap<K, V>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MapInner {
                entries,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.borrow().entries.get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.borrow().entries.contains_key(key)
    }

    #[must_use]
    pub fn snapshot(&self) -> AHashMap<K, V> {
        self.inner.borrow().entries.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&AHashMap<K, V>) -> R) -> R {
        f(&self.inner.borrow().entries)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    pub fn subscribe(&self, callback: impl Fn(&MapEvent<K, V>) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&MapEvent<K, V>)> = Rc::new(callback);
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

    /// Insert or overwrite. Writing an equal value emits nothing.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let previous = self.get(&key);
        if previous.as_ref() == Some(&value) {
            return previous;
        }
        self.exchange(Vec::new(), vec![(key, value)]);
        previous
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let previous = self.get(key);
        if previous.is_some() {
            self.exchange(vec![key.clone()], Vec::new());
        }
        previous
    }

    pub fn clear(&self) {
        let keys: Vec<K> = self.inner.borrow().entries.keys().cloned().collect();
        self.exchange(keys, Vec::new());
    }

    /// Swap the whole contents for `entries`.
    pub fn reset(&self, entries: impl IntoIterator<Item = (K, V)>) {
        let next: AHashMap<K, V> = entries.into_iter().collect();
        let gone: Vec<K> = self
            .inner
            .borrow()
            .entries
            .keys()
            .filter(|key| !next.contains_key(*key))
            .cloned()
            .collect();
        self.exchange(gone, next.into_iter().collect());
    }

    /// Remove `keys`, then upsert `entries`, as one event. Returns the number
    /// of effective changes.
    pub fn exchange(&self, keys: Vec<K>, entries: Vec<(K, V)>) -> usize {
        let event = {
            let mut inner = self.inner.borrow_mut();
            let mut removed = Vec::new();
            let mut added = Vec::new();
            for key in keys {
                if let Some(old) = inner.entries.remove(&key) {
                    removed.push((key, old));
                }
            }
            for (key, value) in entries {
                match inner.entries.insert(key.clone(), value.clone()) {
                    Some(old) if old == value => continue,
                    Some(old) => removed.push((key.clone(), old)),
                    None => {}
                }
                added.push((key, value));
            }
            if removed.is_empty() && added.is_empty() {
                return 0;
            }
            inner.version += 1;
            MapEvent { removed, added }
        };
        let changes = event.removed.len() + event.added.len();
        let callbacks = live_listeners(&mut self.inner.borrow_mut().subscribers);
        for callback in callbacks {
            callback(&event);
        }
        changes
    }
}
