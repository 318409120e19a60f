#![forbid(unsafe_code)]

//! Shared, version-tracked scalar values with change notification.
//!
//! # Invariants
//!
//! 1. `version` increments by exactly 1 per mutation that changes the value.
//! 2. No `RefCell` borrow is held while subscriber callbacks run, so a
//!    callback may read (or even write) the observable it listens to.
//! 3. Dead subscribers are pruned lazily at the next notification.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: the panic unwinds through `set()`. The value and
//!   version have already been updated; remaining subscribers are skipped for
//!   that cycle.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Callback list entry. Strong ownership lives in the [`Subscription`].
pub(crate) type Listener<A> = Weak<dyn Fn(&A)>;

/// Upgrade live listeners and drop the dead ones.
pub(crate) fn live_listeners<A: ?Sized>(list: &mut Vec<Weak<dyn Fn(&A)>>) -> Vec<Rc<dyn Fn(&A)>> {
    list.retain(|weak| weak.strong_count() > 0);
    list.iter().filter_map(Weak::upgrade).collect()
}

/// RAII guard for a registered callback.
///
/// The callback stays registered exactly as long as this guard lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl Subscription {
    pub(crate) fn new<G: 'static>(guard: G) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }

    /// Combine several guards into one.
    pub fn merge(subscriptions: Vec<Subscription>) -> Self {
        Self::new(subscriptions)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<Listener<T>>,
}

/// A shared, observable scalar.
///
/// Cloning an `Observable` creates another handle to the **same** value.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a new observable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Borrow the current value without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Replace the value. Equal values are ignored.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify();
    }

    /// Mutate the value in place; subscribers fire only if it changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Number of effective mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Register `callback` for every change. Returns the guard that keeps it
    /// alive.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&T)> = Rc::new(callback);
        self.inner
            .borrow_mut()
            .subscribers
            .push(Rc::downgrade(&strong));
        Subscription::new(strong)
    }

    /// Count of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// A read-only view onto the same value.
    #[must_use]
    pub fn read_only(&self) -> ReadOnly<T> {
        ReadOnly {
            source: self.clone(),
        }
    }

    /// Type-erased change signal for use as a constraint dependency.
    #[must_use]
    pub fn as_dependency(&self) -> Dependency {
        let source = self.clone();
        Dependency::new(
            Rc::as_ptr(&self.inner) as *const () as usize,
            move |callback| source.subscribe(move |_| callback()),
        )
    }

    fn notify(&self) {
        let (callbacks, value) = {
            let mut inner = self.inner.borrow_mut();
            let callbacks = live_listeners(&mut inner.subscribers);
            (callbacks, inner.value.clone())
        };
        for callback in callbacks {
            callback(&value);
        }
    }
}

/// Read-only handle onto an [`Observable`].
pub struct ReadOnly<T> {
    source: Observable<T>,
}

impl<T> Clone for ReadOnly<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnly<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnly").field(&self.source).finish()
    }
}

impl<T: Clone + PartialEq + 'static> ReadOnly<T> {
    #[must_use]
    pub fn get(&self) -> T {
        self.source.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.source.with(f)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.source.version()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.source.subscribe(callback)
    }

    #[must_use]
    pub fn as_dependency(&self) -> Dependency {
        self.source.as_dependency()
    }
}

/// Stable identity of a [`Dependency`], derived from the source's shared
/// storage. Two dependencies built from handles to the same source compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyId(usize);

/// A type-erased change signal.
///
/// Constraints declare dependencies so that a change in some value other than
/// the validated one triggers revalidation.
#[derive(Clone)]
pub struct Dependency {
    id: DependencyId,
    subscribe: Rc<dyn Fn(Rc<dyn Fn()>) -> Subscription>,
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dependency").field(&self.id).finish()
    }
}

impl Dependency {
    pub(crate) fn new(
        id: usize,
        subscribe: impl Fn(Rc<dyn Fn()>) -> Subscription + 'static,
    ) -> Self {
        Self {
            id: DependencyId(id),
            subscribe: Rc::new(subscribe),
        }
    }

    #[must_use]
    pub fn id(&self) -> DependencyId {
        self.id
    }

    /// Run `callback` whenever the underlying source changes.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        (self.subscribe)(Rc::new(callback))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
