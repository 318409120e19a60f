#![forbid(unsafe_code)]

//! Change-tracking primitives the validation helpers observe.
//!
//! - [`Observable`]: a shared, version-tracked scalar with change
//!   notification via subscriber callbacks.
//! - [`ObservableVec`], [`ObservableSet`], [`ObservableMap`]: shared
//!   collections that report structural change events.
//! - [`Subscription`]: RAII guard that unsubscribes on drop.
//! - [`Dependency`]: type-erased "something changed" signal with a stable
//!   identity, used to declare extra constraint inputs.
//!
//! # Architecture
//!
//! All containers use `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` function pointers and cleaned up lazily
//! during notification.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes contents.
//! 2. Subscribers are notified in registration order.
//! 3. A mutation that changes nothing is a no-op (no version bump, no
//!    notifications).
//! 4. Dropping a [`Subscription`] removes the callback before the next
//!    notification cycle.

pub mod map;
pub mod observable;
pub mod set;
pub mod vec;

pub use map::{MapEvent, ObservableMap};
pub use observable::{Dependency, DependencyId, Observable, ReadOnly, Subscription};
pub use set::{ObservableSet, SetEvent};
pub use vec::{ListEvent, ListOp, ObservableVec};
