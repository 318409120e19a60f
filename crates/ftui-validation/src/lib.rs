#![forbid(unsafe_code)]

//! Constraint-driven validation of observable values and collections.
//!
//! A helper watches a source, runs its constraints whenever the source (or a
//! declared dependency) changes, and publishes a tri-state result, per
//! constraint diagnostics and a *constrained* copy of the source that only
//! ever holds contents that passed every constraint.
//!
//! - [`ValidationHelper`] validates an [`Observable`].
//! - [`ListValidationHelper`], [`SetValidationHelper`] and
//!   [`MapValidationHelper`] validate collections as a whole and element by
//!   element, exposing each element as a [`ConstrainedElement`].
//!
//! Constraints may complete immediately or later through a [`Completer`];
//! late completions are delivered on the thread that owns the helper via a
//! [`Dispatcher`]. Each constraint runs at most once at a time; values that
//! arrive while it is busy are coalesced so only the latest one is
//! validated next.
//!
//! Everything here is single-threaded (`Rc`/`RefCell`); only completers
//! cross threads.

pub mod aggregate;
pub mod collection;
pub mod config;
pub mod constraint;
pub mod deferred;
pub mod diagnostics;
pub mod element;
mod engine;
pub mod error;
pub mod helper;
pub mod reactive;
pub mod result;
pub mod serialized;
pub mod task;
mod validators;

pub use aggregate::{
    ListChangeAggregator, ListDelta, ListEdit, MapChangeAggregator, MapDelta, SetChangeAggregator,
    SetDelta,
};
pub use collection::{ListValidationHelper, MapValidationHelper, SetValidationHelper};
pub use config::ValidationConfig;
pub use constraint::{CollectionConstraint, Constraint, ListConstraint, MapConstraint, SetConstraint};
pub use deferred::{DeferredMap, DeferredSet, DeferredValue, DeferredVec};
pub use diagnostics::{Diagnostic, DiagnosticChange, DiagnosticList, DiagnosticView};
pub use element::ConstrainedElement;
pub use engine::{ChangeKind, ValidationChange};
pub use error::{Result, UsageError};
pub use helper::ValidationHelper;
pub use reactive::{
    Dependency, DependencyId, ListEvent, ListOp, MapEvent, Observable, ObservableMap, ObservableSet,
    ObservableVec, ReadOnly, SetEvent, Subscription,
};
pub use result::{ValidationResult, ValidationState};
pub use serialized::{SerializedValidator, ValidatorEvent};
pub use task::{Completer, Dispatcher, ValidationTask};

pub mod prelude {
    pub use crate::{
        CollectionConstraint, Constraint, ListValidationHelper, MapValidationHelper, Observable,
        ObservableMap, ObservableSet, ObservableVec, SetValidationHelper, ValidationHelper,
        ValidationResult, ValidationState,
    };
}
