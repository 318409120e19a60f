#![forbid(unsafe_code)]

//! Element-aware validation of observable collections.
//!
//! Each helper validates the collection as a whole with its collection
//! constraints and every element individually with its element constraints.
//! One source mutation is one epoch: whole-collection validators rerun on
//! the new snapshot, new elements are created and validated, removed
//! elements are disposed, and the structural change is staged in the
//! deferred constrained collection. The staged change is applied, as one
//! net change, once the epoch settles as valid.
//!
//! # Invariants
//!
//! 1. The helper state folds every collection slot and every element state.
//! 2. The constrained collection only changes on commit, by the net change
//!    since the previous commit.
//! 3. Elements present at construction are validated by the first epoch
//!    unless the helper starts trusted-valid.

pub mod list;
pub mod map;
pub mod set;

use std::cell::{Cell, RefCell};
use std::iter;

use crate::config::ValidationConfig;
use crate::constraint::{CollectionConstraint, Constraint};
use crate::element::ConstrainedElement;
use crate::engine::ValidationEngine;
use crate::reactive::{Dependency, DependencyId, Subscription};
use crate::result::ValidationState;
use crate::validators::{EventSink, ValidatorSet};

pub use list::ListValidationHelper;
pub use map::MapValidationHelper;
pub use set::SetValidationHelper;

/// State shared by the list, set and map helpers.
pub(crate) struct CollectionCore<C, E, D> {
    pub(crate) engine: ValidationEngine<D>,
    pub(crate) validators: ValidatorSet<C, D>,
    pub(crate) element_constraints: Vec<Constraint<E, D>>,
    primed: Cell<bool>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl<C: Clone + 'static, E: Clone + 'static, D: Clone + 'static> CollectionCore<C, E, D> {
    pub(crate) fn new(
        constraints: Vec<CollectionConstraint<C, E, D>>,
        config: ValidationConfig,
        sink_for: impl FnMut(usize) -> EventSink<C, D>,
    ) -> Self {
        let (whole, each) = CollectionConstraint::partition(constraints);
        let validators = ValidatorSet::new(whole, sink_for);
        let has_constraints = !validators.is_empty() || !each.is_empty();
        Self {
            engine: ValidationEngine::new(config.initial_state, has_constraints),
            validators,
            element_constraints: each,
            primed: Cell::new(false),
            subscriptions: RefCell::new(Vec::new()),
        }
    }

    /// True when the helper may take the initial contents as already
    /// constrained.
    pub(crate) fn starts_committed(&self) -> bool {
        self.engine.state() == ValidationState::Valid
    }

    /// Initial state for elements that exist at construction. Trusted-valid
    /// helpers adopt them as valid and skip the priming pass.
    pub(crate) fn adopt_initial(&self) -> ValidationState {
        if self.starts_committed() {
            self.primed.set(true);
            ValidationState::Valid
        } else {
            ValidationState::Unknown
        }
    }

    pub(crate) fn fold(&self, elements: impl IntoIterator<Item = ValidationState>) -> ValidationState {
        ValidationState::fold(iter::once(self.validators.fold()).chain(elements))
    }

    /// Dependencies of collection and element constraints, once each.
    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        let mut all = self.validators.dependencies();
        for constraint in &self.element_constraints {
            for dep in constraint.dependencies() {
                if !all.iter().any(|seen| seen.id() == dep.id()) {
                    all.push(dep.clone());
                }
            }
        }
        all
    }

    pub(crate) fn keep(&self, subscriptions: Vec<Subscription>) {
        *self.subscriptions.borrow_mut() = subscriptions;
    }

    /// Validate the elements touched by this epoch. The first epoch after an
    /// untrusted construction validates every element instead.
    pub(crate) fn validate_elements(
        &self,
        fresh: Vec<ConstrainedElement<E, D>>,
        all: impl FnOnce() -> Vec<ConstrainedElement<E, D>>,
    ) {
        let targets = if self.primed.replace(true) { fresh } else { all() };
        if self.element_constraints.is_empty() {
            return;
        }
        for element in targets {
            element.validate();
        }
    }

    /// Revalidate everything that declares `id`.
    pub(crate) fn revalidate_dependents(
        &self,
        id: DependencyId,
        snapshot: &C,
        all: impl FnOnce() -> Vec<ConstrainedElement<E, D>>,
    ) {
        if self.validators.declares(id) {
            self.validators.validate_dependents(id, snapshot);
        }
        if !self.primed.get() {
            self.validate_elements(Vec::new(), all);
        } else if self.element_constraints.iter().any(|c| c.declares(id)) {
            for element in all() {
                element.validate_dependents(id);
            }
        }
    }
}
