#![forbid(unsafe_code)]

//! One serialized validator per constraint, plus the slot results they feed.

use std::cell::RefCell;

use crate::constraint::Constraint;
use crate::engine::{Epoch, ValidationEngine, ValidatorState};
use crate::reactive::{Dependency, DependencyId};
use crate::result::{ValidationResult, ValidationState};
use crate::serialized::{SerializedValidator, ValidatorEvent};

pub(crate) type EventSink<T, D> = Box<dyn Fn(ValidatorEvent<T, D>)>;

/// Validators for one kind of constraint, indexed by declaration order. The
/// index doubles as the diagnostic slot index.
pub(crate) struct ValidatorSet<T, D> {
    validators: Vec<SerializedValidator<T, D>>,
    results: RefCell<Vec<Option<ValidationResult<D>>>>,
}

impl<T: Clone + 'static, D: Clone + 'static> ValidatorSet<T, D> {
    pub(crate) fn new(
        constraints: Vec<Constraint<T, D>>,
        mut sink_for: impl FnMut(usize) -> EventSink<T, D>,
    ) -> Self {
        let validators: Vec<_> = constraints
            .into_iter()
            .enumerate()
            .map(|(index, constraint)| SerializedValidator::new(constraint, sink_for(index)))
            .collect();
        let results = RefCell::new(vec![None; validators.len()]);
        Self {
            validators,
            results,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub(crate) fn validate_all(&self, value: &T) {
        for validator in &self.validators {
            validator.validate(value.clone());
        }
    }

    /// Rerun only the constraints that declare `id`.
    pub(crate) fn validate_dependents(&self, id: DependencyId, value: &T) {
        for validator in &self.validators {
            if validator.constraint().declares(id) {
                validator.validate(value.clone());
            }
        }
    }

    pub(crate) fn declares(&self, id: DependencyId) -> bool {
        self.validators.iter().any(|v| v.constraint().declares(id))
    }

    /// Every declared dependency, once.
    pub(crate) fn dependencies(&self) -> Vec<Dependency> {
        let mut seen: Vec<Dependency> = Vec::new();
        for validator in &self.validators {
            for dep in validator.constraint().dependencies() {
                if !seen.iter().any(|s| s.id() == dep.id()) {
                    seen.push(dep.clone());
                }
            }
        }
        seen
    }

    pub(crate) fn fold(&self) -> ValidationState {
        ValidationState::fold(self.results.borrow().iter().map(|r| ValidationState::of(r.as_ref())))
    }

    pub(crate) fn dispose(&self) {
        for validator in &self.validators {
            validator.dispose();
        }
    }

    /// Feed one validator event into `engine`: update the slot result and
    /// its diagnostic, hand a validated value to `on_valid`, then report the
    /// transition. Returns the transition so callers can forward it.
    pub(crate) fn route(
        &self,
        engine: &ValidationEngine<D>,
        owner: &dyn Epoch,
        index: usize,
        event: ValidatorEvent<T, D>,
        on_valid: impl FnOnce(T),
    ) -> (ValidatorState, bool) {
        match event {
            ValidatorEvent::Started => {
                self.results.borrow_mut()[index] = None;
                engine.diagnostics().clear(index);
                engine.notify(owner, ValidatorState::Started, false);
                (ValidatorState::Started, false)
            }
            ValidatorEvent::Completed {
                value,
                result,
                intermediate,
            } => {
                self.results.borrow_mut()[index] = result.clone();
                let state = match result {
                    None => ValidatorState::Cancelled,
                    Some(result) => {
                        let valid = result.is_valid();
                        if let Some(diagnostic) = result.into_diagnostic() {
                            engine.diagnostics().set(index, diagnostic, valid);
                        }
                        if valid {
                            ValidatorState::Succeeded
                        } else {
                            ValidatorState::Failed
                        }
                    }
                };
                if state == ValidatorState::Succeeded && !intermediate {
                    on_valid(value);
                }
                engine.notify(owner, state, intermediate);
                (state, intermediate)
            }
        }
    }
}
