#![forbid(unsafe_code)]

//! Per-element validation state inside a constrained collection.
//!
//! A [`ConstrainedElement`] owns its own engine and one serialized validator
//! per element constraint. Every validator transition is applied to the
//! element first and then forwarded to the owning collection's engine, so the
//! collection counts element runs in flight alongside its own.
//!
//! # Invariants
//!
//! 1. After [`dispose`](ConstrainedElement::dispose), the parent has seen
//!    one `Cancelled` for every element run that was still in flight, and
//!    receives nothing further from this element.
//! 2. Disposal happens exactly once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::constraint::Constraint;
use crate::diagnostics::DiagnosticList;
use crate::engine::{Epoch, ValidationChange, ValidationEngine, ValidatorState};
use crate::error::{OrRaise, Result, UsageError};
use crate::reactive::{DependencyId, ReadOnly, Subscription};
use crate::result::ValidationState;
use crate::serialized::ValidatorEvent;
use crate::validators::{EventSink, ValidatorSet};

/// Receives forwarded element transitions.
pub(crate) trait ElementParent<D> {
    fn element_changed(&self, state: ValidatorState, intermediate: bool);
}

struct ElementInner<E, D> {
    value: E,
    engine: ValidationEngine<D>,
    validators: ValidatorSet<E, D>,
    parent: RefCell<Option<Weak<dyn ElementParent<D>>>>,
    disposed: Cell<bool>,
}

impl<E: Clone + 'static, D: Clone + 'static> Epoch for ElementInner<E, D> {
    fn fold(&self) -> ValidationState {
        self.validators.fold()
    }

    fn commit(&self) {}
}

impl<E: Clone + 'static, D: Clone + 'static> ElementInner<E, D> {
    fn on_event(&self, index: usize, event: ValidatorEvent<E, D>) {
        let (state, intermediate) = self.validators.route(&self.engine, self, index, event, |_| {});
        let parent = self.parent.borrow().clone();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent.element_changed(state, intermediate);
        }
    }
}

/// One element of a constrained collection, with its own validation state.
///
/// Cloning shares the element.
pub struct ConstrainedElement<E, D> {
    inner: Rc<ElementInner<E, D>>,
}

impl<E, D> Clone for ConstrainedElement<E, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: fmt::Debug, D> fmt::Debug for ConstrainedElement<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstrainedElement")
            .field("value", &self.inner.value)
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl<E: Clone + 'static, D: Clone + 'static> ConstrainedElement<E, D> {
    pub(crate) fn new(
        value: E,
        constraints: &[Constraint<E, D>],
        initial: ValidationState,
        parent: Weak<dyn ElementParent<D>>,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<ElementInner<E, D>>| {
            let validators = ValidatorSet::new(constraints.to_vec(), |index| {
                let this = this.clone();
                let sink: EventSink<E, D> = Box::new(move |event| {
                    if let Some(inner) = this.upgrade() {
                        inner.on_event(index, event);
                    }
                });
                sink
            });
            ElementInner {
                value,
                engine: ValidationEngine::new(initial, !validators.is_empty()),
                validators,
                parent: RefCell::new(Some(parent)),
                disposed: Cell::new(false),
            }
        });
        Self { inner }
    }

    /// Run every element constraint on the element value.
    pub(crate) fn validate(&self) {
        if self.inner.disposed.get() {
            return;
        }
        let inner = &*self.inner;
        inner
            .engine
            .epoch(inner, || inner.validators.validate_all(&inner.value));
    }

    /// Rerun the element constraints that declare `id`.
    pub(crate) fn validate_dependents(&self, id: DependencyId) {
        if self.inner.disposed.get() {
            return;
        }
        let inner = &*self.inner;
        inner
            .engine
            .epoch(inner, || inner.validators.validate_dependents(id, &inner.value));
    }

    pub(crate) fn dispose(&self) {
        self.try_dispose().or_raise();
    }

    fn try_dispose(&self) -> Result<()> {
        if self.inner.disposed.replace(true) {
            return Err(UsageError::AlreadyDisposed);
        }
        let in_flight = self.inner.engine.running();
        let parent = self.inner.parent.borrow_mut().take();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            for _ in 0..in_flight {
                parent.element_changed(ValidatorState::Cancelled, false);
            }
        }
        self.inner.validators.dispose();
        tracing::debug!(message = "validation.element.dispose", in_flight);
        Ok(())
    }

    #[must_use]
    pub fn value(&self) -> &E {
        &self.inner.value
    }

    #[must_use]
    pub fn state(&self) -> ValidationState {
        self.inner.engine.state()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state() == ValidationState::Valid
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.state() == ValidationState::Invalid
    }

    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.inner.engine.is_validating()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    #[must_use]
    pub fn valid_property(&self) -> ReadOnly<bool> {
        self.inner.engine.valid_property()
    }

    #[must_use]
    pub fn invalid_property(&self) -> ReadOnly<bool> {
        self.inner.engine.invalid_property()
    }

    #[must_use]
    pub fn validating_property(&self) -> ReadOnly<bool> {
        self.inner.engine.validating_property()
    }

    /// Diagnostics produced by the element constraints.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticList<D> {
        self.inner.engine.diagnostics().clone()
    }

    pub fn subscribe_changes(&self, callback: impl Fn(&ValidationChange) + 'static) -> Subscription {
        self.inner.engine.subscribe_changes(callback)
    }

    /// True if both handles refer to the same element.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ValidationResult;
    use crate::task::{Completer, Dispatcher, ValidationTask};

    #[derive(Default)]
    struct Recorder {
        seen: RefCell<Vec<(ValidatorState, bool)>>,
    }

    impl ElementParent<&'static str> for Recorder {
        fn element_changed(&self, state: ValidatorState, intermediate: bool) {
            self.seen.borrow_mut().push((state, intermediate));
        }
    }

    fn parent() -> (Rc<Recorder>, Weak<dyn ElementParent<&'static str>>) {
        let recorder = Rc::new(Recorder::default());
        let weak: Weak<Recorder> = Rc::downgrade(&recorder);
        let weak: Weak<dyn ElementParent<&'static str>> = weak;
        (recorder, weak)
    }

    fn non_empty() -> Constraint<String, &'static str> {
        Constraint::immediate(|s: &String| {
            if s.is_empty() {
                ValidationResult::invalid_with("empty")
            } else {
                ValidationResult::valid()
            }
        })
    }

    #[test]
    fn synchronous_validation_forwards_start_and_result() {
        let (recorder, weak) = parent();
        let element = ConstrainedElement::new(String::new(), &[non_empty()], ValidationState::Unknown, weak);
        element.validate();
        assert!(element.is_invalid());
        assert_eq!(element.diagnostics().values(crate::DiagnosticView::Invalid), vec!["empty"]);
        assert_eq!(
            *recorder.seen.borrow(),
            vec![(ValidatorState::Started, false), (ValidatorState::Failed, false)]
        );
    }

    #[test]
    fn element_without_constraints_is_valid() {
        let (_recorder, weak) = parent();
        let element: ConstrainedElement<String, &'static str> =
            ConstrainedElement::new("x".into(), &[], ValidationState::Unknown, weak);
        element.validate();
        assert!(element.is_valid());
    }

    #[test]
    fn dispose_cancels_in_flight_runs_on_parent() {
        let (recorder, weak) = parent();
        let dispatcher = Dispatcher::new();
        let pending: Rc<RefCell<Vec<Completer<&'static str>>>> = Rc::new(RefCell::new(Vec::new()));
        let p = Rc::clone(&pending);
        let slow = Constraint::new(move |_: &String| {
            let (task, completer) = ValidationTask::pending();
            p.borrow_mut().push(completer);
            task
        })
        .complete_on(&dispatcher);
        let element = ConstrainedElement::new("x".to_string(), &[slow], ValidationState::Unknown, weak);
        element.validate();
        assert!(element.is_validating());

        element.dispose();
        assert!(element.is_disposed());
        assert_eq!(
            *recorder.seen.borrow(),
            vec![(ValidatorState::Started, false), (ValidatorState::Cancelled, false)]
        );

        // The late completion is swallowed.
        let completer = pending.borrow_mut().remove(0);
        assert!(completer.is_cancellation_requested());
        completer.complete(ValidationResult::valid());
        dispatcher.run_pending();
        assert_eq!(recorder.seen.borrow().len(), 2);
    }

    #[test]
    fn double_dispose_is_a_usage_error() {
        let (_recorder, weak) = parent();
        let element = ConstrainedElement::new("x".to_string(), &[non_empty()], ValidationState::Unknown, weak);
        element.dispose();
        assert_eq!(element.try_dispose(), Err(UsageError::AlreadyDisposed));
    }
}
