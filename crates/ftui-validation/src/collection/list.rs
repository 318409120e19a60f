#![forbid(unsafe_code)]

//! Validation of an [`ObservableVec`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::CollectionCore;
use crate::aggregate::ListEdit;
use crate::config::ValidationConfig;
use crate::constraint::ListConstraint;
use crate::deferred::DeferredVec;
use crate::diagnostics::DiagnosticList;
use crate::element::{ConstrainedElement, ElementParent};
use crate::engine::{Epoch, ValidationChange, ValidatorState};
use crate::reactive::{DependencyId, ListEvent, ListOp, ObservableVec, ReadOnly, Subscription};
use crate::result::ValidationState;
use crate::serialized::ValidatorEvent;
use crate::validators::EventSink;

struct ListInner<E, D> {
    this: Weak<ListInner<E, D>>,
    source: ObservableVec<E>,
    core: CollectionCore<Vec<E>, E, D>,
    elements: RefCell<Vec<ConstrainedElement<E, D>>>,
    constrained: DeferredVec<E>,
}

impl<E: Clone + PartialEq + 'static, D: Clone + 'static> Epoch for ListInner<E, D> {
    fn fold(&self) -> ValidationState {
        let elements = self.elements.borrow();
        self.core.fold(elements.iter().map(ConstrainedElement::state))
    }

    fn commit(&self) {
        if self.constrained.apply() {
            tracing::debug!(message = "validation.commit", kind = "list", len = self.constrained.len());
        }
    }
}

impl<E: Clone + PartialEq + 'static, D: Clone + 'static> ElementParent<D> for ListInner<E, D> {
    fn element_changed(&self, state: ValidatorState, intermediate: bool) {
        self.core.engine.notify(self, state, intermediate);
    }
}

impl<E: Clone + PartialEq + 'static, D: Clone + 'static> ListInner<E, D> {
    fn new_element(&self, value: E, initial: ValidationState) -> ConstrainedElement<E, D> {
        let parent: Weak<dyn ElementParent<D>> = self.this.clone();
        ConstrainedElement::new(value, &self.core.element_constraints, initial, parent)
    }

    fn all_elements(&self) -> Vec<ConstrainedElement<E, D>> {
        self.elements.borrow().clone()
    }

    fn on_validator_event(&self, index: usize, event: ValidatorEvent<Vec<E>, D>) {
        self.core
            .validators
            .route(&self.core.engine, self, index, event, |_| {});
    }

    fn on_source_event(&self, event: &ListEvent<E>) {
        self.core.engine.epoch(self, || {
            self.core.validators.validate_all(&self.source.to_vec());

            let mut fresh = Vec::new();
            let mut stale = Vec::new();
            {
                let mut elements = self.elements.borrow_mut();
                for op in &event.ops {
                    match op {
                        ListOp::Added { at, added } => {
                            self.constrained.record(ListEdit::Added {
                                at: *at,
                                elements: added.clone(),
                            });
                            let created: Vec<_> = added
                                .iter()
                                .map(|v| self.new_element(v.clone(), ValidationState::Unknown))
                                .collect();
                            fresh.extend(created.iter().cloned());
                            elements.splice(*at..*at, created);
                        }
                        ListOp::Removed { at, removed } => {
                            self.constrained.record(ListEdit::Removed {
                                at: *at,
                                count: removed.len(),
                            });
                            stale.extend(elements.drain(*at..*at + removed.len()));
                        }
                        ListOp::Replaced { at, removed, added } => {
                            self.constrained.record(ListEdit::Replaced {
                                at: *at,
                                count: removed.len(),
                                elements: added.clone(),
                            });
                            let created: Vec<_> = added
                                .iter()
                                .map(|v| self.new_element(v.clone(), ValidationState::Unknown))
                                .collect();
                            fresh.extend(created.iter().cloned());
                            stale.extend(elements.splice(*at..*at + removed.len(), created));
                        }
                        ListOp::Permuted {
                            from,
                            permutation,
                            reordered,
                        } => {
                            self.constrained.record(ListEdit::Replaced {
                                at: *from,
                                count: reordered.len(),
                                elements: reordered.clone(),
                            });
                            let moved: Vec<_> = elements[*from..*from + permutation.len()].to_vec();
                            for (element, &target) in moved.into_iter().zip(permutation) {
                                elements[target] = element;
                            }
                        }
                    }
                }
            }

            for element in stale {
                element.dispose();
            }
            self.core.validate_elements(fresh, || self.all_elements());
        });
    }

    fn on_dependency(&self, id: DependencyId) {
        self.core.engine.epoch(self, || {
            self.core
                .revalidate_dependents(id, &self.source.to_vec(), || self.all_elements());
        });
    }

    fn attach(this: &Rc<Self>) {
        let mut subscriptions = Vec::new();
        let weak = Rc::downgrade(this);
        subscriptions.push(this.source.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_source_event(event);
            }
        }));
        for dependency in this.core.dependencies() {
            let weak = Rc::downgrade(this);
            let id = dependency.id();
            subscriptions.push(dependency.subscribe(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_dependency(id);
                }
            }));
        }
        this.core.keep(subscriptions);
    }
}

/// Validates an [`ObservableVec`] as a whole and element by element.
///
/// Collection diagnostics are indexed by collection-constraint position;
/// each element carries its own diagnostics.
pub struct ListValidationHelper<E, D> {
    inner: Rc<ListInner<E, D>>,
}

impl<E, D> Clone for ListValidationHelper<E, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Clone + PartialEq + 'static, D: Clone + 'static> ListValidationHelper<E, D> {
    pub fn new(source: &ObservableVec<E>, constraints: Vec<ListConstraint<E, D>>) -> Self {
        Self::with_config(source, constraints, ValidationConfig::default())
    }

    pub fn with_config(
        source: &ObservableVec<E>,
        constraints: Vec<ListConstraint<E, D>>,
        config: ValidationConfig,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<ListInner<E, D>>| {
            let core = CollectionCore::new(constraints, config, |index| {
                let this = this.clone();
                let sink: EventSink<Vec<E>, D> = Box::new(move |event| {
                    if let Some(inner) = this.upgrade() {
                        inner.on_validator_event(index, event);
                    }
                });
                sink
            });
            let initial = if core.starts_committed() {
                source.to_vec()
            } else {
                Vec::new()
            };
            ListInner {
                this: this.clone(),
                source: source.clone(),
                core,
                elements: RefCell::new(Vec::new()),
                constrained: DeferredVec::new(initial),
            }
        });

        let contents = source.to_vec();
        let adopted = inner.core.adopt_initial();
        let elements: Vec<_> = contents
            .iter()
            .map(|v| inner.new_element(v.clone(), adopted))
            .collect();
        *inner.elements.borrow_mut() = elements;
        if !inner.core.starts_committed() && !contents.is_empty() {
            inner.constrained.record(ListEdit::Added {
                at: 0,
                elements: contents,
            });
        }

        ListInner::attach(&inner);
        if config.validates_on_construction() {
            inner.core.engine.epoch(&*inner, || {
                inner.core.validators.validate_all(&inner.source.to_vec());
                inner.core.validate_elements(Vec::new(), || inner.all_elements());
            });
        }
        Self { inner }
    }

    #[must_use]
    pub fn state(&self) -> ValidationState {
        self.inner.core.engine.state()
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
        self.inner.core.engine.is_validating()
    }

    #[must_use]
    pub fn valid_property(&self) -> ReadOnly<bool> {
        self.inner.core.engine.valid_property()
    }

    #[must_use]
    pub fn invalid_property(&self) -> ReadOnly<bool> {
        self.inner.core.engine.invalid_property()
    }

    #[must_use]
    pub fn validating_property(&self) -> ReadOnly<bool> {
        self.inner.core.engine.validating_property()
    }

    /// Diagnostics of the collection constraints.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticList<D> {
        self.inner.core.engine.diagnostics().clone()
    }

    /// The last list contents that passed every constraint.
    #[must_use]
    pub fn constrained_value(&self) -> DeferredVec<E> {
        self.inner.constrained.clone()
    }

    /// Elements in source order.
    #[must_use]
    pub fn elements(&self) -> Vec<ConstrainedElement<E, D>> {
        self.inner.all_elements()
    }

    #[must_use]
    pub fn element(&self, index: usize) -> Option<ConstrainedElement<E, D>> {
        self.inner.elements.borrow().get(index).cloned()
    }

    pub fn subscribe_changes(&self, callback: impl Fn(&ValidationChange) + 'static) -> Subscription {
        self.inner.core.engine.subscribe_changes(callback)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{CollectionConstraint, Constraint};
    use crate::diagnostics::DiagnosticView;
    use crate::result::ValidationResult;
    use crate::task::{Completer, Dispatcher, ValidationTask};

    fn non_empty() -> ListConstraint<String, &'static str> {
        CollectionConstraint::Element(Constraint::immediate(|s: &String| {
            if s.is_empty() {
                ValidationResult::invalid_with("empty")
            } else {
                ValidationResult::valid()
            }
        }))
    }

    fn at_most(n: usize) -> ListConstraint<String, &'static str> {
        CollectionConstraint::Collection(Constraint::immediate(move |v: &Vec<String>| {
            if v.len() <= n {
                ValidationResult::valid()
            } else {
                ValidationResult::invalid_with("too many")
            }
        }))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn invalid_element_blocks_commit_until_removed() {
        let source = ObservableVec::new(strings(&["ab", ""]));
        let helper = ListValidationHelper::new(&source, vec![at_most(5), non_empty()]);
        assert!(helper.is_invalid());
        assert!(helper.element(1).is_some_and(|e| e.is_invalid()));
        assert!(helper.constrained_value().is_empty());

        source.remove(1);
        assert!(helper.is_valid());
        assert_eq!(helper.constrained_value().to_vec(), strings(&["ab"]));
    }

    #[test]
    fn constrained_list_changes_once_per_commit() {
        let source = ObservableVec::new(strings(&["a"]));
        let helper = ListValidationHelper::new(&source, vec![non_empty()]);
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&events);
        let _sub = helper
            .constrained_value()
            .subscribe(move |event| e.borrow_mut().push(event.clone()));

        source.push(String::new());
        source.push("c".into());
        assert!(events.borrow().is_empty());
        source.remove(1);
        assert_eq!(events.borrow().len(), 1);
        assert_eq!(helper.constrained_value().to_vec(), strings(&["a", "c"]));
    }

    #[test]
    fn collection_diagnostics_use_constraint_index() {
        let source = ObservableVec::new(strings(&["a", "b"]));
        let helper = ListValidationHelper::new(&source, vec![non_empty(), at_most(1)]);
        assert!(helper.is_invalid());
        let diagnostics = helper.diagnostics().entries(DiagnosticView::Invalid);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].index, 0);
        assert_eq!(diagnostics[0].value, "too many");
    }

    #[test]
    fn permutation_keeps_element_identity() {
        let source = ObservableVec::new(strings(&["b", "a"]));
        let helper = ListValidationHelper::new(&source, vec![non_empty()]);
        let before = helper.elements();
        source.sort_by(|x, y| x.cmp(y));
        let after = helper.elements();
        assert!(after[0].ptr_eq(&before[1]));
        assert!(after[1].ptr_eq(&before[0]));
        assert_eq!(helper.constrained_value().to_vec(), strings(&["a", "b"]));
    }

    #[test]
    fn removed_element_in_flight_is_cancelled() {
        let dispatcher = Dispatcher::new();
        let pending: Rc<RefCell<Vec<Completer<&'static str>>>> = Rc::new(RefCell::new(Vec::new()));
        let p = Rc::clone(&pending);
        let slow: ListConstraint<String, &'static str> = CollectionConstraint::Element(
            Constraint::new(move |_: &String| {
                let (task, completer) = ValidationTask::pending();
                p.borrow_mut().push(completer);
                task
            })
            .complete_on(&dispatcher),
        );
        let source = ObservableVec::new(strings(&["x"]));
        let helper = ListValidationHelper::new(&source, vec![slow]);
        assert!(helper.is_validating());

        let element = helper.element(0).expect("element");
        source.clear();
        assert!(element.is_disposed());
        assert!(!helper.is_validating());
        assert!(helper.is_valid());
        assert!(helper.constrained_value().is_empty());

        for completer in pending.borrow_mut().drain(..) {
            completer.complete(ValidationResult::invalid());
        }
        dispatcher.run_pending();
        assert!(helper.is_valid());
    }

    #[test]
    fn trusted_valid_exposes_initial_contents() {
        let source = ObservableVec::new(strings(&["", "x"]));
        let helper = ListValidationHelper::with_config(
            &source,
            vec![non_empty()],
            ValidationConfig::assume_valid(),
        );
        assert!(helper.is_valid());
        assert_eq!(helper.constrained_value().len(), 2);
        assert!(helper.element(0).is_some_and(|e| e.is_valid()));
    }
}
