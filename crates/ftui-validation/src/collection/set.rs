#![forbid(unsafe_code)]

//! Validation of an [`ObservableSet`].

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};

use super::CollectionCore;
use crate::config::ValidationConfig;
use crate::constraint::SetConstraint;
use crate::deferred::DeferredSet;
use crate::diagnostics::DiagnosticList;
use crate::element::{ConstrainedElement, ElementParent};
use crate::engine::{Epoch, ValidationChange, ValidatorState};
use crate::reactive::{DependencyId, ObservableSet, ReadOnly, SetEvent, Subscription};
use crate::result::ValidationState;
use crate::serialized::ValidatorEvent;
use crate::validators::EventSink;

struct SetInner<E: Eq + Hash, D> {
    this: Weak<SetInner<E, D>>,
    source: ObservableSet<E>,
    core: CollectionCore<AHashSet<E>, E, D>,
    elements: RefCell<AHashMap<E, ConstrainedElement<E, D>>>,
    constrained: DeferredSet<E>,
}

impl<E: Clone + Eq + Hash + 'static, D: Clone + 'static> Epoch for SetInner<E, D> {
    fn fold(&self) -> ValidationState {
        let elements = self.elements.borrow();
        self.core.fold(elements.values().map(ConstrainedElement::state))
    }

    fn commit(&self) {
        if self.constrained.apply() {
            tracing::debug!(message = "validation.commit", kind = "set", len = self.constrained.len());
        }
    }
}

impl<E: Clone + Eq + Hash + 'static, D: Clone + 'static> ElementParent<D> for SetInner<E, D> {
    fn element_changed(&self, state: ValidatorState, intermediate: bool) {
        self.core.engine.notify(self, state, intermediate);
    }
}

impl<E: Clone + Eq + Hash + 'static, D: Clone + 'static> SetInner<E, D> {
    fn new_element(&self, value: E, initial: ValidationState) -> ConstrainedElement<E, D> {
        let parent: Weak<dyn ElementParent<D>> = self.this.clone();
        ConstrainedElement::new(value, &self.core.element_constraints, initial, parent)
    }

    fn all_elements(&self) -> Vec<ConstrainedElement<E, D>> {
        self.elements.borrow().values().cloned().collect()
    }

    fn on_validator_event(&self, index: usize, event: ValidatorEvent<AHashSet<E>, D>) {
        self.core
            .validators
            .route(&self.core.engine, self, index, event, |_| {});
    }

    fn on_source_event(&self, event: &SetEvent<E>) {
        self.core.engine.epoch(self, || {
            self.core.validators.validate_all(&self.source.snapshot());

            let mut fresh = Vec::new();
            let mut stale = Vec::new();
            {
                let mut elements = self.elements.borrow_mut();
                for item in &event.removed {
                    self.constrained.record_removed(item.clone());
                    stale.extend(elements.remove(item));
                }
                for item in &event.added {
                    self.constrained.record_added(item.clone());
                    let element = self.new_element(item.clone(), ValidationState::Unknown);
                    fresh.push(element.clone());
                    stale.extend(elements.insert(item.clone(), element));
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
                .revalidate_dependents(id, &self.source.snapshot(), || self.all_elements());
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

/// Validates an [`ObservableSet`] as a whole and member by member.
pub struct SetValidationHelper<E: Eq + Hash, D> {
    inner: Rc<SetInner<E, D>>,
}

impl<E: Eq + Hash, D> Clone for SetValidationHelper<E, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Eq + Hash + 'static, D: Clone + 'static> SetValidationHelper<E, D> {
    pub fn new(source: &ObservableSet<E>, constraints: Vec<SetConstraint<E, D>>) -> Self {
        Self::with_config(source, constraints, ValidationConfig::default())
    }

    pub fn with_config(
        source: &ObservableSet<E>,
        constraints: Vec<SetConstraint<E, D>>,
        config: ValidationConfig,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<SetInner<E, D>>| {
            let core = CollectionCore::new(constraints, config, |index| {
                let this = this.clone();
                let sink: EventSink<AHashSet<E>, D> = Box::new(move |event| {
                    if let Some(inner) = this.upgrade() {
                        inner.on_validator_event(index, event);
                    }
                });
                sink
            });
            let initial = if core.starts_committed() {
                source.snapshot()
            } else {
                AHashSet::new()
            };
            SetInner {
                this: this.clone(),
                source: source.clone(),
                core,
                elements: RefCell::new(AHashMap::new()),
                constrained: DeferredSet::new(initial),
            }
        });

        let adopted = inner.core.adopt_initial();
        let committed = inner.core.starts_committed();
        let mut elements = AHashMap::new();
        for item in inner.source.snapshot() {
            if !committed {
                inner.constrained.record_added(item.clone());
            }
            let element = inner.new_element(item.clone(), adopted);
            elements.insert(item, element);
        }
        *inner.elements.borrow_mut() = elements;

        SetInner::attach(&inner);
        if config.validates_on_construction() {
            inner.core.engine.epoch(&*inner, || {
                inner.core.validators.validate_all(&inner.source.snapshot());
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

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticList<D> {
        self.inner.core.engine.diagnostics().clone()
    }

    /// The last set contents that passed every constraint.
    #[must_use]
    pub fn constrained_value(&self) -> DeferredSet<E> {
        self.inner.constrained.clone()
    }

    /// Members in no particular order.
    #[must_use]
    pub fn elements(&self) -> Vec<ConstrainedElement<E, D>> {
        self.inner.all_elements()
    }

    #[must_use]
    pub fn element(&self, item: &E) -> Option<ConstrainedElement<E, D>> {
        self.inner.elements.borrow().get(item).cloned()
    }

    pub fn subscribe_changes(&self, callback: impl Fn(&ValidationChange) + 'static) -> Subscription {
        self.inner.core.engine.subscribe_changes(callback)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
