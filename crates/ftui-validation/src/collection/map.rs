#![forbid(unsafe_code)]

//! Validation of an [`ObservableMap`]. Element constraints validate values;
//! the element for a key is replaced whenever its value changes.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use super::CollectionCore;
use crate::config::ValidationConfig;
use crate::constraint::MapConstraint;
use crate::deferred::DeferredMap;
use crate::diagnostics::DiagnosticList;
use crate::element::{ConstrainedElement, ElementParent};
use crate::engine::{Epoch, ValidationChange, ValidatorState};
use crate::reactive::{DependencyId, MapEvent, ObservableMap, ReadOnly, Subscription};
use crate::result::ValidationState;
use crate::serialized::ValidatorEvent;
use crate::validators::EventSink;

struct MapInner<K: Eq + Hash, V, D> {
    this: Weak<MapInner<K, V, D>>,
    source: ObservableMap<K, V>,
    core: CollectionCore<AHashMap<K, V>, V, D>,
    elements: RefCell<AHashMap<K, ConstrainedElement<V, D>>>,
    constrained: DeferredMap<K, V>,
}

impl<K, V, D> Epoch for MapInner<K, V, D>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
    D: Clone + 'static,
{
    fn fold(&self) -> ValidationState {
        let elements = self.elements.borrow();
        self.core.fold(elements.values().map(ConstrainedElement::state))
    }

    fn commit(&self) {
        if self.constrained.apply() {
            tracing::debug!(message = "validation.commit", kind = "map", len = self.constrained.len());
        }
    }
}

impl<K, V, D> ElementParent<D> for MapInner<K, V, D>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
    D: Clone + 'static,
{
    fn element_changed(&self, state: ValidatorState, intermediate: bool) {
        self.core.engine.notify(self, state, intermediate);
    }
}

impl<K, V, D> MapInner<K, V, D>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
    D: Clone + 'static,
{
    fn new_element(&self, value: V, initial: ValidationState) -> ConstrainedElement<V, D> {
        let parent: Weak<dyn ElementParent<D>> = self.this.clone();
        ConstrainedElement::new(value, &self.core.element_constraints, initial, parent)
    }

    fn all_elements(&self) -> Vec<ConstrainedElement<V, D>> {
        self.elements.borrow().values().cloned().collect()
    }

    fn on_validator_event(&self, index: usize, event: ValidatorEvent<AHashMap<K, V>, D>) {
        self.core
            .validators
            .route(&self.core.engine, self, index, event, |_| {});
    }

    fn on_source_event(&self, event: &MapEvent<K, V>) {
        self.core.engine.epoch(self, || {
            self.core.validators.validate_all(&self.source.snapshot());

            let mut fresh = Vec::new();
            let mut stale = Vec::new();
            {
                let mut elements = self.elements.borrow_mut();
                for (key, _) in &event.removed {
                    self.constrained.record_removed(key.clone());
                    stale.extend(elements.remove(key));
                }
                for (key, value) in &event.added {
                    self.constrained.record_inserted(key.clone(), value.clone());
                    let element = self.new_element(value.clone(), ValidationState::Unknown);
                    fresh.push(element.clone());
                    stale.extend(elements.insert(key.clone(), element));
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

/// Validates an [`ObservableMap`] as a whole and value by value.
pub struct MapValidationHelper<K: Eq + Hash, V, D> {
    inner: Rc<MapInner<K, V, D>>,
}

impl<K: Eq + Hash, V, D> Clone for MapValidationHelper<K, V, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, V, D> MapValidationHelper<K, V, D>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
    D: Clone + 'static,
{
    pub fn new(source: &ObservableMap<K, V>, constraints: Vec<MapConstraint<K, V, D>>) -> Self {
        Self::with_config(source, constraints, ValidationConfig::default())
    }

    pub fn with_config(
        source: &ObservableMap<K, V>,
        constraints: Vec<MapConstraint<K, V, D>>,
        config: ValidationConfig,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<MapInner<K, V, D>>| {
            let core = CollectionCore::new(constraints, config, |index| {
                let this = this.clone();
                let sink: EventSink<AHashMap<K, V>, D> = Box::new(move |event| {
                    if let Some(inner) = this.upgrade() {
                        inner.on_validator_event(index, event);
                    }
                });
                sink
            });
            let initial = if core.starts_committed() {
                source.snapshot()
            } else {
                AHashMap::new()
            };
            MapInner {
                this: this.clone(),
                source: source.clone(),
                core,
                elements: RefCell::new(AHashMap::new()),
                constrained: DeferredMap::new(initial),
            }
        });

        let adopted = inner.core.adopt_initial();
        let committed = inner.core.starts_committed();
        let mut elements = AHashMap::new();
        for (key, value) in inner.source.snapshot() {
            if !committed {
                inner.constrained.record_inserted(key.clone(), value.clone());
            }
            let element = inner.new_element(value, adopted);
            elements.insert(key, element);
        }
        *inner.elements.borrow_mut() = elements;

        MapInner::attach(&inner);
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

    /// The last map contents that passed every constraint.
    #[must_use]
    pub fn constrained_value(&self) -> DeferredMap<K, V> {
        self.inner.constrained.clone()
    }

    #[must_use]
    pub fn elements(&self) -> Vec<ConstrainedElement<V, D>> {
        self.inner.all_elements()
    }

    /// The element validating the value currently stored under `key`.
    #[must_use]
    pub fn element(&self, key: &K) -> Option<ConstrainedElement<V, D>> {
        self.inner.elements.borrow().get(key).cloned()
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
    use crate::reactive::Observable;
    use crate::result::ValidationResult;

    fn positive() -> MapConstraint<&'static str, i32, &'static str> {
        CollectionConstraint::Element(Constraint::immediate(|v: &i32| {
            if *v > 0 {
                ValidationResult::valid()
            } else {
                ValidationResult::invalid_with("not positive")
            }
        }))
    }

    fn entries(items: &[(&'static str, i32)]) -> AHashMap<&'static str, i32> {
        items.iter().copied().collect()
    }

    #[test]
    fn overwrite_replaces_element_and_commits_new_value() {
        let source = ObservableMap::new(entries(&[("a", 1)]));
        let helper = MapValidationHelper::new(&source, vec![positive()]);
        let first = helper.element(&"a").expect("element a");

        source.insert("a", -1);
        assert!(first.is_disposed());
        assert!(helper.is_invalid());
        assert_eq!(helper.constrained_value().get(&"a"), Some(1));

        source.insert("a", 2);
        assert!(helper.is_valid());
        assert_eq!(helper.constrained_value().get(&"a"), Some(2));
    }

    #[test]
    fn element_dependency_revalidates_every_value() {
        let floor = Observable::new(0);
        let f = floor.clone();
        let above: MapConstraint<&'static str, i32, &'static str> = CollectionConstraint::Element(
            Constraint::immediate(move |v: &i32| ValidationResult::check(*v > f.get()))
                .depends_on(floor.as_dependency()),
        );
        let source = ObservableMap::new(entries(&[("a", 1), ("b", 5)]));
        let helper = MapValidationHelper::new(&source, vec![above]);
        assert!(helper.is_valid());

        floor.set(3);
        assert!(helper.is_invalid());
        assert!(helper.element(&"a").is_some_and(|e| e.is_invalid()));
        assert!(helper.element(&"b").is_some_and(|e| e.is_valid()));

        source.remove(&"a");
        assert!(helper.is_valid());
        assert_eq!(helper.constrained_value().snapshot(), entries(&[("b", 5)]));
    }
}
