#![forbid(unsafe_code)]

//! Validation of a single observable value.
//!
//! [`ValidationHelper`] watches a source [`Observable`], runs every
//! constraint on each new value, publishes the tri-state result and
//! diagnostics, and exposes a *constrained value* that only advances to
//! values that passed every constraint.
//!
//! # Example
//!
//! ```
//! use ftui_validation::{Constraint, Observable, ValidationHelper, ValidationResult};
//!
//! let name = Observable::new(String::from("ok"));
//! let helper = ValidationHelper::new(
//!     &name,
//!     vec![Constraint::immediate(|s: &String| {
//!         if s.is_empty() {
//!             ValidationResult::invalid_with("required")
//!         } else {
//!             ValidationResult::valid()
//!         }
//!     })],
//! );
//! assert!(helper.is_valid());
//!
//! name.set(String::new());
//! assert!(helper.is_invalid());
//! assert_eq!(helper.constrained_value().get(), "ok");
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::config::ValidationConfig;
use crate::constraint::Constraint;
use crate::deferred::DeferredValue;
use crate::diagnostics::DiagnosticList;
use crate::engine::{Epoch, ValidationChange, ValidationEngine};
use crate::reactive::{DependencyId, Observable, ReadOnly, Subscription};
use crate::result::ValidationState;
use crate::serialized::ValidatorEvent;
use crate::validators::{EventSink, ValidatorSet};

/// What opened an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    Source,
    Dependency(DependencyId),
}

struct ScalarInner<T, D> {
    source: Observable<T>,
    engine: ValidationEngine<D>,
    validators: ValidatorSet<T, D>,
    constrained: DeferredValue<T>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl<T: Clone + PartialEq + 'static, D: Clone + 'static> Epoch for ScalarInner<T, D> {
    fn fold(&self) -> ValidationState {
        self.validators.fold()
    }

    fn commit(&self) {
        if self.constrained.apply() {
            tracing::debug!(message = "validation.commit", kind = "value");
        }
    }
}

impl<T: Clone + PartialEq + 'static, D: Clone + 'static> ScalarInner<T, D> {
    fn on_event(&self, index: usize, event: ValidatorEvent<T, D>) {
        let constrained = &self.constrained;
        self.validators
            .route(&self.engine, self, index, event, |value| constrained.store(value));
    }

    fn invalidated(&self, trigger: Trigger) {
        self.engine.epoch(self, || {
            let value = self.source.get();
            if self.validators.is_empty() {
                self.constrained.store(value);
                return;
            }
            match trigger {
                Trigger::Source => self.validators.validate_all(&value),
                Trigger::Dependency(id) => self.validators.validate_dependents(id, &value),
            }
        });
    }

    fn attach(this: &Rc<Self>) {
        let mut subscriptions = Vec::new();
        let weak = Rc::downgrade(this);
        subscriptions.push(this.source.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.invalidated(Trigger::Source);
            }
        }));
        for dependency in this.validators.dependencies() {
            let weak = Rc::downgrade(this);
            let id = dependency.id();
            subscriptions.push(dependency.subscribe(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.invalidated(Trigger::Dependency(id));
                }
            }));
        }
        *this.subscriptions.borrow_mut() = subscriptions;
    }
}

/// Validates an [`Observable`] against a list of constraints.
///
/// Cloning shares the helper; it detaches from its sources when the last
/// handle is dropped.
pub struct ValidationHelper<T, D> {
    inner: Rc<ScalarInner<T, D>>,
}

impl<T, D> Clone for ValidationHelper<T, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static, D: Clone + 'static> fmt::Debug for ValidationHelper<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationHelper")
            .field("state", &self.inner.engine.state())
            .field("validating", &self.inner.engine.is_validating())
            .field("constrained", &self.inner.constrained.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static, D: Clone + 'static> ValidationHelper<T, D> {
    pub fn new(source: &Observable<T>, constraints: Vec<Constraint<T, D>>) -> Self {
        Self::with_config(source, constraints, ValidationConfig::default())
    }

    pub fn with_config(
        source: &Observable<T>,
        constraints: Vec<Constraint<T, D>>,
        config: ValidationConfig,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<ScalarInner<T, D>>| {
            let validators = ValidatorSet::new(constraints, |index| {
                let this = this.clone();
                let sink: EventSink<T, D> = Box::new(move |event| {
                    if let Some(inner) = this.upgrade() {
                        inner.on_event(index, event);
                    }
                });
                sink
            });
            ScalarInner {
                source: source.clone(),
                engine: ValidationEngine::new(config.initial_state, !validators.is_empty()),
                constrained: DeferredValue::new(source.get()),
                validators,
                subscriptions: RefCell::new(Vec::new()),
            }
        });
        ScalarInner::attach(&inner);
        if config.validates_on_construction() {
            inner.invalidated(Trigger::Source);
        }
        Self { inner }
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

    /// Diagnostics indexed by constraint position.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticList<D> {
        self.inner.engine.diagnostics().clone()
    }

    /// The last value that passed every constraint.
    #[must_use]
    pub fn constrained_value(&self) -> DeferredValue<T> {
        self.inner.constrained.clone()
    }

    pub fn subscribe_changes(&self, callback: impl Fn(&ValidationChange) + 'static) -> Subscription {
        self.inner.engine.subscribe_changes(callback)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
