#![forbid(unsafe_code)]

//! Constraint descriptions.
//!
//! A [`Constraint`] bundles a validation routine with the extra inputs it
//! reads (its dependencies) and, for asynchronous routines, the
//! [`Dispatcher`] its completions are delivered on.

use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::reactive::{Dependency, DependencyId};
use crate::result::ValidationResult;
use crate::task::{Dispatcher, ValidationTask};

/// A validation routine plus the context it runs in.
///
/// Cloning is cheap and shares the routine.
pub struct Constraint<T, D> {
    routine: Rc<dyn Fn(&T) -> ValidationTask<D>>,
    dependencies: Vec<Dependency>,
    completion: Option<Dispatcher>,
    name: Option<Rc<str>>,
}

impl<T, D> Clone for Constraint<T, D> {
    fn clone(&self) -> Self {
        Self {
            routine: Rc::clone(&self.routine),
            dependencies: self.dependencies.clone(),
            completion: self.completion.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T, D> fmt::Debug for Constraint<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("name", &self.name())
            .field("dependencies", &self.dependencies)
            .field("async", &self.completion.is_some())
            .finish()
    }
}

impl<T: 'static, D: 'static> Constraint<T, D> {
    /// Constraint backed by a routine that may resolve later.
    pub fn new(routine: impl Fn(&T) -> ValidationTask<D> + 'static) -> Self {
        Self {
            routine: Rc::new(routine),
            dependencies: Vec::new(),
            completion: None,
            name: None,
        }
    }

    /// Constraint whose routine always answers immediately.
    pub fn immediate(check: impl Fn(&T) -> ValidationResult<D> + 'static) -> Self {
        Self::new(move |value| ValidationTask::ready(check(value)))
    }

    /// Revalidate whenever `dependency` changes.
    #[must_use]
    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        if !self.declares(dependency.id()) {
            self.dependencies.push(dependency);
        }
        self
    }

    /// Deliver asynchronous completions on `dispatcher`.
    #[must_use]
    pub fn complete_on(mut self, dispatcher: &Dispatcher) -> Self {
        self.completion = Some(dispatcher.clone());
        self
    }

    /// Label used in logs.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(Rc::from(name));
        self
    }
}

impl<T, D> Constraint<T, D> {
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    #[must_use]
    pub fn declares(&self, id: DependencyId) -> bool {
        self.dependencies.iter().any(|dep| dep.id() == id)
    }

    pub(crate) fn completion(&self) -> Option<&Dispatcher> {
        self.completion.as_ref()
    }

    pub(crate) fn run(&self, value: &T) -> ValidationTask<D> {
        (self.routine)(value)
    }
}

/// Constraint on a collection: either on the collection as a whole, or on
/// each element individually.
pub enum CollectionConstraint<C, E, D> {
    Collection(Constraint<C, D>),
    Element(Constraint<E, D>),
}

impl<C, E, D> Clone for CollectionConstraint<C, E, D> {
    fn clone(&self) -> Self {
        match self {
            Self::Collection(c) => Self::Collection(c.clone()),
            Self::Element(c) => Self::Element(c.clone()),
        }
    }
}

impl<C, E, D> fmt::Debug for CollectionConstraint<C, E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection(c) => f.debug_tuple("Collection").field(c).finish(),
            Self::Element(c) => f.debug_tuple("Element").field(c).finish(),
        }
    }
}

impl<C, E, D> CollectionConstraint<C, E, D> {
    /// Split into whole-collection and per-element constraints, keeping
    /// declaration order within each kind.
    pub(crate) fn partition(all: Vec<Self>) -> (Vec<Constraint<C, D>>, Vec<Constraint<E, D>>) {
        let mut whole = Vec::new();
        let mut each = Vec::new();
        for constraint in all {
            match constraint {
                Self::Collection(c) => whole.push(c),
                Self::Element(c) => each.push(c),
            }
        }
        (whole, each)
    }
}

impl<C: 'static, E: 'static, D: 'static> CollectionConstraint<C, E, D> {
    pub fn collection(routine: impl Fn(&C) -> ValidationTask<D> + 'static) -> Self {
        Self::Collection(Constraint::new(routine))
    }

    pub fn element(routine: impl Fn(&E) -> ValidationTask<D> + 'static) -> Self {
        Self::Element(Constraint::new(routine))
    }
}

/// Constraints on an ordered list.
pub type ListConstraint<E, D> = CollectionConstraint<Vec<E>, E, D>;

/// Constraints on a set.
pub type SetConstraint<E, D> = CollectionConstraint<AHashSet<E>, E, D>;

/// Constraints on a map. Element constraints see each value.
pub type MapConstraint<K, V, D> = CollectionConstraint<AHashMap<K, V>, V, D>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observable;

    #[test]
    fn dependencies_are_deduplicated() {
        let other = Observable::new(1);
        let constraint = Constraint::<i32, ()>::immediate(|v| ValidationResult::check(*v > 0))
            .depends_on(other.as_dependency())
            .depends_on(other.clone().as_dependency());
        assert_eq!(constraint.dependencies().len(), 1);
        assert!(constraint.declares(other.as_dependency().id()));
    }

    #[test]
    fn partition_keeps_declaration_order() {
        let all: Vec<ListConstraint<i32, ()>> = vec![
            CollectionConstraint::element(|_| ValidationTask::none()),
            CollectionConstraint::Collection(Constraint::immediate(|_| ValidationResult::valid()).named("a")),
            CollectionConstraint::Collection(Constraint::immediate(|_| ValidationResult::valid()).named("b")),
        ];
        let (whole, each) = CollectionConstraint::partition(all);
        assert_eq!(whole.iter().map(Constraint::name).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(each.len(), 1);
        assert_eq!(each[0].name(), "<anonymous>");
    }
}
