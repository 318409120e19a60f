#![forbid(unsafe_code)]

//! Validation state machine shared by every helper and element.
//!
//! The engine keeps the published flags (`valid`, `invalid`, `validating`),
//! counts validator runs in flight, and decides when to fold the owner's
//! per-slot results into a new state and when to commit the constrained
//! value.
//!
//! # Epochs
//!
//! A source change opens a *quiescent* bracket. Inside it, validators start
//! and (if synchronous) finish, but nothing is published: no flag change
//! fires and the constrained value is not committed. Closing the bracket
//! folds once, commits if the fold is valid and nothing is in flight, and
//! then fires the net flag changes. Asynchronous completions arriving later
//! run outside any bracket and publish immediately.
//!
//! # Invariants
//!
//! 1. `validating` is set iff at least one validator run is in flight.
//! 2. `valid` and `invalid` are never both set.
//! 3. Commit only happens outside a quiescent bracket and only when the fold
//!    is `Valid` with nothing in flight, so the constrained value changes at
//!    most once per epoch.
//! 4. Flag changes fire only when the flag actually changed.
//!
//! # Failure Modes
//!
//! - **Reentrant update** (a commit listener mutates a source synchronously):
//!   fatal, via [`UsageError::ReentrantUpdate`].
//! - **Completion without a start**: fatal, via
//!   [`UsageError::UnbalancedCompletion`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::diagnostics::DiagnosticList;
use crate::error::{OrRaise, Result, UsageError};
use crate::reactive::observable::live_listeners;
use crate::reactive::{Observable, ReadOnly, Subscription};
use crate::result::ValidationState;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct ValidationFlags: u8 {
        const VALID = 1;
        const INVALID = 1 << 1;
        const VALIDATING = 1 << 2;
    }
}

impl ValidationFlags {
    fn settled(state: ValidationState) -> Self {
        match state {
            ValidationState::Valid => Self::VALID,
            ValidationState::Invalid => Self::INVALID,
            ValidationState::Unknown => Self::empty(),
        }
    }
}

/// Lifecycle transition reported by one validator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValidatorState {
    Started,
    Succeeded,
    Failed,
    Cancelled,
}

/// The owner of an engine: knows how to fold its slots and commit its value.
pub(crate) trait Epoch {
    fn fold(&self) -> ValidationState;
    fn commit(&self);
}

/// Which published flag changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Valid,
    Invalid,
    Validating,
}

/// A published flag transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidationChange {
    pub kind: ChangeKind,
    pub old: bool,
    pub new: bool,
}

struct UpdateGuard<'a>(&'a Cell<bool>);

impl<'a> UpdateGuard<'a> {
    #[track_caller]
    fn enter(flag: &'a Cell<bool>) -> Self {
        if flag.replace(true) {
            UsageError::ReentrantUpdate.raise();
        }
        Self(flag)
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub(crate) struct ValidationEngine<D> {
    flags: Cell<ValidationFlags>,
    running: Cell<usize>,
    quiescent: Cell<bool>,
    updating: Cell<bool>,
    diagnostics: DiagnosticList<D>,
    valid: Observable<bool>,
    invalid: Observable<bool>,
    validating: Observable<bool>,
    listeners: RefCell<Vec<Weak<dyn Fn(&ValidationChange)>>>,
}

impl<D: Clone + 'static> ValidationEngine<D> {
    /// An engine with no constraints is trivially valid, whatever the
    /// requested initial state.
    pub(crate) fn new(initial: ValidationState, has_constraints: bool) -> Self {
        let initial = if has_constraints {
            initial
        } else {
            ValidationState::Valid
        };
        let flags = ValidationFlags::settled(initial);
        Self {
            flags: Cell::new(flags),
            running: Cell::new(0),
            quiescent: Cell::new(false),
            updating: Cell::new(false),
            diagnostics: DiagnosticList::new(),
            valid: Observable::new(flags.contains(ValidationFlags::VALID)),
            invalid: Observable::new(flags.contains(ValidationFlags::INVALID)),
            validating: Observable::new(false),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn state(&self) -> ValidationState {
        let flags = self.flags.get();
        if flags.contains(ValidationFlags::INVALID) {
            ValidationState::Invalid
        } else if flags.contains(ValidationFlags::VALID) {
            ValidationState::Valid
        } else {
            ValidationState::Unknown
        }
    }

    pub(crate) fn is_validating(&self) -> bool {
        self.flags.get().contains(ValidationFlags::VALIDATING)
    }

    pub(crate) fn running(&self) -> usize {
        self.running.get()
    }

    pub(crate) fn diagnostics(&self) -> &DiagnosticList<D> {
        &self.diagnostics
    }

    pub(crate) fn valid_property(&self) -> ReadOnly<bool> {
        self.valid.read_only()
    }

    pub(crate) fn invalid_property(&self) -> ReadOnly<bool> {
        self.invalid.read_only()
    }

    pub(crate) fn validating_property(&self) -> ReadOnly<bool> {
        self.validating.read_only()
    }

    pub(crate) fn subscribe_changes(&self, callback: impl Fn(&ValidationChange) + 'static) -> Subscription {
        let strong: Rc<dyn Fn(&ValidationChange)> = Rc::new(callback);
        self.listeners.borrow_mut().push(Rc::downgrade(&strong));
        Subscription::new(strong)
    }

    /// Apply one validator transition.
    pub(crate) fn notify(&self, owner: &dyn Epoch, state: ValidatorState, intermediate: bool) {
        let fire = {
            let _guard = UpdateGuard::enter(&self.updating);
            let quiescent = self.quiescent.get();
            match state {
                ValidatorState::Started => {
                    let before = self.running.get();
                    self.running.set(before + 1);
                    if before == 0 {
                        self.flags.set(ValidationFlags::VALIDATING);
                    }
                    !quiescent
                }
                ValidatorState::Succeeded => {
                    if self.finish_run() > 0 || intermediate {
                        false
                    } else {
                        let folded = owner.fold();
                        self.flags.set(ValidationFlags::settled(folded));
                        if folded == ValidationState::Valid && !quiescent {
                            owner.commit();
                        }
                        !quiescent
                    }
                }
                ValidatorState::Failed => {
                    let remaining = self.finish_run();
                    let mut flags = ValidationFlags::INVALID;
                    flags.set(ValidationFlags::VALIDATING, remaining > 0);
                    self.flags.set(flags);
                    !intermediate && !quiescent
                }
                ValidatorState::Cancelled => {
                    if self.finish_run() > 0 {
                        false
                    } else if intermediate {
                        self.flags.set(self.flags.get() - ValidationFlags::VALIDATING);
                        false
                    } else {
                        // The cancelled slot holds no result; the others still count.
                        let folded = owner.fold();
                        self.flags.set(ValidationFlags::settled(folded));
                        if folded == ValidationState::Valid && !quiescent {
                            owner.commit();
                        }
                        !quiescent
                    }
                }
            }
        };
        if fire {
            self.fire();
        }
    }

    pub(crate) fn begin_quiescence(&self) -> Result<()> {
        if self.quiescent.replace(true) {
            return Err(UsageError::NestedQuiescence);
        }
        self.diagnostics.begin_batch()
    }

    /// Close the bracket: settle, commit if possible, then publish.
    pub(crate) fn end_quiescence(&self, owner: &dyn Epoch) -> Result<()> {
        if !self.quiescent.replace(false) {
            return Err(UsageError::QuiescenceNotActive);
        }
        {
            let _guard = UpdateGuard::enter(&self.updating);
            if self.running.get() == 0 {
                let folded = owner.fold();
                self.flags.set(ValidationFlags::settled(folded));
                if folded == ValidationState::Valid {
                    owner.commit();
                }
            }
        }
        self.diagnostics.end_batch()?;
        self.fire();
        Ok(())
    }

    /// Run `body` inside a quiescent bracket.
    #[track_caller]
    pub(crate) fn epoch(&self, owner: &dyn Epoch, body: impl FnOnce()) {
        if self.updating.get() {
            UsageError::ReentrantUpdate.raise();
        }
        self.begin_quiescence().or_raise();
        body();
        self.end_quiescence(owner).or_raise();
    }

    fn finish_run(&self) -> usize {
        let running = self.running.get();
        if running == 0 {
            UsageError::UnbalancedCompletion.raise();
        }
        self.running.set(running - 1);
        running - 1
    }

    /// Publish every flag whose value differs from what readers last saw.
    ///
    /// Changes fire in the order `Valid`, `Invalid`, `Validating`.
    fn fire(&self) {
        let flags = self.flags.get();
        let published = [
            (ChangeKind::Valid, &self.valid, ValidationFlags::VALID),
            (ChangeKind::Invalid, &self.invalid, ValidationFlags::INVALID),
            (ChangeKind::Validating, &self.validating, ValidationFlags::VALIDATING),
        ];
        for (kind, property, flag) in published {
            let new = flags.contains(flag);
            let old = property.get();
            if old == new {
                continue;
            }
            property.set(new);
            let change = ValidationChange { kind, old, new };
            let listeners = live_listeners(&mut *self.listeners.borrow_mut());
            for listener in listeners {
                listener(&change);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
