#![forbid(unsafe_code)]

//! Single-flight execution of one constraint.
//!
//! A [`SerializedValidator`] runs its constraint on at most one value at a
//! time. Requests that arrive while a run is in flight coalesce into a single
//! trailing request holding the newest value, and the in-flight run is asked
//! to cancel. When the in-flight run finishes with a trailing request queued,
//! its completion is reported as *intermediate* (with no result) and the
//! trailing value starts immediately.
//!
//! # Invariants
//!
//! 1. At most one run is in flight.
//! 2. Every `Started` event is followed by exactly one `Completed` event,
//!    unless the validator is disposed first.
//! 3. The last value requested is always eventually validated (given the
//!    routine terminates), and it is the last `Completed` reported.
//!
//! # Failure Modes
//!
//! - **Routine panics**: caught, logged as a constraint defect, and reported
//!   as a completion without a result.
//! - **Routine fails or the completer is dropped**: same as a panic.
//! - **Pending task without a dispatcher**: logged as a defect; the
//!   completion is reported without a result.
//! - **Completion after dispose**: swallowed.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use crate::constraint::Constraint;
use crate::result::ValidationResult;
use crate::task::{CancelHandle, Outcome, Registration, TaskKind, ValidationTask};

/// Lifecycle notification from a [`SerializedValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorEvent<T, D> {
    Started,
    Completed {
        value: T,
        result: Option<ValidationResult<D>>,
        /// A newer value is queued behind this completion.
        intermediate: bool,
    },
}

struct InFlight<T> {
    value: T,
    cancel: CancelHandle,
}

struct SerialState<T> {
    in_flight: Option<InFlight<T>>,
    next: Option<T>,
    disposed: bool,
    generation: u64,
}

struct SerialInner<T, D> {
    constraint: Constraint<T, D>,
    sink: Box<dyn Fn(ValidatorEvent<T, D>)>,
    state: RefCell<SerialState<T>>,
}

/// Runs one constraint with at-most-one-in-flight and trailing-value
/// coalescing.
pub struct SerializedValidator<T, D> {
    inner: Rc<SerialInner<T, D>>,
}

impl<T, D> Clone for SerializedValidator<T, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, D> fmt::Debug for SerializedValidator<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("SerializedValidator")
            .field("constraint", &self.inner.constraint.name())
            .field("running", &state.in_flight.is_some())
            .field("queued", &state.next.is_some())
            .field("disposed", &state.disposed)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T: 'static, D: 'static> SerializedValidator<T, D> {
    /// `sink` receives every lifecycle event, synchronously.
    pub fn new(constraint: Constraint<T, D>, sink: impl Fn(ValidatorEvent<T, D>) + 'static) -> Self {
        Self {
            inner: Rc::new(SerialInner {
                constraint,
                sink: Box::new(sink),
                state: RefCell::new(SerialState {
                    in_flight: None,
                    next: None,
                    disposed: false,
                    generation: 0,
                }),
            }),
        }
    }

    #[must_use]
    pub fn constraint(&self) -> &Constraint<T, D> {
        &self.inner.constraint
    }

    /// Validate `value`, or queue it behind the in-flight run.
    pub fn validate(&self, value: T) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return;
            }
            if let Some(run) = &state.in_flight {
                run.cancel.request();
                let replaced = state.next.replace(value).is_some();
                tracing::trace!(
                    message = "validation.coalesce",
                    constraint = self.inner.constraint.name(),
                    replaced
                );
                return;
            }
        }
        self.start(value);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().in_flight.is_some()
    }

    #[must_use]
    pub fn has_queued(&self) -> bool {
        self.inner.state.borrow().next.is_some()
    }

    /// Drop any queued value, cancel the in-flight run, and ignore its
    /// eventual completion.
    pub fn dispose(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.disposed = true;
        state.next = None;
        if let Some(run) = &state.in_flight {
            run.cancel.request();
        }
    }

    fn start(&self, value: T) {
        self.inner.state.borrow_mut().generation += 1;
        (self.inner.sink)(ValidatorEvent::Started);

        let constraint = &self.inner.constraint;
        let task = match catch_unwind(AssertUnwindSafe(|| constraint.run(&value))) {
            Ok(task) => task,
            Err(payload) => ValidationTask::failed(format!("panicked: {}", panic_message(&*payload))),
        };
        match task.kind {
            TaskKind::Ready(result) => self.emit(value, result, false),
            TaskKind::Failed(reason) => {
                self.defect(&reason);
                self.emit(value, None, false);
            }
            TaskKind::Pending(pending) => {
                let Some(dispatcher) = constraint.completion() else {
                    // Without a dispatcher only an already-resolved task can
                    // be honored.
                    let result = match pending.try_take() {
                        Some(outcome) => self.resolve(outcome),
                        None => {
                            self.defect("pending result without a completion dispatcher");
                            None
                        }
                    };
                    self.emit(value, result, false);
                    return;
                };
                let weak: Weak<SerialInner<T, D>> = Rc::downgrade(&self.inner);
                let registration = pending.register(dispatcher, move |outcome| {
                    if let Some(inner) = weak.upgrade() {
                        SerializedValidator { inner }.finish(outcome);
                    }
                });
                match registration {
                    Registration::Resolved(outcome) => {
                        let result = self.resolve(outcome);
                        self.emit(value, result, false);
                    }
                    Registration::Scheduled(cancel) => {
                        let mut state = self.inner.state.borrow_mut();
                        if state.disposed {
                            cancel.request();
                        }
                        state.in_flight = Some(InFlight { value, cancel });
                    }
                }
            }
        }
    }

    fn finish(&self, outcome: Outcome<D>) {
        let (run, next) = {
            let mut state = self.inner.state.borrow_mut();
            let run = state.in_flight.take();
            if state.disposed {
                return;
            }
            (run, state.next.take())
        };
        let Some(run) = run else {
            return;
        };
        let intermediate = next.is_some();
        let result = if intermediate {
            if let Outcome::Failed(reason) = &outcome {
                self.defect(reason);
            }
            None
        } else {
            self.resolve(outcome)
        };
        let generation = self.inner.state.borrow().generation;
        self.emit(run.value, result, intermediate);
        if let Some(value) = next {
            if self.inner.state.borrow().generation == generation {
                self.validate(value);
            } else {
                // A listener already started a newer run from inside the
                // completion; the queued value is older than that one.
                tracing::trace!(
                    message = "validation.coalesce",
                    constraint = self.inner.constraint.name(),
                    superseded = true
                );
            }
        }
    }

    fn resolve(&self, outcome: Outcome<D>) -> Option<ValidationResult<D>> {
        match outcome {
            Outcome::Completed(result) => result,
            Outcome::Cancelled => None,
            Outcome::Failed(reason) => {
                self.defect(&reason);
                None
            }
        }
    }

    fn emit(&self, value: T, result: Option<ValidationResult<D>>, intermediate: bool) {
        (self.inner.sink)(ValidatorEvent::Completed {
            value,
            result,
            intermediate,
        });
    }

    fn defect(&self, reason: &str) {
        tracing::error!(
            message = "validation.defect",
            constraint = self.inner.constraint.name(),
            reason
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Completer, Dispatcher};

    type Log = Rc<RefCell<Vec<ValidatorEvent<u32, &'static str>>>>;

    fn recording(constraint: Constraint<u32, &'static str>) -> (SerializedValidator<u32, &'static str>, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        let validator = SerializedValidator::new(constraint, move |event| l.borrow_mut().push(event));
        (validator, log)
    }

    /// Constraint whose runs are resolved manually through the returned queue.
    fn manual(
        dispatcher: &Dispatcher,
    ) -> (Constraint<u32, &'static str>, Rc<RefCell<Vec<(u32, Completer<&'static str>)>>>) {
        let pending = Rc::new(RefCell::new(Vec::new()));
        let p = Rc::clone(&pending);
        let constraint = Constraint::new(move |value: &u32| {
            let (task, completer) = ValidationTask::pending();
            p.borrow_mut().push((*value, completer));
            task
        })
        .complete_on(dispatcher);
        (constraint, pending)
    }

    fn completed(value: u32, valid: Option<bool>, intermediate: bool) -> ValidatorEvent<u32, &'static str> {
        ValidatorEvent::Completed {
            value,
            result: valid.map(ValidationResult::check),
            intermediate,
        }
    }

    #[test]
    fn synchronous_run_reports_start_then_completion() {
        let (validator, log) = recording(Constraint::immediate(|v: &u32| ValidationResult::check(*v < 10)));
        validator.validate(3);
        validator.validate(30);
        assert_eq!(
            *log.borrow(),
            vec![
                ValidatorEvent::Started,
                completed(3, Some(true), false),
                ValidatorEvent::Started,
                completed(30, Some(false), false),
            ]
        );
    }

    #[test]
    fn burst_coalesces_to_trailing_value() {
        let dispatcher = Dispatcher::new();
        let (constraint, pending) = manual(&dispatcher);
        let (validator, log) = recording(constraint);

        for value in 1..=5 {
            validator.validate(value);
        }
        assert!(validator.is_running());
        assert!(validator.has_queued());
        assert_eq!(pending.borrow().len(), 1);

        let (first, completer) = pending.borrow_mut().remove(0);
        assert_eq!(first, 1);
        assert!(completer.is_cancellation_requested());
        completer.complete(ValidationResult::valid());
        dispatcher.run_pending();

        let (second, completer) = pending.borrow_mut().remove(0);
        assert_eq!(second, 5);
        completer.complete(ValidationResult::valid());
        dispatcher.run_pending();

        assert_eq!(
            *log.borrow(),
            vec![
                ValidatorEvent::Started,
                completed(1, None, true),
                ValidatorEvent::Started,
                completed(5, Some(true), false),
            ]
        );
        assert!(!validator.is_running());
    }

    #[test]
    fn panicking_routine_completes_without_result() {
        let (validator, log) = recording(Constraint::new(|v: &u32| {
            if *v == 0 {
                panic!("zero");
            }
            ValidationTask::ready(ValidationResult::valid())
        }));
        validator.validate(0);
        validator.validate(1);
        assert_eq!(
            *log.borrow(),
            vec![
                ValidatorEvent::Started,
                completed(0, None, false),
                ValidatorEvent::Started,
                completed(1, Some(true), false),
            ]
        );
    }

    #[test]
    fn pending_without_dispatcher_is_a_defect() {
        let keep = Rc::new(RefCell::new(Vec::new()));
        let k = Rc::clone(&keep);
        let (validator, log) = recording(Constraint::new(move |_: &u32| {
            let (task, completer) = ValidationTask::pending();
            k.borrow_mut().push(completer);
            task
        }));
        validator.validate(7);
        assert_eq!(*log.borrow(), vec![ValidatorEvent::Started, completed(7, None, false)]);
        assert!(!validator.is_running());
    }

    #[test]
    fn resolved_pending_without_dispatcher_is_synchronous() {
        let (validator, log) = recording(Constraint::new(|_: &u32| {
            let (task, completer) = ValidationTask::pending();
            completer.complete(ValidationResult::invalid_with("early"));
            task
        }));
        validator.validate(2);
        assert_eq!(
            *log.borrow(),
            vec![
                ValidatorEvent::Started,
                ValidatorEvent::Completed {
                    value: 2,
                    result: Some(ValidationResult::invalid_with("early")),
                    intermediate: false,
                },
            ]
        );
    }

    #[test]
    fn dispose_swallows_late_completion() {
        let dispatcher = Dispatcher::new();
        let (constraint, pending) = manual(&dispatcher);
        let (validator, log) = recording(constraint);
        validator.validate(1);
        validator.validate(2);
        validator.dispose();
        let (_, completer) = pending.borrow_mut().remove(0);
        assert!(completer.is_cancellation_requested());
        completer.acknowledge_cancel();
        dispatcher.run_pending();
        assert_eq!(*log.borrow(), vec![ValidatorEvent::Started]);
        validator.validate(3);
        assert!(pending.borrow().is_empty());
    }

    #[test]
    fn reentrant_request_supersedes_queued_value() {
        let dispatcher = Dispatcher::new();
        let (constraint, pending) = manual(&dispatcher);
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let slot: Rc<RefCell<Option<SerializedValidator<u32, &'static str>>>> = Rc::new(RefCell::new(None));
        let (l, s) = (Rc::clone(&log), Rc::clone(&slot));
        let validator = SerializedValidator::new(constraint, move |event| {
            let reenter = matches!(event, ValidatorEvent::Completed { value: 1, .. });
            l.borrow_mut().push(event);
            if reenter {
                if let Some(v) = s.borrow().as_ref() {
                    v.validate(9);
                }
            }
        });
        *slot.borrow_mut() = Some(validator.clone());

        validator.validate(1);
        validator.validate(2);
        let (_, completer) = pending.borrow_mut().remove(0);
        completer.complete(ValidationResult::valid());
        dispatcher.run_pending();

        let values: Vec<u32> = pending.borrow().iter().map(|(v, _)| *v).collect();
        assert_eq!(values, vec![9]);
        slot.borrow_mut().take();
    }
}
