#![forbid(unsafe_code)]

//! Validation tasks and the completion dispatcher.
//!
//! A constraint routine returns a [`ValidationTask`]: either already
//! resolved, or pending behind a [`Completer`] that some other party (a
//! worker thread, a timer, a test) resolves later. Pending tasks are never
//! observed directly by the engine; when the completer fires, a wakeup is
//! queued on the constraint's [`Dispatcher`] and the result is delivered on
//! the dispatcher's thread when it is pumped.
//!
//! # Invariants
//!
//! 1. Every pending task resolves exactly once: completed, failed, or
//!    cancel-acknowledged. Dropping an unresolved [`Completer`] resolves the
//!    task as failed.
//! 2. A task resolved before it reached the dispatcher is treated as
//!    synchronous; no wakeup is queued for it.
//! 3. Cancellation is advisory: the completer sees the request and may
//!    acknowledge it or finish anyway.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ahash::AHashMap;

use crate::result::ValidationResult;

/// How a task finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome<D> {
    Completed(Option<ValidationResult<D>>),
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(u64);

struct Wake {
    id: TaskId,
    sender: Sender<TaskId>,
}

struct Slot<D> {
    outcome: Option<Outcome<D>>,
    wake: Option<Wake>,
}

fn lock<D>(slot: &Mutex<Slot<D>>) -> MutexGuard<'_, Slot<D>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Work returned by a constraint routine.
pub struct ValidationTask<D> {
    pub(crate) kind: TaskKind<D>,
}

pub(crate) enum TaskKind<D> {
    Ready(Option<ValidationResult<D>>),
    Failed(String),
    Pending(PendingValidation<D>),
}

impl<D> fmt::Debug for ValidationTask<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            TaskKind::Ready(Some(_)) => "ready",
            TaskKind::Ready(None) => "none",
            TaskKind::Failed(_) => "failed",
            TaskKind::Pending(_) => "pending",
        };
        f.debug_tuple("ValidationTask").field(&kind).finish()
    }
}

impl<D> ValidationTask<D> {
    /// Already-computed result.
    #[must_use]
    pub fn ready(result: ValidationResult<D>) -> Self {
        Self {
            kind: TaskKind::Ready(Some(result)),
        }
    }

    /// The constraint abstains; its slot stays unknown.
    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: TaskKind::Ready(None),
        }
    }

    /// The routine could not produce a result. Logged as a constraint defect.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Failed(reason.into()),
        }
    }
}

impl<D: Send + 'static> ValidationTask<D> {
    /// A task resolved later through the returned [`Completer`].
    ///
    /// The owning constraint must carry a dispatcher (see
    /// [`Constraint::complete_on`](crate::Constraint::complete_on)) unless the
    /// completer is guaranteed to fire before the routine returns.
    #[must_use]
    pub fn pending() -> (Self, Completer<D>) {
        let slot = Arc::new(Mutex::new(Slot {
            outcome: None,
            wake: None,
        }));
        let cancel = Arc::new(AtomicBool::new(false));
        let task = Self {
            kind: TaskKind::Pending(PendingValidation {
                slot: Arc::clone(&slot),
                cancel: Arc::clone(&cancel),
            }),
        };
        let completer = Completer {
            slot,
            cancel,
            resolved: false,
        };
        (task, completer)
    }
}

/// Resolves a pending [`ValidationTask`] from any thread.
///
/// The dispatcher keeps the task's delivery job until the completer resolves
/// it or is dropped. A completer that is kept alive and never resolved keeps
/// its task outstanding.
pub struct Completer<D> {
    slot: Arc<Mutex<Slot<D>>>,
    cancel: Arc<AtomicBool>,
    resolved: bool,
}

impl<D> fmt::Debug for Completer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("cancel_requested", &self.is_cancellation_requested())
            .finish()
    }
}

impl<D> Completer<D> {
    pub fn complete(mut self, result: ValidationResult<D>) {
        self.resolve(Outcome::Completed(Some(result)));
    }

    /// Finish without a result; the constraint slot stays unknown.
    pub fn complete_none(mut self) {
        self.resolve(Outcome::Completed(None));
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.resolve(Outcome::Failed(reason.into()));
    }

    /// Confirm that the work stopped because cancellation was requested.
    pub fn acknowledge_cancel(mut self) {
        self.resolve(Outcome::Cancelled);
    }

    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn resolve(&mut self, outcome: Outcome<D>) {
        self.resolved = true;
        let mut slot = lock(&self.slot);
        if slot.outcome.is_some() {
            return;
        }
        slot.outcome = Some(outcome);
        if let Some(wake) = slot.wake.take() {
            // A closed channel means the dispatcher is gone; nobody is left
            // to deliver to.
            let _ = wake.sender.send(wake.id);
        }
    }
}

impl<D> Drop for Completer<D> {
    fn drop(&mut self) {
        if !self.resolved {
            self.resolve(Outcome::Failed("completer dropped without a result".into()));
        }
    }
}

/// Engine-side half of a pending task.
pub(crate) struct PendingValidation<D> {
    slot: Arc<Mutex<Slot<D>>>,
    cancel: Arc<AtomicBool>,
}

/// Engine-side cancel switch for an in-flight task.
#[derive(Debug, Clone)]
pub(crate) struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub(crate) fn request(&self) {
        self.0.store(true, Ordering::Release);
    }
}

pub(crate) enum Registration<D> {
    /// Resolved before registration; deliver synchronously.
    Resolved(Outcome<D>),
    /// Delivery will happen on the dispatcher.
    Scheduled(CancelHandle),
}

impl<D: 'static> PendingValidation<D> {
    /// Take the outcome if the task already finished.
    pub(crate) fn try_take(&self) -> Option<Outcome<D>> {
        lock(&self.slot).outcome.take()
    }

    /// Arrange for `on_done` to run on `dispatcher` once the task resolves.
    pub(crate) fn register(
        self,
        dispatcher: &Dispatcher,
        on_done: impl FnOnce(Outcome<D>) + 'static,
    ) -> Registration<D> {
        let mut slot = lock(&self.slot);
        if let Some(outcome) = slot.outcome.take() {
            return Registration::Resolved(outcome);
        }
        let shared = Arc::clone(&self.slot);
        let (id, sender) = dispatcher.schedule(Box::new(move || {
            let outcome = lock(&shared)
                .outcome
                .take()
                .unwrap_or_else(|| Outcome::Failed("woken without an outcome".into()));
            on_done(outcome);
        }));
        slot.wake = Some(Wake { id, sender });
        Registration::Scheduled(CancelHandle(self.cancel))
    }
}

struct DispatcherInner {
    sender: Sender<TaskId>,
    receiver: Receiver<TaskId>,
    next_id: Cell<u64>,
    waiting: RefCell<AHashMap<TaskId, Box<dyn FnOnce()>>>,
}

/// Single-threaded delivery queue for asynchronous completions.
///
/// Completers on other threads only enqueue a wakeup; the result is applied
/// when the owning thread calls [`run_pending`](Self::run_pending) or
/// [`run_until_idle`](Self::run_until_idle). Cloning shares the queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<DispatcherInner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            inner: Rc::new(DispatcherInner {
                sender,
                receiver,
                next_id: Cell::new(0),
                waiting: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Deliver every completion that has already arrived. Returns how many
    /// were delivered.
    pub fn run_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(id) = self.inner.receiver.try_recv() {
            if self.deliver(id) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Block until no registered task is outstanding or `timeout` elapses.
    /// Returns true if the queue drained.
    pub fn run_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if self.outstanding() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.inner.receiver.recv_timeout(deadline - now) {
                Ok(id) => {
                    self.deliver(id);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    return self.outstanding() == 0;
                }
            }
        }
    }

    /// Registered tasks whose completion has not been delivered yet,
    /// including tasks whose completer is still alive and unresolved.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.waiting.borrow().len()
    }

    fn schedule(&self, job: Box<dyn FnOnce()>) -> (TaskId, Sender<TaskId>) {
        let id = TaskId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner.waiting.borrow_mut().insert(id, job);
        (id, self.inner.sender.clone())
    }

    fn deliver(&self, id: TaskId) -> bool {
        let job = self.inner.waiting.borrow_mut().remove(&id);
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
