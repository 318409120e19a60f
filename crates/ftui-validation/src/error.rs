#![forbid(unsafe_code)]

//! Usage errors raised by the validation engine.
//!
//! These describe internal protocol violations (unbalanced brackets,
//! reentrant folds, double disposal). They are returned from the crate's
//! fallible internals and escalated to panics at the public boundary, since
//! continuing past one would leave the published state inconsistent.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UsageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("quiescence bracket opened while already quiescent")]
    NestedQuiescence,

    #[error("quiescence bracket closed while not quiescent")]
    QuiescenceNotActive,

    #[error("validation state updated reentrantly; a listener mutated a source mid-commit")]
    ReentrantUpdate,

    #[error("validator completion without a matching start")]
    UnbalancedCompletion,

    #[error("constrained element disposed twice")]
    AlreadyDisposed,
}

impl UsageError {
    /// Escalate to a panic, reporting the caller's location.
    #[track_caller]
    pub(crate) fn raise(self) -> ! {
        tracing::error!(message = "validation.usage_error", error = %self);
        panic!("{self}")
    }
}

/// Unwrap a crate-internal result, escalating usage errors to panics.
pub(crate) trait OrRaise<T> {
    fn or_raise(self) -> T;
}

impl<T> OrRaise<T> for Result<T> {
    #[track_caller]
    fn or_raise(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => err.raise(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_violation() {
        assert!(UsageError::NestedQuiescence.to_string().contains("already quiescent"));
        assert!(UsageError::AlreadyDisposed.to_string().contains("twice"));
    }

    #[test]
    #[should_panic(expected = "without a matching start")]
    fn raise_panics_with_message() {
        let result: Result<()> = Err(UsageError::UnbalancedCompletion);
        result.or_raise();
    }
}
