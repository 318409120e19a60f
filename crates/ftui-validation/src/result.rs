#![forbid(unsafe_code)]

//! Validation outcomes and the tri-state fold over them.

use std::fmt;

/// Outcome of one constraint run: validity plus an optional diagnostic
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidationResult<D> {
    valid: bool,
    diagnostic: Option<D>,
}

impl<D> ValidationResult<D> {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            diagnostic: None,
        }
    }

    /// Valid, but carrying a diagnostic (a warning, typically).
    #[must_use]
    pub fn valid_with(diagnostic: D) -> Self {
        Self {
            valid: true,
            diagnostic: Some(diagnostic),
        }
    }

    #[must_use]
    pub fn invalid() -> Self {
        Self {
            valid: false,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn invalid_with(diagnostic: D) -> Self {
        Self {
            valid: false,
            diagnostic: Some(diagnostic),
        }
    }

    /// `valid()` or `invalid()` from a predicate.
    #[must_use]
    pub fn check(ok: bool) -> Self {
        if ok { Self::valid() } else { Self::invalid() }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub fn diagnostic(&self) -> Option<&D> {
        self.diagnostic.as_ref()
    }

    #[must_use]
    pub fn into_diagnostic(self) -> Option<D> {
        self.diagnostic
    }
}

/// Tri-state validity of a helper, element, or constraint slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValidationState {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

impl ValidationState {
    /// State contributed by one constraint slot. `None` means the slot has
    /// no current result (never ran, in flight, or cancelled).
    #[must_use]
    pub fn of<D>(result: Option<&ValidationResult<D>>) -> Self {
        match result {
            None => Self::Unknown,
            Some(result) if result.is_valid() => Self::Valid,
            Some(_) => Self::Invalid,
        }
    }

    /// Any `Invalid` wins; otherwise any `Unknown` makes the fold unknown;
    /// otherwise `Valid`. The empty fold is `Valid`.
    #[must_use]
    pub fn fold(states: impl IntoIterator<Item = ValidationState>) -> Self {
        let mut unknown = false;
        for state in states {
            match state {
                Self::Invalid => return Self::Invalid,
                Self::Unknown => unknown = true,
                Self::Valid => {}
            }
        }
        if unknown { Self::Unknown } else { Self::Valid }
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        })
    }
}
