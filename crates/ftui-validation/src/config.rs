#![forbid(unsafe_code)]

//! Construction-time options shared by every validation helper.

use crate::result::ValidationState;

/// Options applied when a helper is built.
///
/// `initial_state` decides whether construction validates:
///
/// - [`ValidationState::Unknown`] (the default) runs every constraint on the
///   initial source value immediately.
/// - [`ValidationState::Valid`] or [`ValidationState::Invalid`] trusts the
///   given state until the source first changes. A trusted `Valid` state also
///   seeds the constrained value with the initial contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidationConfig {
    pub initial_state: ValidationState,
}

impl ValidationConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn initial_state(mut self, state: ValidationState) -> Self {
        self.initial_state = state;
        self
    }

    /// Shorthand for a trusted-valid start.
    #[must_use]
    pub fn assume_valid() -> Self {
        Self::new().initial_state(ValidationState::Valid)
    }

    pub(crate) fn validates_on_construction(&self) -> bool {
        self.initial_state == ValidationState::Unknown
    }
}
