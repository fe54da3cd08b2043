//! The reason carried through a cancellation cascade.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::error::ProcessError;

/// Why a workflow is being rolled back.
///
/// Created once at the failure site and cloned (cheaply) into every
/// component the cascade touches, so all of them observe the same cause
/// and hint. `hint` is meant for end users and operators, `cause` for
/// diagnostics.
///
/// Any error type converts into a `RollbackReason`, which lets step bodies
/// use `?` on collaborator calls.
#[derive(Clone)]
pub struct RollbackReason {
    cause: Arc<dyn Error + Send + Sync + 'static>,
    hint: String,
}

impl RollbackReason {
    /// Creates a reason from a cause and an explicit hint.
    pub fn new<E>(cause: E, hint: impl Into<String>) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            cause: Arc::new(cause),
            hint: hint.into(),
        }
    }

    /// Creates a reason from a hint alone.
    pub fn from_hint(hint: impl Into<String>) -> Self {
        let hint = hint.into();
        Self {
            cause: Arc::new(ProcessError::Execution(hint.clone())),
            hint,
        }
    }

    /// Returns the human-readable explanation.
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Returns the originating error.
    pub fn cause(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.cause
    }

    /// Returns the cause as a concrete error type, if it is one.
    pub fn downcast_cause<E>(&self) -> Option<&E>
    where
        E: Error + 'static,
    {
        self.cause.downcast_ref::<E>()
    }
}

impl<E> From<E> for RollbackReason
where
    E: Error + Send + Sync + 'static,
{
    fn from(cause: E) -> Self {
        let hint = cause.to_string();
        Self::new(cause, hint)
    }
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hint)
    }
}

impl fmt::Debug for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackReason")
            .field("hint", &self.hint)
            .field("cause", &self.cause)
            .finish()
    }
}
