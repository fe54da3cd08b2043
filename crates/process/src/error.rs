//! Process framework error types.

use common::ProcessId;
use thiserror::Error;

use crate::state::ProcessState;

/// Errors returned synchronously by lifecycle and composition calls.
///
/// Execution failures of a step are not reported through this type; they
/// become a [`RollbackReason`](crate::RollbackReason) and cancel the
/// enclosing workflow instead.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A lifecycle call was made in a state that does not permit it.
    #[error("Invalid process state: cannot {operation} component {component} while {actual}")]
    InvalidState {
        component: ProcessId,
        operation: &'static str,
        actual: ProcessState,
    },

    /// The component is already a child of another process.
    #[error("Component {0} already has a parent")]
    AlreadyAttached(ProcessId),

    /// The component is already part of this process.
    #[error("Component {0} is already part of this process")]
    DuplicateComponent(ProcessId),

    /// The component is not part of this process.
    #[error("Component {0} is not part of this process")]
    ComponentNotFound(ProcessId),

    /// An insertion index beyond the end of the child list.
    #[error("Index {index} is out of bounds for a process with {len} components")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The children before the execution cursor have already been started.
    #[error("Cannot modify position {index}: the first {started} components have already started")]
    AlreadyStarted { index: usize, started: usize },

    /// A step failed with a plain message instead of a typed error.
    #[error("Process execution failed: {0}")]
    Execution(String),

    /// A forked component finished without resolving its handle.
    #[error("Asynchronous component {0} terminated abnormally")]
    Abandoned(ProcessId),
}

/// Convenience type alias for process results.
pub type Result<T> = std::result::Result<T, ProcessError>;
