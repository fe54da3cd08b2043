//! Process component state machine.

use serde::{Deserialize, Serialize};

/// The state of a process component in its lifecycle.
///
/// State transitions:
/// ```text
/// Ready ──► Running ──┬──────────────────────► Succeeded
///             ▲  │    └──► RollingBack ──► Failed
///             │  ▼             ▲  │
///            Paused ───────────┘  ▼
///                ◄──────────── Paused
/// ```
///
/// A component remembers whether it was paused while running or while
/// rolling back, and `resume` returns it to that branch. A `Succeeded`
/// component may still be cancelled by its rolling-back parent, which
/// takes it through `RollingBack` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProcessState {
    /// Created but not started yet.
    #[default]
    Ready,

    /// Executing its own work.
    Running,

    /// Suspended, either during execution or during rollback.
    Paused,

    /// Undoing its work after a cancellation.
    RollingBack,

    /// Work completed (terminal unless compensated).
    Succeeded,

    /// Rolled back after a failure (terminal state).
    Failed,
}

impl ProcessState {
    /// Returns true if the component can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, ProcessState::Ready)
    }

    /// Returns true if the component can be paused.
    pub fn can_pause(&self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::RollingBack)
    }

    /// Returns true if this state ends the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Succeeded | ProcessState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Ready => "Ready",
            ProcessState::Running => "Running",
            ProcessState::Paused => "Paused",
            ProcessState::RollingBack => "RollingBack",
            ProcessState::Succeeded => "Succeeded",
            ProcessState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
