//! Composable, compensating process orchestration.
//!
//! A workflow is a tree of [`ProcessComponent`]s. Leaves are
//! [`ProcessStep`]s (or [`ResultStep`]s when they produce a value),
//! composites are [`SequentialProcess`]es, and an [`AsyncComponent`] forks a
//! subtree so its parent can move on while it runs.
//!
//! Any component may fail. The failure travels up to the outermost
//! component that is not yet rolling back, which then compensates every
//! started descendant in reverse order:
//! 1. The failing child's parent cancels its completed siblings, newest first
//! 2. Forked children are cancelled and their handles resolved
//! 3. Every compensated component reaches `Failed` and notifies its listeners

mod base;
pub mod component;
pub mod decorator;
pub mod error;
pub mod handle;
mod lifecycle;
pub mod listener;
pub mod process;
pub mod reason;
pub mod result;
pub mod sequential;
pub mod state;
pub mod step;

pub use component::{ProcessComponent, ProcessOutcome};
pub use decorator::{AsyncComponent, ProcessDecorator};
pub use error::{ProcessError, Result};
pub use handle::AsyncHandle;
pub use listener::{ProcessComponentListener, ProcessResultListener};
pub use process::Process;
pub use reason::RollbackReason;
pub use result::{AsyncResultComponent, ResultComponent, ResultStep, ResultStepBody};
pub use sequential::SequentialProcess;
pub use state::ProcessState;
pub use step::{ProcessStep, StepBody};
