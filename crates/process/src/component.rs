//! The lifecycle contract shared by leaves, composites and decorators.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use common::ProcessId;

use crate::error::Result;
use crate::handle::AsyncHandle;
use crate::listener::ProcessComponentListener;
use crate::reason::RollbackReason;
use crate::state::ProcessState;

/// How a component ended: `Ok` on `Succeeded`, the rollback reason on `Failed`.
pub type ProcessOutcome = std::result::Result<(), RollbackReason>;

/// A node in a process tree.
///
/// Implemented by [`ProcessStep`](crate::ProcessStep),
/// [`ResultStep`](crate::ResultStep),
/// [`SequentialProcess`](crate::SequentialProcess),
/// [`AsyncComponent`](crate::AsyncComponent) and
/// [`AsyncResultComponent`](crate::AsyncResultComponent). Trees are built
/// from `Arc<dyn ProcessComponent>`; the composite holding a child is its
/// only owner.
///
/// Lifecycle calls made in a state that does not permit them return
/// [`ProcessError::InvalidState`](crate::ProcessError::InvalidState) and
/// leave the state unchanged. Execution failures are never returned from
/// `start`: they cancel the enclosing workflow and surface through
/// [`ProcessComponentListener::on_failed`] and [`ProcessComponent::wait`].
#[async_trait]
pub trait ProcessComponent: Send + Sync + 'static {
    fn id(&self) -> ProcessId;

    fn name(&self) -> &str;

    fn state(&self) -> ProcessState;

    /// True while rolling back, including while paused during rollback.
    fn is_rolling_back(&self) -> bool;

    /// Advisory completion fraction in `[0.0, 1.0]`.
    fn progress(&self) -> f64;

    fn attach_listener(&self, listener: Arc<dyn ProcessComponentListener>);

    /// Returns true if the listener was attached.
    fn detach_listener(&self, listener: &Arc<dyn ProcessComponentListener>) -> bool;

    /// Runs the component.
    ///
    /// Returns once the component has finished, except for forked
    /// components which return as soon as the fork is accepted.
    async fn start(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    /// Rolls back the workflow this component belongs to.
    ///
    /// A component whose parent is not already rolling back hands the call
    /// to the parent, so a failure anywhere compensates the whole tree.
    async fn cancel(&self, reason: RollbackReason) -> Result<()>;

    /// Blocks until the component is `Succeeded` or `Failed`.
    async fn wait(&self) -> ProcessOutcome;

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning
    /// `None`. Timing out does not affect the component.
    async fn wait_timeout(&self, timeout: Duration) -> Option<ProcessOutcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// The join handle of a forked component, once started.
    fn async_handle(&self) -> Option<AsyncHandle> {
        None
    }

    fn parent(&self) -> Option<Arc<dyn ProcessComponent>>;

    /// Installs the non-owning back-reference to the enclosing process.
    fn set_parent(&self, parent: Weak<dyn ProcessComponent>) -> Result<()>;

    fn clear_parent(&self);
}
