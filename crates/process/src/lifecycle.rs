//! Lifecycle drivers shared by every component kind.
//!
//! A component supplies its work through [`Executable`] and its undo
//! through [`Compensable`]; [`start`] and [`cancel`] wrap them in the state
//! machine, the upward delegation of cancellation and the listener
//! protocol.

use async_trait::async_trait;

use crate::base::ComponentCore;
use crate::error::Result;
use crate::reason::RollbackReason;

#[async_trait]
pub(crate) trait Compensable: Send + Sync {
    fn core(&self) -> &ComponentCore;

    /// Undoes the component's work. Errors are reported, not propagated.
    async fn rollback(&self, reason: &RollbackReason);
}

#[async_trait]
pub(crate) trait Executable: Compensable {
    async fn execute(&self) -> std::result::Result<(), RollbackReason>;
}

/// Runs `component` to completion.
///
/// An execution error turns into a cancellation. If another caller already
/// owns the rollback of the enclosing workflow, the resulting invalid-state
/// error is dropped: that owner cancels this component as part of its walk.
#[tracing::instrument(skip_all, fields(id = %component.core().id(), name = component.core().name()))]
pub(crate) async fn start<C>(component: &C) -> Result<()>
where
    C: Executable + ?Sized,
{
    let core = component.core();
    core.begin_start()?;

    match component.execute().await {
        Ok(()) => core.complete().await,
        Err(reason) => {
            if core.status().is_executing() {
                tracing::debug!(hint = reason.hint(), "execution failed, cancelling");
                if let Err(error) = cancel(component, reason).await {
                    tracing::debug!(%error, "rollback already owned by another caller");
                }
            }
        }
    }
    Ok(())
}

/// Cancels `component`, delegating upward while the parent is not yet
/// rolling back.
///
/// The caller that moves the outermost such component into `RollingBack`
/// owns the rollback walk; every other concurrent caller gets an
/// invalid-state error. A leaf whose body is still executing is rolled back
/// only after that body returns.
pub(crate) async fn cancel<C>(component: &C, reason: RollbackReason) -> Result<()>
where
    C: Compensable + ?Sized,
{
    let core = component.core();
    core.check_cancellable()?;

    if let Some(parent) = core.parent()
        && !parent.is_rolling_back()
    {
        tracing::debug!(id = %core.id(), parent = %parent.id(), "delegating cancellation to parent");
        return parent.cancel(reason).await;
    }

    core.begin_rollback()?;
    tracing::info!(id = %core.id(), name = core.name(), hint = reason.hint(), "rolling back");
    core.wait_forward_finished().await;
    component.rollback(&reason).await;
    core.fail(&reason).await;
    Ok(())
}
