//! Leaf components.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::{IdSource, ProcessId};

use crate::base::ComponentCore;
use crate::component::{ProcessComponent, ProcessOutcome};
use crate::error::Result;
use crate::lifecycle::{self, Compensable, Executable};
use crate::listener::ProcessComponentListener;
use crate::reason::RollbackReason;
use crate::state::ProcessState;

/// The work of a leaf step.
///
/// Failures from `execute` cancel the whole enclosing workflow. `rollback`
/// defaults to a no-op for steps with nothing to undo, such as reads.
#[async_trait]
pub trait StepBody: Send + Sync + 'static {
    async fn execute(&self) -> std::result::Result<(), RollbackReason>;

    async fn rollback(&self, _reason: &RollbackReason) -> std::result::Result<(), RollbackReason> {
        Ok(())
    }
}

/// A leaf of the process tree wrapping a [`StepBody`].
///
/// Pausing a step only affects its state: a step paused while its body runs
/// lets the body finish and then waits for `resume` before succeeding.
/// Cancelling a step whose body is running likewise lets the body return
/// before its rollback starts.
pub struct ProcessStep<B> {
    core: ComponentCore,
    body: B,
}

impl<B: StepBody> ProcessStep<B> {
    /// Creates a step with a random ID.
    pub fn new(name: impl Into<String>, body: B) -> Self {
        Self::with_id(ProcessId::new(), name, body)
    }

    pub fn with_id(id: ProcessId, name: impl Into<String>, body: B) -> Self {
        Self {
            core: ComponentCore::new(id, name, "step"),
            body,
        }
    }

    /// Creates a step whose ID comes from `ids`.
    pub fn from_source(ids: &dyn IdSource, name: impl Into<String>, body: B) -> Self {
        Self::with_id(ids.next_id(), name, body)
    }

    pub fn body(&self) -> &B {
        &self.body
    }
}

#[async_trait]
impl<B: StepBody> Compensable for ProcessStep<B> {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    async fn rollback(&self, reason: &RollbackReason) {
        if let Err(error) = self.body.rollback(reason).await {
            self.core.record_rollback_error(&error);
        }
    }
}

#[async_trait]
impl<B: StepBody> Executable for ProcessStep<B> {
    async fn execute(&self) -> std::result::Result<(), RollbackReason> {
        let _forward = self.core.enter_forward();
        self.body.execute().await
    }
}

#[async_trait]
impl<B: StepBody> ProcessComponent for ProcessStep<B> {
    fn id(&self) -> ProcessId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> ProcessState {
        self.core.state()
    }

    fn is_rolling_back(&self) -> bool {
        self.core.status().is_rolling_back()
    }

    fn progress(&self) -> f64 {
        self.core.progress()
    }

    fn attach_listener(&self, listener: Arc<dyn ProcessComponentListener>) {
        self.core.attach_listener(listener);
    }

    fn detach_listener(&self, listener: &Arc<dyn ProcessComponentListener>) -> bool {
        self.core.detach_listener(listener)
    }

    async fn start(&self) -> Result<()> {
        lifecycle::start(self).await
    }

    fn pause(&self) -> Result<()> {
        self.core.pause()
    }

    fn resume(&self) -> Result<()> {
        self.core.resume()
    }

    async fn cancel(&self, reason: RollbackReason) -> Result<()> {
        lifecycle::cancel(self, reason).await
    }

    async fn wait(&self) -> ProcessOutcome {
        self.core.wait_terminal().await
    }

    fn parent(&self) -> Option<Arc<dyn ProcessComponent>> {
        self.core.parent()
    }

    fn set_parent(&self, parent: Weak<dyn ProcessComponent>) -> Result<()> {
        self.core.set_parent(parent)
    }

    fn clear_parent(&self) {
        self.core.clear_parent();
    }
}
