//! Decorators: components wrapping exactly one other component.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use common::{IdSource, ProcessId};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::base::{ComponentCore, lock};
use crate::component::{ProcessComponent, ProcessOutcome};
use crate::error::{ProcessError, Result};
use crate::handle::{AsyncHandle, HandleResolver};
use crate::lifecycle::{self, Compensable};
use crate::listener::ProcessComponentListener;
use crate::reason::RollbackReason;
use crate::state::ProcessState;

/// A component that wraps exactly one other component.
///
/// Listener registration is forwarded to the wrapped component, so
/// listeners observe the wrapped component's notifications.
pub trait ProcessDecorator: ProcessComponent {
    fn decorated(&self) -> &Arc<dyn ProcessComponent>;
}

/// Runs the wrapped component on its own tokio task.
///
/// `start` returns as soon as the task is spawned, leaving the decorator
/// `Running`. The outcome of the wrapped component is published through an
/// [`AsyncHandle`] that the enclosing [`SequentialProcess`] joins.
///
/// When the wrapped component fails, a decorator without a parent cancels
/// itself; inside a process the failure is left for the process to pick up,
/// which then rolls the decorator back with everything else.
///
/// `pause` and `resume` reach the wrapped component's state machine but do
/// not suspend the task itself.
///
/// Cancelling stops the forked run at its next suspension point and then
/// rolls the wrapped component back. A wrapped component that is already
/// compensating its own failure is left to finish that rollback first.
///
/// [`SequentialProcess`]: crate::SequentialProcess
pub struct AsyncComponent {
    forked: Arc<Forked>,
}

struct Forked {
    core: ComponentCore,
    decorated: Arc<dyn ProcessComponent>,
    resolver: HandleResolver,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncComponent {
    pub fn new(decorated: Arc<dyn ProcessComponent>) -> Self {
        Self::with_id(ProcessId::new(), decorated)
    }

    pub fn with_id(id: ProcessId, decorated: Arc<dyn ProcessComponent>) -> Self {
        let name = format!("async({})", decorated.name());
        Self {
            forked: Arc::new(Forked {
                core: ComponentCore::new(id, name, "async"),
                resolver: HandleResolver::new(id),
                decorated,
                stop: watch::channel(false).0,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn from_source(ids: &dyn IdSource, decorated: Arc<dyn ProcessComponent>) -> Self {
        Self::with_id(ids.next_id(), decorated)
    }
}

impl Forked {
    async fn run_decorated(&self) -> ProcessOutcome {
        self.decorated.start().await?;
        self.decorated.wait().await
    }

    async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Runs the wrapped component until it finishes or a stop is requested.
    ///
    /// A stop only interrupts forward execution: once the wrapped component
    /// is rolling back, the run continues until it is terminal. `None` means
    /// the run was stopped.
    async fn run_until_stopped(&self) -> Option<ProcessOutcome> {
        let run = self.run_decorated();
        tokio::pin!(run);
        tokio::select! {
            biased;
            outcome = &mut run => return Some(outcome),
            () = self.stopped() => {}
        }

        if self.decorated.is_rolling_back() {
            return Some(run.await);
        }
        tracing::debug!(id = %self.core.id(), "forked run stopped");
        None
    }

    /// Publishes the outcome of the forked run and mirrors it.
    async fn settle(&self, outcome: ProcessOutcome) {
        self.resolver.resolve(outcome.clone());
        match outcome {
            Ok(()) => self.core.complete().await,
            Err(reason) => {
                if self.core.parent().is_none() {
                    // This is the forked task itself; the rollback must not join it.
                    lock(&self.task).take();
                    if let Err(error) = lifecycle::cancel(self, reason).await {
                        tracing::debug!(id = %self.core.id(), %error, "forked failure already handled");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Compensable for Forked {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    async fn rollback(&self, reason: &RollbackReason) {
        self.resolver.resolve(Err(reason.clone()));
        self.stop.send_replace(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            tracing::debug!(id = %self.core.id(), "stopping forked task");
            let _ = task.await;
        }

        match self.decorated.state() {
            ProcessState::Ready | ProcessState::Failed => {}
            _ if self.decorated.is_rolling_back() => {
                // Rolled back by another caller; let it finish.
                let _ = self.decorated.wait().await;
            }
            _ => {
                if let Err(error) = self.decorated.cancel(reason.clone()).await {
                    self.core.record_rollback_error(&error);
                }
            }
        }
    }
}

#[async_trait]
impl ProcessComponent for AsyncComponent {
    fn id(&self) -> ProcessId {
        self.forked.core.id()
    }

    fn name(&self) -> &str {
        self.forked.core.name()
    }

    fn state(&self) -> ProcessState {
        self.forked.core.state()
    }

    fn is_rolling_back(&self) -> bool {
        self.forked.core.status().is_rolling_back()
    }

    fn progress(&self) -> f64 {
        self.forked.decorated.progress()
    }

    fn attach_listener(&self, listener: Arc<dyn ProcessComponentListener>) {
        self.forked.decorated.attach_listener(listener);
    }

    fn detach_listener(&self, listener: &Arc<dyn ProcessComponentListener>) -> bool {
        self.forked.decorated.detach_listener(listener)
    }

    async fn start(&self) -> Result<()> {
        self.forked.core.begin_start()?;

        // Held across the spawn so the task cannot observe an empty slot.
        let mut slot = lock(&self.forked.task);
        let forked = Arc::clone(&self.forked);
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(forked.run_until_stopped())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Some(Err(RollbackReason::new(
                        ProcessError::Abandoned(forked.decorated.id()),
                        "forked component panicked",
                    )))
                });
            if let Some(outcome) = outcome {
                forked.settle(outcome).await;
            }
        });
        *slot = Some(task);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.forked.core.pause()?;
        if let Err(error) = self.forked.decorated.pause() {
            // Undo our own pause so both state machines agree.
            let _ = self.forked.core.resume();
            return Err(error);
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.forked.core.resume()?;
        self.forked.decorated.resume()
    }

    async fn cancel(&self, reason: RollbackReason) -> Result<()> {
        lifecycle::cancel(self.forked.as_ref(), reason).await
    }

    async fn wait(&self) -> ProcessOutcome {
        self.forked.core.wait_terminal().await
    }

    fn async_handle(&self) -> Option<AsyncHandle> {
        Some(self.forked.resolver.handle())
    }

    fn parent(&self) -> Option<Arc<dyn ProcessComponent>> {
        self.forked.core.parent()
    }

    fn set_parent(&self, parent: Weak<dyn ProcessComponent>) -> Result<()> {
        self.forked.core.set_parent(parent)
    }

    fn clear_parent(&self) {
        self.forked.core.clear_parent();
    }
}

impl ProcessDecorator for AsyncComponent {
    fn decorated(&self) -> &Arc<dyn ProcessComponent> {
        &self.forked.decorated
    }
}
