//! Shared lifecycle state of every process component.
//!
//! [`ComponentCore`] owns the state machine, progress, parent link and
//! listeners. Leaves, composites and decorators embed one and drive it
//! through the functions in [`crate::lifecycle`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use common::ProcessId;
use tokio::sync::watch;

use crate::component::{ProcessComponent, ProcessOutcome};
use crate::error::{ProcessError, Result};
use crate::listener::{ListenerSet, ProcessComponentListener};
use crate::reason::RollbackReason;
use crate::state::ProcessState;

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The observable state plus the branch a paused component returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Status {
    pub(crate) state: ProcessState,
    paused_from: Option<ProcessState>,
}

impl Status {
    fn entered(state: ProcessState) -> Self {
        Self {
            state,
            paused_from: None,
        }
    }

    /// Running, or paused while running.
    pub(crate) fn is_executing(&self) -> bool {
        self.state == ProcessState::Running
            || (self.state == ProcessState::Paused
                && self.paused_from == Some(ProcessState::Running))
    }

    /// Rolling back, or paused while rolling back.
    pub(crate) fn is_rolling_back(&self) -> bool {
        self.state == ProcessState::RollingBack
            || (self.state == ProcessState::Paused
                && self.paused_from == Some(ProcessState::RollingBack))
    }
}

/// Keeps a leaf's forward work marked as in flight until dropped.
pub(crate) struct ForwardGuard<'a> {
    forward: &'a watch::Sender<bool>,
}

impl Drop for ForwardGuard<'_> {
    fn drop(&mut self) {
        self.forward.send_replace(false);
    }
}

pub(crate) struct ComponentCore {
    id: ProcessId,
    name: String,
    kind: &'static str,
    status: watch::Sender<Status>,
    /// Set while a leaf body's `execute` is running.
    forward: watch::Sender<bool>,
    progress: Mutex<f64>,
    parent: Mutex<Option<Weak<dyn ProcessComponent>>>,
    failure: Mutex<Option<RollbackReason>>,
    started_at: Mutex<Option<Instant>>,
    listeners: ListenerSet<dyn ProcessComponentListener>,
}

impl ComponentCore {
    pub(crate) fn new(id: ProcessId, name: impl Into<String>, kind: &'static str) -> Self {
        let (status, _) = watch::channel(Status::default());
        let (forward, _) = watch::channel(false);
        Self {
            id,
            name: name.into(),
            kind,
            status,
            forward,
            progress: Mutex::new(0.0),
            parent: Mutex::new(None),
            failure: Mutex::new(None),
            started_at: Mutex::new(None),
            listeners: ListenerSet::new(),
        }
    }

    pub(crate) fn id(&self) -> ProcessId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> ProcessState {
        self.status.borrow().state
    }

    pub(crate) fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub(crate) fn progress(&self) -> f64 {
        *lock(&self.progress)
    }

    /// Progress never moves backwards.
    pub(crate) fn set_progress(&self, progress: f64) {
        let mut current = lock(&self.progress);
        let progress = progress.clamp(0.0, 1.0);
        if progress > *current {
            *current = progress;
        }
    }

    pub(crate) fn parent(&self) -> Option<Arc<dyn ProcessComponent>> {
        lock(&self.parent).as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Weak<dyn ProcessComponent>) -> Result<()> {
        let mut slot = lock(&self.parent);
        if slot.as_ref().is_some_and(|p| p.strong_count() > 0) {
            return Err(ProcessError::AlreadyAttached(self.id));
        }
        *slot = Some(parent);
        Ok(())
    }

    pub(crate) fn clear_parent(&self) {
        lock(&self.parent).take();
    }

    pub(crate) fn attach_listener(&self, listener: Arc<dyn ProcessComponentListener>) {
        self.listeners.attach(listener);
    }

    pub(crate) fn detach_listener(&self, listener: &Arc<dyn ProcessComponentListener>) -> bool {
        self.listeners.detach(listener)
    }

    /// Applies `next` atomically; `None` means the transition is illegal.
    fn transition<F>(&self, operation: &'static str, next: F) -> Result<Status>
    where
        F: FnOnce(Status) -> Option<Status>,
    {
        let mut outcome = Err(ProcessState::Ready);
        self.status.send_if_modified(|status| match next(*status) {
            Some(updated) => {
                *status = updated;
                outcome = Ok(updated);
                true
            }
            None => {
                outcome = Err(status.state);
                false
            }
        });
        outcome.map_err(|actual| ProcessError::InvalidState {
            component: self.id,
            operation,
            actual,
        })
    }

    /// `Ready → Running`.
    pub(crate) fn begin_start(&self) -> Result<()> {
        self.transition("start", |s| {
            s.state
                .can_start()
                .then(|| Status::entered(ProcessState::Running))
        })?;
        *lock(&self.started_at) = Some(Instant::now());
        metrics::counter!("process_started_total", "kind" => self.kind).increment(1);
        tracing::debug!(id = %self.id, name = %self.name, kind = self.kind, "process component started");
        Ok(())
    }

    /// `{Running, RollingBack} → Paused`, remembering the branch.
    pub(crate) fn pause(&self) -> Result<()> {
        self.transition("pause", |s| {
            s.state.can_pause().then_some(Status {
                state: ProcessState::Paused,
                paused_from: Some(s.state),
            })
        })?;
        tracing::debug!(id = %self.id, name = %self.name, "process component paused");
        Ok(())
    }

    /// `Paused → Running` or `Paused → RollingBack`.
    pub(crate) fn resume(&self) -> Result<()> {
        let status = self.transition("resume", |s| match (s.state, s.paused_from) {
            (ProcessState::Paused, Some(from)) => Some(Status::entered(from)),
            _ => None,
        })?;
        tracing::debug!(id = %self.id, name = %self.name, state = %status.state, "process component resumed");
        Ok(())
    }

    /// Claims the rollback. Only one caller can win this transition.
    pub(crate) fn begin_rollback(&self) -> Result<()> {
        self.transition("cancel", |s| match s.state {
            ProcessState::Running | ProcessState::Succeeded => {
                Some(Status::entered(ProcessState::RollingBack))
            }
            ProcessState::Paused if s.is_executing() => {
                Some(Status::entered(ProcessState::RollingBack))
            }
            _ => None,
        })?;
        Ok(())
    }

    /// Rejects cancellation of components that never started or already failed.
    pub(crate) fn check_cancellable(&self) -> Result<()> {
        match self.state() {
            actual @ (ProcessState::Ready | ProcessState::Failed) => {
                Err(ProcessError::InvalidState {
                    component: self.id,
                    operation: "cancel",
                    actual,
                })
            }
            _ => Ok(()),
        }
    }

    /// Moves to `Succeeded` once the component is not paused.
    ///
    /// Does nothing if the component was cancelled in the meantime.
    pub(crate) async fn complete(&self) {
        loop {
            self.wait_while_paused().await;
            let succeeded = self.transition("succeed", |s| {
                (s.state == ProcessState::Running)
                    .then(|| Status::entered(ProcessState::Succeeded))
            });
            match succeeded {
                Ok(_) => break,
                Err(_) if self.state() == ProcessState::Paused => continue,
                Err(_) => return,
            }
        }

        self.set_progress(1.0);
        self.record_duration();
        metrics::counter!("process_succeeded_total", "kind" => self.kind).increment(1);
        tracing::debug!(id = %self.id, name = %self.name, "process component succeeded");

        for listener in self.listeners.snapshot() {
            listener.on_succeeded();
        }
    }

    /// `RollingBack → Failed`, notifying listeners with `reason`.
    pub(crate) async fn fail(&self, reason: &RollbackReason) {
        *lock(&self.failure) = Some(reason.clone());
        loop {
            self.wait_while_paused().await;
            let failed = self.transition("fail", |s| {
                (s.state == ProcessState::RollingBack)
                    .then(|| Status::entered(ProcessState::Failed))
            });
            match failed {
                Ok(_) => break,
                Err(_) if self.state() == ProcessState::Paused => continue,
                Err(_) => return,
            }
        }

        self.record_duration();
        metrics::counter!("process_failed_total", "kind" => self.kind).increment(1);
        tracing::warn!(id = %self.id, name = %self.name, hint = reason.hint(), "process component rolled back");

        for listener in self.listeners.snapshot() {
            listener.on_failed(reason);
        }
    }

    fn record_duration(&self) {
        if let Some(started_at) = *lock(&self.started_at) {
            metrics::histogram!("process_duration_seconds", "kind" => self.kind)
                .record(started_at.elapsed().as_secs_f64());
        }
    }

    pub(crate) fn record_rollback_error(&self, error: &dyn std::fmt::Display) {
        metrics::counter!("process_rollback_errors_total", "kind" => self.kind).increment(1);
        tracing::warn!(id = %self.id, name = %self.name, %error, "rollback step failed, continuing");
    }

    /// Marks the forward work of a leaf as running.
    ///
    /// The work counts as finished when the guard drops, including when the
    /// future holding it is dropped mid-way.
    pub(crate) fn enter_forward(&self) -> ForwardGuard<'_> {
        self.forward.send_replace(true);
        ForwardGuard {
            forward: &self.forward,
        }
    }

    /// Resolves once no forward work of this component is in flight.
    pub(crate) async fn wait_forward_finished(&self) {
        let mut rx = self.forward.subscribe();
        let _ = rx.wait_for(|running| !running).await;
    }

    pub(crate) async fn wait_while_paused(&self) {
        let mut rx = self.status.subscribe();
        // The sender lives as long as `self`, so this cannot error.
        let _ = rx.wait_for(|s| s.state != ProcessState::Paused).await;
    }

    /// Resolves once a rollback of this component has begun.
    pub(crate) async fn wait_rollback_started(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx
            .wait_for(|s| s.is_rolling_back() || s.state == ProcessState::Failed)
            .await;
    }

    pub(crate) async fn wait_terminal(&self) -> ProcessOutcome {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| s.state.is_terminal()).await;
        self.outcome()
            .unwrap_or_else(|| Err(RollbackReason::from(ProcessError::Abandoned(self.id))))
    }

    /// The outcome if the component is terminal.
    pub(crate) fn outcome(&self) -> Option<ProcessOutcome> {
        match self.state() {
            ProcessState::Succeeded => Some(Ok(())),
            ProcessState::Failed => Some(Err(lock(&self.failure)
                .clone()
                .unwrap_or_else(|| RollbackReason::from(ProcessError::Abandoned(self.id))))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> ComponentCore {
        ComponentCore::new(ProcessId::new(), "test", "step")
    }

    #[test]
    fn test_start_only_from_ready() {
        let core = core();
        core.begin_start().unwrap();
        assert_eq!(core.state(), ProcessState::Running);

        let err = core.begin_start().unwrap_err();
        assert!(matches!(
            err,
            ProcessError::InvalidState {
                operation: "start",
                actual: ProcessState::Running,
                ..
            }
        ));
        assert_eq!(core.state(), ProcessState::Running);
    }

    #[test]
    fn test_pause_remembers_branch() {
        let core = core();
        core.begin_start().unwrap();
        core.pause().unwrap();
        assert!(core.status().is_executing());
        core.resume().unwrap();
        assert_eq!(core.state(), ProcessState::Running);

        core.begin_rollback().unwrap();
        core.pause().unwrap();
        assert!(core.status().is_rolling_back());
        core.resume().unwrap();
        assert_eq!(core.state(), ProcessState::RollingBack);
    }

    #[test]
    fn test_pause_and_resume_rejected_elsewhere() {
        let core = core();
        assert!(core.pause().is_err());
        assert!(core.resume().is_err());
        core.begin_start().unwrap();
        assert!(core.resume().is_err());
    }

    #[test]
    fn test_rollback_claimed_once() {
        let core = core();
        core.begin_start().unwrap();
        core.begin_rollback().unwrap();
        assert!(core.begin_rollback().is_err());
    }

    #[test]
    fn test_rollback_rejected_when_ready_or_paused_in_rollback() {
        let core = core();
        assert!(core.begin_rollback().is_err());

        core.begin_start().unwrap();
        core.begin_rollback().unwrap();
        core.pause().unwrap();
        assert!(core.begin_rollback().is_err());
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let core = core();
        core.set_progress(0.5);
        core.set_progress(0.25);
        assert_eq!(core.progress(), 0.5);
        core.set_progress(3.0);
        assert_eq!(core.progress(), 1.0);
    }

    #[tokio::test]
    async fn test_complete_then_outcome() {
        let core = core();
        core.begin_start().unwrap();
        core.complete().await;
        assert_eq!(core.state(), ProcessState::Succeeded);
        assert!(matches!(core.outcome(), Some(Ok(()))));
        assert!(core.wait_terminal().await.is_ok());
    }

    #[tokio::test]
    async fn test_forward_guard_releases_waiters_on_drop() {
        let core = Arc::new(core());
        let guard = core.enter_forward();

        let waiter = {
            let core = core.clone();
            tokio::spawn(async move { core.wait_forward_finished().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        core.wait_forward_finished().await;
    }

    #[tokio::test]
    async fn test_fail_records_reason() {
        let core = core();
        core.begin_start().unwrap();
        core.begin_rollback().unwrap();
        core.fail(&RollbackReason::from_hint("boom")).await;
        let reason = core.wait_terminal().await.unwrap_err();
        assert_eq!(reason.hint(), "boom");
    }
}
