//! Sequential composite with reverse-order compensation.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use common::{IdSource, ProcessId};
use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::base::{ComponentCore, lock};
use crate::component::{ProcessComponent, ProcessOutcome};
use crate::error::{ProcessError, Result};
use crate::handle::AsyncHandle;
use crate::lifecycle::{self, Compensable, Executable};
use crate::listener::ProcessComponentListener;
use crate::process::Process;
use crate::reason::RollbackReason;
use crate::state::ProcessState;

#[derive(Default)]
struct Cursor {
    children: Vec<Arc<dyn ProcessComponent>>,
    /// Next child to start.
    execution_index: usize,
    /// Number of children that have been started; never decreases.
    started: usize,
    /// Children below this index still need to be rolled back.
    rollback_index: usize,
}

/// Runs its children one after the other in insertion order.
///
/// Children wrapped in an [`AsyncComponent`](crate::AsyncComponent) are
/// forked and the process moves on without waiting; it joins all of them
/// before succeeding. A forked child that failed is noticed before the next
/// child starts, or at the final join.
///
/// On failure every started child is cancelled, most recently started
/// first.
pub struct SequentialProcess {
    this: Weak<SequentialProcess>,
    core: ComponentCore,
    cursor: Mutex<Cursor>,
    async_handles: Mutex<Vec<AsyncHandle>>,
}

impl SequentialProcess {
    /// Creates an empty process with a random ID.
    ///
    /// Processes are always shared so their children can refer back to
    /// them.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_id(ProcessId::new(), name)
    }

    pub fn with_id(id: ProcessId, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            core: ComponentCore::new(id, name, "sequential"),
            cursor: Mutex::new(Cursor::default()),
            async_handles: Mutex::new(Vec::new()),
        })
    }

    pub fn from_source(ids: &dyn IdSource, name: impl Into<String>) -> Arc<Self> {
        Self::with_id(ids.next_id(), name)
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        lock(&self.cursor).children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first failure among forked children that has already resolved.
    fn first_async_failure(&self) -> Option<RollbackReason> {
        lock(&self.async_handles)
            .iter()
            .find_map(|handle| handle.outcome().and_then(|outcome| outcome.err()))
    }

    /// Takes the next child and marks it as the rollback boundary.
    fn claim_next(&self) -> Option<Arc<dyn ProcessComponent>> {
        let mut cursor = lock(&self.cursor);
        let child = cursor.children.get(cursor.execution_index).cloned()?;
        cursor.started = cursor.execution_index + 1;
        cursor.rollback_index = cursor.started;
        Some(child)
    }

    fn advance(&self) {
        let (done, total) = {
            let mut cursor = lock(&self.cursor);
            cursor.execution_index += 1;
            (cursor.execution_index, cursor.children.len())
        };
        self.core.set_progress(done as f64 / total as f64);
    }

    /// The next started child to compensate, walking backwards.
    fn claim_rollback(&self) -> Option<Arc<dyn ProcessComponent>> {
        let mut cursor = lock(&self.cursor);
        if cursor.rollback_index == 0 {
            return None;
        }
        cursor.rollback_index -= 1;
        cursor.children.get(cursor.rollback_index).cloned()
    }

    /// Waits for every forked child, stopping early on the first failure or
    /// when this process starts rolling back.
    async fn join(&self) -> std::result::Result<(), RollbackReason> {
        let handles = lock(&self.async_handles).clone();
        if handles.is_empty() {
            return Ok(());
        }
        tracing::debug!(id = %self.core.id(), forked = handles.len(), "joining forked components");

        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|handle| async move { handle.wait().await })
            .collect();
        let aborted = self.core.wait_rollback_started();
        tokio::pin!(aborted);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    None => return Ok(()),
                    Some(Ok(())) => continue,
                    Some(Err(reason)) => return Err(reason),
                },
                () = &mut aborted => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl Compensable for SequentialProcess {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    async fn rollback(&self, reason: &RollbackReason) {
        loop {
            self.core.wait_while_paused().await;
            let Some(child) = self.claim_rollback() else {
                break;
            };
            match child.state() {
                ProcessState::Ready | ProcessState::Failed => continue,
                _ => {}
            }
            if let Err(error) = child.cancel(reason.clone()).await {
                self.core.record_rollback_error(&error);
            }
        }
    }
}

#[async_trait]
impl Executable for SequentialProcess {
    async fn execute(&self) -> std::result::Result<(), RollbackReason> {
        loop {
            self.core.wait_while_paused().await;
            match self.core.state() {
                ProcessState::Running => {}
                ProcessState::Paused => continue,
                _ => return Ok(()),
            }
            if let Some(reason) = self.first_async_failure() {
                tracing::debug!(id = %self.core.id(), hint = reason.hint(), "forked component failed");
                return Err(reason);
            }
            let Some(child) = self.claim_next() else {
                break;
            };

            child.start().await?;
            if let Some(handle) = child.async_handle() {
                lock(&self.async_handles).push(handle);
            }
            self.advance();
        }

        if self.core.status().is_executing() {
            self.join().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessComponent for SequentialProcess {
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

impl Process for SequentialProcess {
    fn add(&self, component: Arc<dyn ProcessComponent>) -> Result<()> {
        let index = self.len();
        self.insert(index, component)
    }

    fn insert(&self, index: usize, component: Arc<dyn ProcessComponent>) -> Result<()> {
        let mut cursor = lock(&self.cursor);
        let len = cursor.children.len();
        if index > len {
            return Err(ProcessError::IndexOutOfBounds { index, len });
        }
        if index < cursor.started {
            return Err(ProcessError::AlreadyStarted {
                index,
                started: cursor.started,
            });
        }
        if cursor.children.iter().any(|c| c.id() == component.id()) {
            return Err(ProcessError::DuplicateComponent(component.id()));
        }

        let parent: Weak<dyn ProcessComponent> = self.this.clone();
        component.set_parent(parent)?;
        cursor.children.insert(index, component);
        Ok(())
    }

    fn remove(&self, component: &dyn ProcessComponent) -> Result<Arc<dyn ProcessComponent>> {
        let mut cursor = lock(&self.cursor);
        let index = cursor
            .children
            .iter()
            .position(|c| c.id() == component.id())
            .ok_or(ProcessError::ComponentNotFound(component.id()))?;
        if index < cursor.started {
            return Err(ProcessError::AlreadyStarted {
                index,
                started: cursor.started,
            });
        }

        let removed = cursor.children.remove(index);
        removed.clear_parent();
        Ok(removed)
    }

    fn components(&self) -> Vec<Arc<dyn ProcessComponent>> {
        lock(&self.cursor).children.clone()
    }
}
