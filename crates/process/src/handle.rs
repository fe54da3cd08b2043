//! Join handles of forked components.

use common::ProcessId;
use tokio::sync::watch;

use crate::component::ProcessOutcome;
use crate::error::ProcessError;
use crate::reason::RollbackReason;

/// The outcome of a forked component, available once it has finished.
///
/// Backed by a watch channel, so a resolution is never lost: querying or
/// awaiting after the fork finished sees the stored outcome. Clones observe
/// the same resolution.
#[derive(Debug, Clone)]
pub struct AsyncHandle {
    component: ProcessId,
    rx: watch::Receiver<Option<ProcessOutcome>>,
}

impl AsyncHandle {
    /// The forked component this handle belongs to.
    pub fn component(&self) -> ProcessId {
        self.component
    }

    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The outcome, without blocking.
    pub fn outcome(&self) -> Option<ProcessOutcome> {
        self.rx.borrow().clone()
    }

    /// Waits for the forked component to resolve.
    pub async fn wait(&self) -> ProcessOutcome {
        let mut rx = self.rx.clone();
        let resolved = rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone());
        match resolved {
            Ok(Some(outcome)) => outcome,
            _ => Err(RollbackReason::from(ProcessError::Abandoned(self.component))),
        }
    }
}

/// The write side of an [`AsyncHandle`]. The first resolution wins.
pub(crate) struct HandleResolver {
    component: ProcessId,
    tx: watch::Sender<Option<ProcessOutcome>>,
}

impl HandleResolver {
    pub(crate) fn new(component: ProcessId) -> Self {
        let (tx, _) = watch::channel(None);
        Self { component, tx }
    }

    pub(crate) fn handle(&self) -> AsyncHandle {
        AsyncHandle {
            component: self.component,
            rx: self.tx.subscribe(),
        }
    }

    /// Returns false if the handle was already resolved.
    pub(crate) fn resolve(&self, outcome: ProcessOutcome) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }
}
