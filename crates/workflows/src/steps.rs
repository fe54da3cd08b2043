//! Generic DHT step bodies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dht::{DhtClient, DhtEntry, DhtKey, ProtectionKey, Version};
use process::{ResultStepBody, RollbackReason, StepBody};
use tokio::sync::Mutex;

use crate::WorkflowError;

/// What a [`PutStep`] has to undo.
#[derive(Debug)]
enum Written {
    Created,
    Replaced(DhtEntry),
}

/// Stores one entry.
///
/// The put is conditional on the version read just before it, so a
/// concurrent writer makes the step fail instead of being overwritten.
/// Rollback removes the entry again, or restores the content it replaced.
pub struct PutStep {
    dht: Arc<dyn DhtClient>,
    key: DhtKey,
    content: Vec<u8>,
    protection_key: Option<ProtectionKey>,
    written: Mutex<Option<Written>>,
}

impl PutStep {
    pub fn new(
        dht: Arc<dyn DhtClient>,
        key: DhtKey,
        content: Vec<u8>,
        protection_key: Option<ProtectionKey>,
    ) -> Self {
        Self {
            dht,
            key,
            content,
            protection_key,
            written: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &DhtKey {
        &self.key
    }
}

#[async_trait]
impl StepBody for PutStep {
    async fn execute(&self) -> Result<(), RollbackReason> {
        let hint = || format!("could not store {}", self.key);

        let previous = self
            .dht
            .get(&self.key)
            .await
            .map_err(|e| RollbackReason::new(e, hint()))?;
        let expected = previous
            .as_ref()
            .map(|entry| entry.version)
            .unwrap_or(Version::initial());

        self.dht
            .put(
                &self.key,
                self.content.clone(),
                Some(expected),
                self.protection_key.as_ref(),
            )
            .await
            .map_err(|e| RollbackReason::new(e, hint()))?;

        *self.written.lock().await = Some(match previous {
            Some(entry) => Written::Replaced(entry),
            None => Written::Created,
        });
        Ok(())
    }

    async fn rollback(&self, _reason: &RollbackReason) -> Result<(), RollbackReason> {
        let Some(written) = self.written.lock().await.take() else {
            return Ok(());
        };
        match written {
            Written::Created => {
                self.dht
                    .remove(&self.key, self.protection_key.as_ref())
                    .await?;
            }
            Written::Replaced(previous) => {
                self.dht
                    .put(&self.key, previous.content, None, self.protection_key.as_ref())
                    .await?;
            }
        }
        tracing::debug!(key = %self.key, "put compensated");
        Ok(())
    }
}

/// Removes one entry. Rollback puts the removed entry back.
pub struct RemoveStep {
    dht: Arc<dyn DhtClient>,
    key: DhtKey,
    protection_key: Option<ProtectionKey>,
    removed: Mutex<Option<DhtEntry>>,
}

impl RemoveStep {
    pub fn new(dht: Arc<dyn DhtClient>, key: DhtKey, protection_key: Option<ProtectionKey>) -> Self {
        Self {
            dht,
            key,
            protection_key,
            removed: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &DhtKey {
        &self.key
    }
}

#[async_trait]
impl StepBody for RemoveStep {
    async fn execute(&self) -> Result<(), RollbackReason> {
        let removed = self
            .dht
            .remove(&self.key, self.protection_key.as_ref())
            .await
            .map_err(|e| RollbackReason::new(e, format!("could not remove {}", self.key)))?;
        if removed.is_none() {
            tracing::debug!(key = %self.key, "nothing to remove");
        }
        *self.removed.lock().await = removed;
        Ok(())
    }

    async fn rollback(&self, _reason: &RollbackReason) -> Result<(), RollbackReason> {
        let Some(entry) = self.removed.lock().await.take() else {
            return Ok(());
        };
        self.dht
            .put(
                &self.key,
                entry.content,
                Some(Version::initial()),
                entry.protection_key.as_ref(),
            )
            .await?;
        tracing::debug!(key = %self.key, "removal compensated");
        Ok(())
    }
}

/// Reads one entry, failing when it does not exist.
pub struct GetStep {
    dht: Arc<dyn DhtClient>,
    key: DhtKey,
}

impl GetStep {
    pub fn new(dht: Arc<dyn DhtClient>, key: DhtKey) -> Self {
        Self { dht, key }
    }
}

#[async_trait]
impl ResultStepBody for GetStep {
    type Output = DhtEntry;

    async fn execute(&self) -> Result<DhtEntry, RollbackReason> {
        let entry = self.dht.get(&self.key).await?;
        entry.ok_or_else(|| {
            let hint = format!("{} does not exist", self.key);
            RollbackReason::new(WorkflowError::NotFound(self.key.clone()), hint)
        })
    }
}

/// Waits before running the wrapped body, modelling a slow link.
pub struct DelayedStep<B> {
    delay: Duration,
    body: B,
}

impl<B> DelayedStep<B> {
    pub fn new(delay: Duration, body: B) -> Self {
        Self { delay, body }
    }

    pub fn inner(&self) -> &B {
        &self.body
    }
}

#[async_trait]
impl<B: StepBody> StepBody for DelayedStep<B> {
    async fn execute(&self) -> Result<(), RollbackReason> {
        tokio::time::sleep(self.delay).await;
        self.body.execute().await
    }

    async fn rollback(&self, reason: &RollbackReason) -> Result<(), RollbackReason> {
        self.body.rollback(reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht::InMemoryDht;
    use process::{ProcessComponent, ProcessState, ProcessStep, ResultComponent, ResultStep};

    fn store() -> (InMemoryDht, Arc<dyn DhtClient>) {
        let dht = InMemoryDht::new();
        let client: Arc<dyn DhtClient> = Arc::new(dht.clone());
        (dht, client)
    }

    #[tokio::test]
    async fn test_put_rollback_removes_created_entry() {
        let (dht, client) = store();
        let key = DhtKey::new("file-1", "meta");
        let step = ProcessStep::new("put", PutStep::new(client, key.clone(), b"m".to_vec(), None));

        step.start().await.unwrap();
        assert!(dht.contains(&key).await);

        step.cancel(RollbackReason::from_hint("undo")).await.unwrap();
        assert!(!dht.contains(&key).await);
    }

    #[tokio::test]
    async fn test_put_rollback_restores_replaced_content() {
        let (dht, client) = store();
        let key = DhtKey::new("file-1", "meta");
        dht.put(&key, b"old".to_vec(), None, None).await.unwrap();

        let step = ProcessStep::new("put", PutStep::new(client, key.clone(), b"new".to_vec(), None));
        step.start().await.unwrap();
        assert_eq!(dht.get(&key).await.unwrap().unwrap().content, b"new");

        step.cancel(RollbackReason::from_hint("undo")).await.unwrap();
        assert_eq!(dht.get(&key).await.unwrap().unwrap().content, b"old");
    }

    #[tokio::test]
    async fn test_failed_put_has_nothing_to_undo() {
        let (dht, client) = store();
        let key = DhtKey::new("file-1", "chunk-0");
        dht.fail_put_for(key.clone()).await;

        let step = ProcessStep::new("put", PutStep::new(client, key.clone(), vec![1], None));
        step.start().await.unwrap();

        let reason = step.wait().await.unwrap_err();
        assert_eq!(reason.hint(), "could not store file-1/chunk-0");
        assert!(reason.downcast_cause::<dht::DhtError>().is_some());
        assert_eq!(dht.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_rollback_restores_entry() {
        let (dht, client) = store();
        let key = DhtKey::new("file-1", "meta");
        let owner = ProtectionKey::new("owner");
        dht.put(&key, b"m".to_vec(), None, Some(&owner)).await.unwrap();

        let step = ProcessStep::new("remove", RemoveStep::new(client, key.clone(), Some(owner.clone())));
        step.start().await.unwrap();
        assert!(!dht.contains(&key).await);

        step.cancel(RollbackReason::from_hint("undo")).await.unwrap();
        let restored = dht.get(&key).await.unwrap().unwrap();
        assert_eq!(restored.content, b"m");
        assert_eq!(restored.protection_key, Some(owner));
    }

    #[tokio::test]
    async fn test_get_yields_entry_or_fails() {
        let (dht, client) = store();
        let key = DhtKey::new("file-1", "meta");
        dht.put(&key, b"m".to_vec(), None, None).await.unwrap();

        let found = ResultStep::new("get", GetStep::new(client.clone(), key));
        found.start().await.unwrap();
        assert_eq!(found.result().unwrap().content, b"m");

        let missing = ResultStep::new("get", GetStep::new(client, DhtKey::new("file-2", "meta")));
        missing.start().await.unwrap();
        assert_eq!(missing.state(), ProcessState::Failed);
        let reason = missing.wait().await.unwrap_err();
        assert!(matches!(
            reason.downcast_cause::<WorkflowError>(),
            Some(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delayed_step_waits_before_running() {
        let (dht, client) = store();
        let key = DhtKey::new("file-1", "chunk-0");
        let step = Arc::new(ProcessStep::new(
            "slow put",
            DelayedStep::new(
                Duration::from_millis(50),
                PutStep::new(client, key.clone(), vec![0], None),
            ),
        ));

        let runner = step.clone();
        let task = tokio::spawn(async move { runner.start().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!dht.contains(&key).await);

        task.await.unwrap().unwrap();
        assert!(dht.contains(&key).await);
        assert_eq!(step.body().inner().key(), &key);
    }
}
