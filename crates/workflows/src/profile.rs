//! The per-user profile listing the user's files.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dht::{DhtClient, DhtError, DhtKey, ProtectionKey, Version};
use process::{RollbackReason, StepBody};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Result, WorkflowError};

/// Read-modify-write attempts before giving up on a contended profile.
const MAX_ATTEMPTS: u32 = 3;

pub fn profile_key(owner: &str) -> DhtKey {
    DhtKey::new(owner, "profile")
}

/// The profile document stored under [`profile_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub files: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileChange {
    AddFile(String),
    RemoveFile(String),
}

impl ProfileChange {
    /// Applies the change, returning whether the profile was modified.
    pub fn apply(&self, profile: &mut UserProfile) -> bool {
        match self {
            Self::AddFile(file_id) => profile.files.insert(file_id.clone()),
            Self::RemoveFile(file_id) => profile.files.remove(file_id),
        }
    }

    pub fn inverse(&self) -> Self {
        match self {
            Self::AddFile(file_id) => Self::RemoveFile(file_id.clone()),
            Self::RemoveFile(file_id) => Self::AddFile(file_id.clone()),
        }
    }
}

/// Applies a [`ProfileChange`] with optimistic concurrency, retrying when
/// another writer updated the profile in between.
///
/// Rollback applies the inverse change, but only if this step actually
/// modified the profile.
pub struct ProfileStep {
    dht: Arc<dyn DhtClient>,
    owner: String,
    change: ProfileChange,
    protection_key: Option<ProtectionKey>,
    applied: Mutex<bool>,
}

impl ProfileStep {
    pub fn new(
        dht: Arc<dyn DhtClient>,
        owner: impl Into<String>,
        change: ProfileChange,
        protection_key: Option<ProtectionKey>,
    ) -> Self {
        Self {
            dht,
            owner: owner.into(),
            change,
            protection_key,
            applied: Mutex::new(false),
        }
    }

    async fn update(&self, change: &ProfileChange) -> Result<bool> {
        let key = profile_key(&self.owner);

        for attempt in 1..=MAX_ATTEMPTS {
            let (mut profile, version) = match self.dht.get(&key).await? {
                Some(entry) => (entry.decode::<UserProfile>()?, entry.version),
                None => (UserProfile::default(), Version::initial()),
            };
            if !change.apply(&mut profile) {
                return Ok(false);
            }

            let content = serde_json::to_vec(&profile)?;
            match self
                .dht
                .put(&key, content, Some(version), self.protection_key.as_ref())
                .await
            {
                Ok(_) => return Ok(true),
                Err(DhtError::VersionConflict { .. }) => {
                    tracing::debug!(owner = %self.owner, attempt, "profile changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(WorkflowError::ProfileContention {
            owner: self.owner.clone(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

#[async_trait]
impl StepBody for ProfileStep {
    async fn execute(&self) -> std::result::Result<(), RollbackReason> {
        let applied = self.update(&self.change).await.map_err(|e| {
            let hint = format!("could not update the profile of {}", self.owner);
            RollbackReason::new(e, hint)
        })?;
        *self.applied.lock().await = applied;
        Ok(())
    }

    async fn rollback(&self, _reason: &RollbackReason) -> std::result::Result<(), RollbackReason> {
        let mut applied = self.applied.lock().await;
        if !*applied {
            return Ok(());
        }
        self.update(&self.change.inverse()).await?;
        *applied = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht::InMemoryDht;
    use process::{ProcessComponent, ProcessStep};

    async fn files(dht: &InMemoryDht, owner: &str) -> BTreeSet<String> {
        match dht.get(&profile_key(owner)).await.unwrap() {
            Some(entry) => entry.decode::<UserProfile>().unwrap().files,
            None => BTreeSet::new(),
        }
    }

    #[test]
    fn test_change_inverse() {
        let mut profile = UserProfile::default();
        let add = ProfileChange::AddFile("f1".to_string());

        assert!(add.apply(&mut profile));
        assert!(!add.apply(&mut profile));
        assert!(add.inverse().apply(&mut profile));
        assert!(profile.files.is_empty());
    }

    #[tokio::test]
    async fn test_add_and_compensate() {
        let dht = InMemoryDht::new();
        let step = ProcessStep::new(
            "profile",
            ProfileStep::new(
                Arc::new(dht.clone()),
                "alice",
                ProfileChange::AddFile("f1".to_string()),
                None,
            ),
        );

        step.start().await.unwrap();
        assert!(files(&dht, "alice").await.contains("f1"));

        step.cancel(RollbackReason::from_hint("undo")).await.unwrap();
        assert!(files(&dht, "alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_profile_is_not_compensated() {
        let dht = InMemoryDht::new();
        let client: Arc<dyn DhtClient> = Arc::new(dht.clone());
        let first = ProcessStep::new(
            "first",
            ProfileStep::new(client.clone(), "alice", ProfileChange::AddFile("f1".into()), None),
        );
        first.start().await.unwrap();

        let second = ProcessStep::new(
            "second",
            ProfileStep::new(client, "alice", ProfileChange::AddFile("f1".into()), None),
        );
        second.start().await.unwrap();
        second.cancel(RollbackReason::from_hint("undo")).await.unwrap();

        assert!(files(&dht, "alice").await.contains("f1"));
    }

    #[tokio::test]
    async fn test_foreign_protection_key_fails_the_step() {
        let dht = InMemoryDht::new();
        let profile = serde_json::to_vec(&UserProfile::default()).unwrap();
        dht.put(&profile_key("alice"), profile, None, Some(&ProtectionKey::new("alice")))
            .await
            .unwrap();

        let step = ProcessStep::new(
            "profile",
            ProfileStep::new(
                Arc::new(dht.clone()),
                "alice",
                ProfileChange::AddFile("f1".into()),
                Some(ProtectionKey::new("mallory")),
            ),
        );
        step.start().await.unwrap();

        let reason = step.wait().await.unwrap_err();
        assert_eq!(reason.hint(), "could not update the profile of alice");
        assert!(files(&dht, "alice").await.is_empty());
    }
}
