use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{DhtClient, DhtEntry, DhtError, DhtKey, ProtectionKey, Result, Version};

#[derive(Debug, Default)]
struct InMemoryDhtState {
    entries: HashMap<DhtKey, DhtEntry>,
    fail_on_put: bool,
    failing_keys: HashSet<DhtKey>,
}

/// In-memory DHT for tests and local runs.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDht {
    state: Arc<RwLock<InMemoryDhtState>>,
}

impl InMemoryDht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent put fail with `Unavailable`.
    pub async fn set_fail_on_put(&self, fail: bool) {
        self.state.write().await.fail_on_put = fail;
    }

    /// Makes puts to `key` fail with `Unavailable`.
    pub async fn fail_put_for(&self, key: DhtKey) {
        self.state.write().await.failing_keys.insert(key);
    }

    /// Returns the number of stored entries.
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn contains(&self, key: &DhtKey) -> bool {
        self.state.read().await.entries.contains_key(key)
    }

    /// Removes all entries and failure injections.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.failing_keys.clear();
        state.fail_on_put = false;
    }
}

fn check_protection(
    key: &DhtKey,
    stored: &DhtEntry,
    presented: Option<&ProtectionKey>,
) -> Result<()> {
    match &stored.protection_key {
        Some(guard) if presented != Some(guard) => {
            metrics::counter!("dht_conflicts_total", "reason" => "protection").increment(1);
            Err(DhtError::ProtectionKeyMismatch(key.clone()))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl DhtClient for InMemoryDht {
    #[tracing::instrument(skip(self, content, protection_key), fields(key = %key, len = content.len()))]
    async fn put(
        &self,
        key: &DhtKey,
        content: Vec<u8>,
        expected_version: Option<Version>,
        protection_key: Option<&ProtectionKey>,
    ) -> Result<Version> {
        let mut state = self.state.write().await;

        if state.fail_on_put || state.failing_keys.contains(key) {
            return Err(DhtError::Unavailable(format!("put to {key} rejected")));
        }

        let current = state.entries.get(key);
        let current_version = current.map(|e| e.version).unwrap_or(Version::initial());

        if let Some(expected) = expected_version
            && expected != current_version
        {
            metrics::counter!("dht_conflicts_total", "reason" => "version").increment(1);
            return Err(DhtError::VersionConflict {
                key: key.clone(),
                expected,
                actual: current_version,
            });
        }
        if let Some(stored) = current {
            check_protection(key, stored, protection_key)?;
        }

        let version = current_version.next();
        state.entries.insert(
            key.clone(),
            DhtEntry {
                content,
                version,
                protection_key: protection_key.cloned(),
                stored_at: Utc::now(),
            },
        );
        metrics::counter!("dht_puts_total").increment(1);
        tracing::debug!(%version, "entry stored");

        Ok(version)
    }

    async fn get(&self, key: &DhtKey) -> Result<Option<DhtEntry>> {
        Ok(self.state.read().await.entries.get(key).cloned())
    }

    #[tracing::instrument(skip(self, protection_key), fields(key = %key))]
    async fn remove(
        &self,
        key: &DhtKey,
        protection_key: Option<&ProtectionKey>,
    ) -> Result<Option<DhtEntry>> {
        let mut state = self.state.write().await;

        let Some(stored) = state.entries.get(key) else {
            return Ok(None);
        };
        check_protection(key, stored, protection_key)?;

        let removed = state.entries.remove(key);
        metrics::counter!("dht_removes_total").increment(1);
        tracing::debug!("entry removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let dht = InMemoryDht::new();
        let key = DhtKey::new("file-1", "meta");

        let version = dht.put(&key, b"hello".to_vec(), None, None).await.unwrap();
        assert_eq!(version, Version::new(1));

        let entry = dht.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.content, b"hello");
        assert_eq!(entry.version, Version::new(1));
        assert_eq!(dht.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_overwrite_bumps_version() {
        let dht = InMemoryDht::new();
        let key = DhtKey::new("file-1", "meta");

        dht.put(&key, b"a".to_vec(), None, None).await.unwrap();
        let version = dht
            .put(&key, b"b".to_vec(), Some(Version::new(1)), None)
            .await
            .unwrap();

        assert_eq!(version, Version::new(2));
        assert_eq!(dht.get(&key).await.unwrap().unwrap().content, b"b");
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let dht = InMemoryDht::new();
        let key = DhtKey::new("file-1", "meta");
        dht.put(&key, b"a".to_vec(), None, None).await.unwrap();

        let result = dht
            .put(&key, b"b".to_vec(), Some(Version::initial()), None)
            .await;

        assert!(matches!(
            result,
            Err(DhtError::VersionConflict { expected, actual, .. })
                if expected == Version::initial() && actual == Version::new(1)
        ));
        assert_eq!(dht.get(&key).await.unwrap().unwrap().content, b"a");
    }

    #[tokio::test]
    async fn test_protected_entry_rejects_other_writers() {
        let dht = InMemoryDht::new();
        let key = DhtKey::new("alice", "profile");
        let owner = ProtectionKey::new("owner");
        let intruder = ProtectionKey::new("intruder");

        dht.put(&key, b"v1".to_vec(), None, Some(&owner)).await.unwrap();

        let overwrite = dht.put(&key, b"v2".to_vec(), None, Some(&intruder)).await;
        assert!(matches!(overwrite, Err(DhtError::ProtectionKeyMismatch(_))));
        let unkeyed = dht.remove(&key, None).await;
        assert!(matches!(unkeyed, Err(DhtError::ProtectionKeyMismatch(_))));

        let removed = dht.remove(&key, Some(&owner)).await.unwrap().unwrap();
        assert_eq!(removed.content, b"v1");
        assert!(!dht.contains(&key).await);
    }

    #[tokio::test]
    async fn test_remove_missing_is_none() {
        let dht = InMemoryDht::new();
        let removed = dht.remove(&DhtKey::new("x", "y"), None).await.unwrap();
        assert!(removed.is_none());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let dht = InMemoryDht::new();
        let flaky = DhtKey::new("file-1", "chunk-2");
        dht.fail_put_for(flaky.clone()).await;

        assert!(dht.put(&DhtKey::new("file-1", "chunk-1"), vec![1], None, None).await.is_ok());
        assert!(matches!(
            dht.put(&flaky, vec![2], None, None).await,
            Err(DhtError::Unavailable(_))
        ));

        dht.set_fail_on_put(true).await;
        assert!(dht.put(&DhtKey::new("file-1", "chunk-3"), vec![3], None, None).await.is_err());

        dht.clear().await;
        assert!(dht.put(&flaky, vec![2], None, None).await.is_ok());
    }
}
