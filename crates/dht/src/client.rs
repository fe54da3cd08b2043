use async_trait::async_trait;

use crate::{DhtEntry, DhtKey, ProtectionKey, Result, Version};

/// Operations the workflows need from the DHT.
#[async_trait]
pub trait DhtClient: Send + Sync {
    /// Stores `content` under `key` and returns the new version.
    ///
    /// With `expected_version` set, the put fails with `VersionConflict`
    /// unless the stored entry is at that version (`Version::initial()` for
    /// "must not exist"). Overwriting an entry guarded by a different
    /// protection key fails with `ProtectionKeyMismatch`. The given key
    /// guards the new entry.
    async fn put(
        &self,
        key: &DhtKey,
        content: Vec<u8>,
        expected_version: Option<Version>,
        protection_key: Option<&ProtectionKey>,
    ) -> Result<Version>;

    /// Fetches the entry under `key`, if any.
    async fn get(&self, key: &DhtKey) -> Result<Option<DhtEntry>>;

    /// Removes the entry under `key`, returning it.
    ///
    /// Removing a missing entry is not an error.
    async fn remove(
        &self,
        key: &DhtKey,
        protection_key: Option<&ProtectionKey>,
    ) -> Result<Option<DhtEntry>>;
}
