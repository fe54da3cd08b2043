use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a process component within a tree.
///
/// Listener callbacks, tracing fields and error variants all name a
/// component by this value. IDs are ordered so that a
/// [`SequentialIdSource`] yields them in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(Uuid);

impl ProcessId {
    /// A fresh random (v4) ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The ID handed out as the `n`th by a sequential source.
    pub fn from_sequence(n: u64) -> Self {
        Self(Uuid::from_u128(u128::from(n)))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for ProcessId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A source of process IDs, handed to whoever builds a process tree.
pub trait IdSource: Send + Sync {
    /// Returns the next identifier.
    fn next_id(&self) -> ProcessId;
}

/// Hands out random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn next_id(&self) -> ProcessId {
        ProcessId::new()
    }
}

/// Hands out deterministic, strictly increasing IDs starting at 1.
#[derive(Debug, Default)]
pub struct SequentialIdSource {
    next: AtomicU64,
}

impl SequentialIdSource {
    /// Creates a new sequential source.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for SequentialIdSource {
    fn next_id(&self) -> ProcessId {
        ProcessId::from_sequence(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_id_new_creates_unique_ids() {
        let id1 = ProcessId::new();
        let id2 = ProcessId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn process_id_converts_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = ProcessId::from(uuid);
        assert_eq!(id.as_uuid(), uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }

    #[test]
    fn process_id_serializes_as_plain_uuid() {
        let id = ProcessId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let deserialized: ProcessId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn sequential_source_is_monotonic() {
        let source = SequentialIdSource::new();
        let a = source.next_id();
        let b = source.next_id();
        let c = source.next_id();
        assert!(a < b && b < c);
        assert_eq!(a, ProcessId::from_sequence(1));
    }

    #[test]
    fn random_source_never_repeats() {
        let source = RandomIdSource;
        assert_ne!(source.next_id(), source.next_id());
    }
}
