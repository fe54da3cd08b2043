//! Client abstraction for the distributed hash table the sync workflows
//! store file metadata, chunks and profiles in.
//!
//! Entries are addressed by a location key plus a content key, carry a
//! monotonically increasing version for optimistic concurrency, and may be
//! guarded by a protection key that must be presented to overwrite or
//! remove them.

pub mod client;
pub mod entry;
pub mod error;
pub mod memory;

pub use client::DhtClient;
pub use entry::{DhtEntry, DhtKey, ProtectionKey, Version};
pub use error::{DhtError, Result};
pub use memory::InMemoryDht;
