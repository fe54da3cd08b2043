//! Shared identifier types for the process framework.

pub mod ids;

pub use ids::{IdSource, ProcessId, RandomIdSource, SequentialIdSource};
