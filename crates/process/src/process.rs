//! The composite abstraction.

use std::sync::Arc;

use crate::component::ProcessComponent;
use crate::error::Result;

/// A component that owns an ordered list of child components.
///
/// Adding a child installs the process as the child's parent; removing it
/// clears the link. Insertion order is execution order. Positions whose
/// child has already been started cannot be modified.
pub trait Process: ProcessComponent {
    /// Appends a child.
    fn add(&self, component: Arc<dyn ProcessComponent>) -> Result<()>;

    /// Inserts a child at `index`, shifting later children.
    fn insert(&self, index: usize, component: Arc<dyn ProcessComponent>) -> Result<()>;

    /// Removes a child, returning the owning reference.
    fn remove(&self, component: &dyn ProcessComponent) -> Result<Arc<dyn ProcessComponent>>;

    /// A snapshot of the children in execution order.
    fn components(&self) -> Vec<Arc<dyn ProcessComponent>>;
}
