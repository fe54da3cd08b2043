//! Listener interfaces and the listener registry shared by all components.

use std::sync::{Arc, Mutex};

use crate::base::lock;
use crate::reason::RollbackReason;

/// Receives the terminal notifications of a process component.
///
/// Callbacks run synchronously on the thread that performed the state
/// transition, before the triggering lifecycle call returns. They must not
/// block.
pub trait ProcessComponentListener: Send + Sync {
    /// The component reached `Succeeded`.
    fn on_succeeded(&self);

    /// The component reached `Failed` after rolling back.
    fn on_failed(&self, reason: &RollbackReason);
}

/// Receives the value produced by a result-bearing component.
///
/// `on_result_ready` is always delivered before the component's
/// `on_succeeded`.
pub trait ProcessResultListener<T>: Send + Sync {
    /// The result is available.
    fn on_result_ready(&self, result: &T);
}

/// A set of listeners that may be mutated while notifications go out.
///
/// Notification iterates over a snapshot, so listeners attached or detached
/// during a callback take effect for the next notification only.
pub(crate) struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn attach(&self, listener: Arc<L>) {
        let mut listeners = lock(&self.listeners);
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub(crate) fn detach(&self, listener: &Arc<L>) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<L>> {
        lock(&self.listeners).clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.listeners).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        succeeded: AtomicUsize,
    }

    impl ProcessComponentListener for Counting {
        fn on_succeeded(&self) {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failed(&self, _reason: &RollbackReason) {}
    }

    #[test]
    fn test_attach_is_idempotent_per_listener() {
        let set: ListenerSet<dyn ProcessComponentListener> = ListenerSet::new();
        let listener: Arc<dyn ProcessComponentListener> = Arc::new(Counting::default());

        set.attach(listener.clone());
        set.attach(listener.clone());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_detach_removes_only_that_listener() {
        let set: ListenerSet<dyn ProcessComponentListener> = ListenerSet::new();
        let a: Arc<dyn ProcessComponentListener> = Arc::new(Counting::default());
        let b: Arc<dyn ProcessComponentListener> = Arc::new(Counting::default());
        set.attach(a.clone());
        set.attach(b.clone());

        assert!(set.detach(&a));
        assert!(!set.detach(&a));
        assert_eq!(set.len(), 1);
        assert!(Arc::ptr_eq(&set.snapshot()[0], &b));
    }

    #[test]
    fn test_snapshot_is_detached_from_later_changes() {
        let set: ListenerSet<dyn ProcessComponentListener> = ListenerSet::new();
        let counting = Arc::new(Counting::default());
        set.attach(counting.clone());

        let snapshot = set.snapshot();
        set.detach(&(counting.clone() as Arc<dyn ProcessComponentListener>));
        for listener in snapshot {
            listener.on_succeeded();
        }
        assert_eq!(counting.succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }
}
