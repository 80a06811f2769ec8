//! Observer registration and state-change broadcast.
//!
//! Observers are notified on every discrete state transition, including
//! transitions they did not cause. Notification uses snapshot-on-notify:
//! the registry is cloned under the lock and observers are invoked outside
//! it, so registering or unregistering concurrently with an in-flight
//! notification never deadlocks or invalidates the iteration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use super::state::SessionState;

/// Receives session state-change notifications.
///
/// Exactly one call per discrete transition; transitions are never skipped,
/// reordered, or coalesced. Calls arrive on the controller's owner task, so
/// implementations must not block.
pub trait SessionObserver: Send + Sync {
    /// Called after the session state has changed to `state`.
    fn on_state_changed(&self, state: SessionState);
}

/// Token identifying a registered observer, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Mutation-safe set of registered observers.
pub struct ObserverRegistry {
    observers: Mutex<Vec<(ObserverId, Arc<dyn SessionObserver>)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer; the returned id unregisters it later.
    pub fn register(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().unwrap().push((id, observer));
        trace!("Registered observer {:?}", id);
        id
    }

    /// Unregister an observer. Returns false if the id was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().unwrap();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Notify every registered observer of a transition.
    ///
    /// A registry with zero observers is valid; the call is a no-op.
    pub fn notify(&self, state: SessionState) {
        let snapshot: Vec<Arc<dyn SessionObserver>> = self
            .observers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, obs)| obs.clone())
            .collect();

        for observer in snapshot {
            observer.on_state_changed(state);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.lock().unwrap().is_empty()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
