//! Bind/unbind lifecycle to the background service.
//!
//! Binding is asynchronous: `bind` fires the request and the service later
//! emits `ServiceEvent::Bound` with a `BindingHandle`. The binder tracks the
//! phase so that duplicate binds are no-ops and a `Bound` event arriving
//! after an unbind (a stale completion) is recognized and dropped.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BindingHandle, ServiceEvent, SessionService};

/// Where the binding lifecycle currently stands.
enum BindingPhase {
    Unbound,
    Binding,
    Bound(BindingHandle),
}

/// Manages the bind/unbind lifecycle to one background service.
///
/// Owned by the controller task; all methods are called from that task.
pub struct ServiceBinder {
    service: Arc<dyn SessionService>,
    events_tx: mpsc::UnboundedSender<ServiceEvent>,
    phase: BindingPhase,
}

impl ServiceBinder {
    /// Create a binder over `service`, delivering events on `events_tx`.
    pub fn new(
        service: Arc<dyn SessionService>,
        events_tx: mpsc::UnboundedSender<ServiceEvent>,
    ) -> Self {
        Self {
            service,
            events_tx,
            phase: BindingPhase::Unbound,
        }
    }

    /// Initiate an asynchronous bind. No-op while already binding or bound.
    pub fn bind(&mut self) {
        match self.phase {
            BindingPhase::Unbound => {
                debug!("Binding to session service");
                self.phase = BindingPhase::Binding;
                self.service.bind(self.events_tx.clone());
            }
            BindingPhase::Binding | BindingPhase::Bound(_) => {
                debug!("bind() ignored: already binding or bound");
            }
        }
    }

    /// Record a completed bind. Returns false and drops the handle when the
    /// completion is stale (no bind is in flight, e.g. after an unbind).
    pub fn complete_bind(&mut self, handle: BindingHandle) -> bool {
        match self.phase {
            BindingPhase::Binding => {
                debug!("Bound to session service (binding {})", handle.id());
                self.phase = BindingPhase::Bound(handle);
                true
            }
            _ => {
                debug!("Dropping stale bind completion {}", handle.id());
                false
            }
        }
    }

    /// Tear down the binding. Safe to call when never bound.
    pub fn unbind(&mut self) {
        match self.phase {
            BindingPhase::Unbound => {
                debug!("unbind() ignored: not bound");
            }
            BindingPhase::Binding | BindingPhase::Bound(_) => {
                debug!("Unbinding from session service");
                self.service.unbind();
                self.phase = BindingPhase::Unbound;
            }
        }
    }

    /// Invalidate the binding after the service died, without issuing an
    /// unbind call to a service that is no longer there.
    pub fn mark_dead(&mut self) {
        self.phase = BindingPhase::Unbound;
    }

    /// The handle of the live binding, if bound.
    pub fn handle(&self) -> Option<&BindingHandle> {
        match &self.phase {
            BindingPhase::Bound(handle) => Some(handle),
            _ => None,
        }
    }

    /// Whether a bind has completed.
    pub fn is_bound(&self) -> bool {
        matches!(self.phase, BindingPhase::Bound(_))
    }

    /// The service this binder manages.
    pub fn service(&self) -> &Arc<dyn SessionService> {
        &self.service
    }
}
