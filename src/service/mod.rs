//! The background tunnel service surface and the binding lifecycle.
//!
//! The actual packet capture/tunneling engine is an external collaborator
//! reached only through the `SessionService` trait. Its results never return
//! synchronously: they arrive later as `ServiceEvent`s on the channel handed
//! over at bind time, and the controller marshals them onto its owner task
//! before mutating any state.

pub mod binder;
pub mod loopback;

pub use binder::ServiceBinder;
pub use loopback::{LoopbackService, LoopbackTiming};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::request::ConnectionRequest;

/// Identifier for one connect attempt, monotonically increasing per
/// controller. Used to suppress callbacks from superseded attempts.
pub type AttemptId = u64;

/// Proof of a live binding to the background service.
///
/// Exists only while the session is bound; invalidated on unbind or when
/// the service dies.
#[derive(Debug, Clone)]
pub struct BindingHandle {
    id: Uuid,
    bound_at: DateTime<Utc>,
}

impl BindingHandle {
    /// Create a fresh handle. Called by the service on successful bind.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            bound_at: Utc::now(),
        }
    }

    /// Unique id of this binding.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the binding was established.
    pub fn bound_at(&self) -> DateTime<Utc> {
        self.bound_at
    }
}

impl Default for BindingHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Asynchronous results emitted by the background service.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// The bind completed; the handle proves the live binding.
    Bound {
        /// Handle for the established binding.
        handle: BindingHandle,
    },
    /// A connect attempt finished, successfully or with a reason string.
    ConnectOutcome {
        /// The attempt this outcome belongs to.
        attempt: AttemptId,
        /// `Ok` for an established tunnel, `Err` with the failure reason.
        result: Result<(), String>,
    },
    /// The service acknowledged a stop request.
    Stopped,
    /// The service went away unexpectedly (crash, OS kill).
    Died {
        /// Human-readable reason, for logging only.
        reason: String,
    },
}

/// Control surface of the background tunnel service.
///
/// All operations are fire-and-forget from the caller's perspective;
/// results arrive as `ServiceEvent`s on the channel supplied to `bind`.
pub trait SessionService: Send + Sync {
    /// Begin an asynchronous bind. Eventually emits `ServiceEvent::Bound`
    /// on `events`; the service keeps the sender for the binding lifetime.
    fn bind(&self, events: mpsc::UnboundedSender<ServiceEvent>);

    /// Tear down the binding. Must be safe to call when never bound.
    fn unbind(&self);

    /// Start a session for `attempt` with the supplied traffic-handling
    /// configuration. Emits `ServiceEvent::ConnectOutcome` when resolved.
    fn start_session(&self, attempt: AttemptId, request: ConnectionRequest);

    /// Stop the running session (or cancel one being established).
    /// Emits `ServiceEvent::Stopped` when torn down.
    fn stop_session(&self);
}
