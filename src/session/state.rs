//! Session connection states.

use serde::{Deserialize, Serialize};

/// The connection state of an interception session.
///
/// Exactly one value is held at any instant, owned by the controller task.
/// Everything outside the controller receives copies, either through
/// observer notifications or the state snapshot, and never mutates the
/// state directly. Transitions are totally ordered; no two are ever in
/// flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not bound to the background tunnel service. No session commands
    /// are valid in this state.
    Unbound,
    /// Bound to the service with no session running. The only state in
    /// which a connect attempt is accepted.
    BoundIdle,
    /// A connect was issued and the service has not yet confirmed.
    Connecting,
    /// The tunnel is up; traffic flows through the active filter and
    /// consumer set.
    Connected,
    /// A stop was issued and the service has not yet acknowledged.
    Disconnecting,
    /// The last connect attempt failed. Call `disconnect()` to acknowledge
    /// the error and return to `BoundIdle`; a fresh connect is not accepted
    /// directly from this state.
    DisconnectedError,
}

impl SessionState {
    /// Whether a new connect attempt would be accepted in this state.
    #[must_use]
    pub fn connect_eligible(&self) -> bool {
        matches!(self, SessionState::BoundIdle)
    }

    /// Whether the controller holds a live binding to the service.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !matches!(self, SessionState::Unbound)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unbound => write!(f, "UNBOUND"),
            SessionState::BoundIdle => write!(f, "BOUND_IDLE"),
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::Disconnecting => write!(f, "DISCONNECTING"),
            SessionState::DisconnectedError => write!(f, "DISCONNECTED_ERROR"),
        }
    }
}
