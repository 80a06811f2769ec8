//! One-time user authorization for creating a privileged tunnel.
//!
//! Creating a system-level interception tunnel requires an OS-granted
//! right. The `ConsentGate` checks whether the right is currently held and,
//! if not, fires the asynchronous OS prompt; the grant or denial arrives
//! later through a `oneshot` channel correlated by a request code, so
//! multiple in-flight requests stay distinguishable.
//!
//! A grant can be revoked outside this system's control (another app may
//! claim exclusive tunnel rights), so callers must run the gate again on
//! every connect attempt and never cache a previous result.
//!
//! # Example
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use tunnelctl::consent::{ConsentAuthority, ConsentDecision, ConsentGate};
//! use uuid::Uuid;
//!
//! struct OsAuthority;
//! impl ConsentAuthority for OsAuthority {
//!     fn is_held(&self) -> bool { false }
//!     fn prompt(&self, _code: Uuid) { /* fire the OS dialog */ }
//! }
//!
//! let gate = ConsentGate::new(Arc::new(OsAuthority));
//! let (code, rx) = gate.check_or_request();
//!
//! // The dialog callback resolves the request.
//! gate.resolve(code, ConsentDecision::Granted)?;
//! assert_eq!(rx.await?, ConsentDecision::Granted);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// The user's answer to the tunnel-creation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
    /// The right was granted; a connect attempt may proceed.
    Granted,
    /// The right was denied; the caller must not call connect.
    Denied,
}

/// The OS surface the gate consults and prompts through.
pub trait ConsentAuthority: Send + Sync {
    /// Whether the tunnel-creation right is currently held.
    fn is_held(&self) -> bool;

    /// Fire the asynchronous OS consent prompt for `code`. The eventual
    /// answer must be fed back via [`ConsentGate::resolve`].
    fn prompt(&self, code: Uuid);
}

/// Gate obtaining user authorization before a connect attempt.
pub struct ConsentGate {
    authority: std::sync::Arc<dyn ConsentAuthority>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ConsentDecision>>>,
}

impl ConsentGate {
    /// Create a gate over the given authority.
    pub fn new(authority: std::sync::Arc<dyn ConsentAuthority>) -> Self {
        Self {
            authority,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Check the right and prompt if it is not held.
    ///
    /// Always returns a request code and a receiver for the decision. When
    /// the right is already held, `Granted` is delivered through the same
    /// channel without prompting, so callers handle both cases uniformly.
    pub fn check_or_request(&self) -> (Uuid, oneshot::Receiver<ConsentDecision>) {
        let code = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        if self.authority.is_held() {
            debug!("Consent already held, short-circuiting request {}", code);
            let _ = tx.send(ConsentDecision::Granted);
        } else {
            debug!("Consent not held, prompting (request {})", code);
            self.pending.lock().unwrap().insert(code, tx);
            self.authority.prompt(code);
        }

        (code, rx)
    }

    /// Record the prompt's answer for a pending request.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is unknown (never issued, already
    /// resolved, or cancelled) or the requester dropped its receiver.
    pub fn resolve(&self, code: Uuid, decision: ConsentDecision) -> Result<(), ConsentError> {
        let tx = self
            .pending
            .lock()
            .unwrap()
            .remove(&code)
            .ok_or(ConsentError::NotFound(code))?;

        debug!("Consent request {} resolved: {:?}", code, decision);
        tx.send(decision).map_err(|_| ConsentError::Abandoned(code))
    }

    /// Cancel a pending request (e.g. on prompt timeout). Returns true if
    /// the request was still pending.
    pub fn cancel(&self, code: Uuid) -> bool {
        let removed = self.pending.lock().unwrap().remove(&code).is_some();
        if removed {
            debug!("Cancelled consent request {}", code);
        }
        removed
    }

    /// Number of requests still awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Errors from consent-gate operations.
#[derive(Debug, Error)]
pub enum ConsentError {
    /// No pending request with this code.
    #[error("Consent request {0} not found")]
    NotFound(Uuid),

    /// The requester stopped waiting before the answer arrived.
    #[error("Consent request {0} was abandoned by the requester")]
    Abandoned(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StaticAuthority {
        held: bool,
        prompts: AtomicUsize,
    }

    impl StaticAuthority {
        fn new(held: bool) -> Self {
            Self {
                held,
                prompts: AtomicUsize::new(0),
            }
        }
    }

    impl ConsentAuthority for StaticAuthority {
        fn is_held(&self) -> bool {
            self.held
        }
        fn prompt(&self, _code: Uuid) {
            self.prompts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_short_circuit_when_held() {
        let authority = Arc::new(StaticAuthority::new(true));
        let gate = ConsentGate::new(authority.clone());

        let (_code, rx) = gate.check_or_request();
        assert_eq!(rx.await.unwrap(), ConsentDecision::Granted);

        // No prompt fired and nothing left pending.
        assert_eq!(authority.prompts.load(Ordering::SeqCst), 0);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_prompt_and_grant() {
        let authority = Arc::new(StaticAuthority::new(false));
        let gate = ConsentGate::new(authority.clone());

        let (code, rx) = gate.check_or_request();
        assert_eq!(authority.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.pending_count(), 1);

        gate.resolve(code, ConsentDecision::Granted).unwrap();
        assert_eq!(rx.await.unwrap(), ConsentDecision::Granted);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_prompt_and_deny() {
        let gate = ConsentGate::new(Arc::new(StaticAuthority::new(false)));

        let (code, rx) = gate.check_or_request();
        gate.resolve(code, ConsentDecision::Denied).unwrap();
        assert_eq!(rx.await.unwrap(), ConsentDecision::Denied);
    }

    #[tokio::test]
    async fn test_in_flight_requests_are_distinguishable() {
        let gate = ConsentGate::new(Arc::new(StaticAuthority::new(false)));

        let (code_a, rx_a) = gate.check_or_request();
        let (code_b, rx_b) = gate.check_or_request();
        assert_ne!(code_a, code_b);

        gate.resolve(code_b, ConsentDecision::Denied).unwrap();
        gate.resolve(code_a, ConsentDecision::Granted).unwrap();

        assert_eq!(rx_a.await.unwrap(), ConsentDecision::Granted);
        assert_eq!(rx_b.await.unwrap(), ConsentDecision::Denied);
    }

    #[test]
    fn test_resolve_unknown_code() {
        let gate = ConsentGate::new(Arc::new(StaticAuthority::new(false)));
        let result = gate.resolve(Uuid::new_v4(), ConsentDecision::Granted);
        assert!(matches!(result, Err(ConsentError::NotFound(_))));
    }

    #[test]
    fn test_cancel() {
        let gate = ConsentGate::new(Arc::new(StaticAuthority::new(false)));

        let (code, _rx) = gate.check_or_request();
        assert!(gate.cancel(code));
        assert!(!gate.cancel(code));

        // A cancelled request can no longer be resolved.
        assert!(matches!(
            gate.resolve(code, ConsentDecision::Granted),
            Err(ConsentError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolve_after_receiver_dropped() {
        let gate = ConsentGate::new(Arc::new(StaticAuthority::new(false)));

        let (code, rx) = gate.check_or_request();
        drop(rx);

        assert!(matches!(
            gate.resolve(code, ConsentDecision::Granted),
            Err(ConsentError::Abandoned(_))
        ));
    }
}
