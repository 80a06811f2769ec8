//! Trust-anchor installation for traffic interception.
//!
//! Transparent inspection of encrypted traffic requires a locally installed
//! root-of-trust certificate. The `TrustAnchorInstaller` checks whether the
//! anchor is present and, if not, starts the external install flow; the
//! outcome is delivered exactly once per invocation through a `oneshot`
//! channel correlated by a request code.
//!
//! Installation is deliberately decoupled from the connect flow: it is
//! typically triggered once at startup, its request codes live in a
//! separate space from consent requests, and its outcome never gates
//! `bind()` or `connect()` at the type level. Callers wanting enforcement
//! check the outcome themselves.

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Result of one trust-anchor install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustInstallOutcome {
    /// The anchor is installed (or already was).
    Installed,
    /// The user declined the installation.
    Declined,
    /// The installation failed.
    Failed(String),
}

/// The external store/flow the installer drives.
pub trait TrustStore: Send + Sync {
    /// Whether the trust anchor is already installed.
    fn is_installed(&self) -> bool;

    /// Start the external install flow for `code`. The eventual outcome
    /// must be fed back via [`TrustAnchorInstaller::resolve`].
    fn begin_install(&self, code: Uuid);
}

/// Sequences one-shot trust-anchor installation.
pub struct TrustAnchorInstaller {
    store: std::sync::Arc<dyn TrustStore>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<TrustInstallOutcome>>>,
}

impl TrustAnchorInstaller {
    /// Create an installer over the given store.
    pub fn new(store: std::sync::Arc<dyn TrustStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Install the trust anchor unless it is already present.
    ///
    /// Always returns a request code and a receiver for the outcome; when
    /// the anchor is present, `Installed` is delivered through the same
    /// channel without starting the flow.
    pub fn install_if_needed(&self) -> (Uuid, oneshot::Receiver<TrustInstallOutcome>) {
        let code = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        if self.store.is_installed() {
            debug!("Trust anchor already installed, request {}", code);
            let _ = tx.send(TrustInstallOutcome::Installed);
        } else {
            debug!("Trust anchor missing, starting install (request {})", code);
            self.pending.lock().unwrap().insert(code, tx);
            self.store.begin_install(code);
        }

        (code, rx)
    }

    /// Record the install flow's outcome for a pending request.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is unknown or the requester dropped
    /// its receiver.
    pub fn resolve(&self, code: Uuid, outcome: TrustInstallOutcome) -> Result<(), TrustError> {
        let tx = self
            .pending
            .lock()
            .unwrap()
            .remove(&code)
            .ok_or(TrustError::NotFound(code))?;

        debug!("Trust install request {} resolved: {:?}", code, outcome);
        tx.send(outcome).map_err(|_| TrustError::Abandoned(code))
    }

    /// Number of install requests still awaiting an outcome.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Errors from trust-installer operations.
#[derive(Debug, Error)]
pub enum TrustError {
    /// No pending install request with this code.
    #[error("Trust install request {0} not found")]
    NotFound(Uuid),

    /// The requester stopped waiting before the outcome arrived.
    #[error("Trust install request {0} was abandoned by the requester")]
    Abandoned(Uuid),
}
