//! The session controller: single source of truth for session state.
//!
//! All state lives in a driver task that processes front-end commands and
//! background-service events through one `select!` loop, so transitions are
//! totally ordered and observers never see a torn or duplicated update.
//! The public `SessionController` is a cheap clone-able handle; its
//! operations are fire-and-forget sends onto the driver's command channel.
//!
//! # State machine
//!
//! ```text
//!            bind ok                 connect               ok
//! UNBOUND ──────────────> BOUND_IDLE ───────> CONNECTING ──────> CONNECTED
//!    ^                        ^  ^               │    │              │
//!    │                        │  └── disconnect ─┤    │ failure      │ disconnect
//!    │        stop ack        │                  │    v              │
//!    └─── unbind / death ──── DISCONNECTING <────┘  DISCONNECTED_ERROR
//! ```
//!
//! `unbind()` (and unexpected service death) force-transitions to `UNBOUND`
//! from any state. A connect outcome arriving for a superseded attempt is
//! dropped, keyed by a monotonically increasing attempt id.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::observer::{ObserverId, ObserverRegistry, SessionObserver};
use super::request::ConnectionRequest;
use super::state::SessionState;
use crate::service::{AttemptId, ServiceBinder, ServiceEvent, SessionService};

/// Front-end commands marshaled onto the driver task.
enum Command {
    Bind,
    Unbind,
    Connect(ConnectionRequest),
    Disconnect,
    Shutdown,
}

/// State shared between the handle and the driver task.
struct Shared {
    observers: ObserverRegistry,
    last_error: Mutex<Option<String>>,
}

/// Handle to a running session controller.
///
/// Construct one per session with [`SessionController::spawn`]; clone the
/// handle freely and pass it to whatever needs to issue commands or observe
/// state. Dropping every handle shuts the driver task down, unbinding first.
#[derive(Clone)]
pub struct SessionController {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    shared: Arc<Shared>,
}

impl SessionController {
    /// Spawn the controller task over a background service.
    ///
    /// The initial state is `Unbound`; call [`bind`](Self::bind) before any
    /// session commands.
    pub fn spawn(service: Arc<dyn SessionService>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Unbound);
        let shared = Arc::new(Shared {
            observers: ObserverRegistry::new(),
            last_error: Mutex::new(None),
        });

        let driver = Driver {
            binder: ServiceBinder::new(service, event_tx),
            shared: shared.clone(),
            state_tx,
            state: SessionState::Unbound,
            active: None,
            next_attempt: 0,
            current_attempt: None,
        };
        tokio::spawn(driver.run(cmd_rx, event_rx));

        Self {
            cmd_tx,
            state_rx,
            shared,
        }
    }

    /// Initiate an asynchronous bind to the background service.
    /// Idempotent; completion surfaces as a `BoundIdle` notification.
    pub fn bind(&self) {
        self.send(Command::Bind);
    }

    /// Tear down the binding from any state. Safe when never bound; call
    /// before front-end teardown to avoid leaking the service connection.
    pub fn unbind(&self) {
        self.send(Command::Unbind);
    }

    /// Attempt a connection with the supplied traffic-handling set.
    ///
    /// The caller must already hold the tunnel-creation consent; the
    /// controller does not request it. Accepted only in `BoundIdle` —
    /// anything else is rejected with zero side effects. The outcome is
    /// observed asynchronously via state notifications.
    pub fn connect(&self, request: ConnectionRequest) {
        let state = self.state();
        if !state.connect_eligible() {
            warn!("connect rejected: session is {}", state);
            return;
        }
        self.send(Command::Connect(request));
    }

    /// Drive the session back toward `BoundIdle`.
    ///
    /// Valid in any state except `Unbound`. Safe mid-connect (cancels the
    /// attempt) and reentrant: a second call while a stop is already in
    /// flight is a no-op with no duplicate notification. From
    /// `DisconnectedError` this acknowledges the failure and returns to
    /// `BoundIdle` directly.
    pub fn disconnect(&self) {
        if !self.state().is_bound() {
            warn!("disconnect ignored: not bound");
            return;
        }
        self.send(Command::Disconnect);
    }

    /// Stop the driver task, unbinding first.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// The reason of the most recent connect failure, if any. Cleared when
    /// a new attempt is accepted.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }

    /// Wait until the session reaches `target`, up to `timeout`.
    ///
    /// Intended for shells and tests that sequence on stable states; for
    /// every discrete transition, register an observer instead.
    pub async fn wait_for(&self, target: SessionState, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Register an observer for state-change notifications.
    pub fn register_observer(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        self.shared.observers.register(observer)
    }

    /// Unregister an observer. Returns false if the id was not registered.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.unregister(id)
    }

    fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("Session controller task is gone; command dropped");
        }
    }
}

/// Owner of all mutable session state. Runs as a dedicated task.
struct Driver {
    binder: ServiceBinder,
    shared: Arc<Shared>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    /// The filter/consumer set of the in-flight or established connection.
    active: Option<ConnectionRequest>,
    next_attempt: AttemptId,
    /// The attempt whose outcome is still awaited. `None` means any
    /// arriving outcome is stale and must be dropped.
    current_attempt: Option<AttemptId>,
}

impl Driver {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut event_rx: mpsc::UnboundedReceiver<ServiceEvent>,
    ) {
        debug!("Session controller task started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                ev = event_rx.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    // The binder holds a sender, so this only happens once
                    // the driver itself is being torn down.
                    None => break,
                },
            }
        }
        self.handle_unbind();
        debug!("Session controller task stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Bind => self.binder.bind(),
            Command::Unbind => self.handle_unbind(),
            Command::Connect(request) => self.handle_connect(request),
            Command::Disconnect => self.handle_disconnect(),
            Command::Shutdown => unreachable!("handled in run()"),
        }
    }

    fn handle_connect(&mut self, request: ConnectionRequest) {
        if self.state != SessionState::BoundIdle {
            warn!("connect rejected: session is {}", self.state);
            return;
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.current_attempt = Some(attempt);
        self.shared.last_error.lock().unwrap().take();
        self.active = Some(request.clone());

        info!(
            "Starting session attempt {} for user '{}'",
            attempt,
            request.user_id()
        );
        self.binder.service().start_session(attempt, request);
        self.transition(SessionState::Connecting);
    }

    fn handle_disconnect(&mut self) {
        match self.state {
            SessionState::Unbound => warn!("disconnect ignored: not bound"),
            SessionState::BoundIdle => debug!("disconnect ignored: already idle"),
            SessionState::Disconnecting => {
                debug!("disconnect ignored: stop already in flight");
            }
            SessionState::Connecting | SessionState::Connected => {
                // Mid-connect this is a cancellation: invalidate the attempt
                // so a late outcome cannot resurrect CONNECTED.
                self.current_attempt = None;
                self.binder.service().stop_session();
                self.transition(SessionState::Disconnecting);
            }
            SessionState::DisconnectedError => {
                // Acknowledge the failure; nothing is running to tear down.
                self.transition(SessionState::BoundIdle);
            }
        }
    }

    fn handle_unbind(&mut self) {
        self.binder.unbind();
        self.detach_active();
        self.current_attempt = None;
        if self.state != SessionState::Unbound {
            self.transition(SessionState::Unbound);
        }
    }

    fn handle_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::Bound { handle } => {
                if self.binder.complete_bind(handle) {
                    self.transition(SessionState::BoundIdle);
                }
            }
            ServiceEvent::ConnectOutcome { attempt, result } => {
                if self.current_attempt != Some(attempt)
                    || self.state != SessionState::Connecting
                {
                    debug!("Dropping stale connect outcome for attempt {}", attempt);
                    return;
                }
                match result {
                    Ok(()) => {
                        info!("Session attempt {} established", attempt);
                        self.transition(SessionState::Connected);
                    }
                    Err(reason) => {
                        warn!("Session attempt {} failed: {}", attempt, reason);
                        *self.shared.last_error.lock().unwrap() = Some(reason);
                        self.detach_active();
                        self.current_attempt = None;
                        self.transition(SessionState::DisconnectedError);
                    }
                }
            }
            ServiceEvent::Stopped => {
                if self.state == SessionState::Disconnecting {
                    self.detach_active();
                    self.transition(SessionState::BoundIdle);
                } else {
                    debug!("Dropping stop acknowledgement in state {}", self.state);
                }
            }
            ServiceEvent::Died { reason } => {
                // Same observable path as a clean unbind: a single UNBOUND
                // transition. The reason stays in the logs.
                warn!("Session service died: {}", reason);
                self.binder.mark_dead();
                self.detach_active();
                self.current_attempt = None;
                if self.state != SessionState::Unbound {
                    self.transition(SessionState::Unbound);
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        let prev = self.state;
        if prev == next {
            debug!("Suppressing no-op transition in {}", prev);
            return;
        }
        self.state = next;
        info!("Session state: {} -> {}", prev, next);
        // Observers first: anything sequencing on the snapshot must find
        // every notification for earlier transitions already delivered.
        self.shared.observers.notify(next);
        let _ = self.state_tx.send(next);
    }

    fn detach_active(&mut self) {
        if self.active.take().is_some() {
            debug!("Released active filter/consumer set");
        }
    }
}
