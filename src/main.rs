//! tunnelctl demo shell.
//!
//! Drives a full session lifecycle against the in-process loopback tunnel
//! service: bind the controller, install the trust anchor once at startup,
//! run the consent gate for the connect attempt, assemble the
//! filter/consumer set, connect, intercept for a while, then disconnect and
//! unbind. Every state transition is logged through a registered observer.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tunnelctl::cli::Cli;
use tunnelctl::config::ConfigLoader;
use tunnelctl::consent::{ConsentAuthority, ConsentDecision, ConsentGate};
use tunnelctl::service::{LoopbackService, SessionService};
use tunnelctl::session::{
    ConnectionRequest, Direction, FlowDescriptor, FlowVerdict, PacketConsumer, SessionController,
    SessionObserver, SessionState, TrafficFilter,
};
use tunnelctl::trust::{TrustAnchorInstaller, TrustStore};

/// Observer mirroring the front-end's enable/disable logic: the connect
/// action is available unless a session is already connecting or connected.
#[derive(Default)]
struct ShellObserver {
    connect_enabled: AtomicBool,
}

impl SessionObserver for ShellObserver {
    fn on_state_changed(&self, state: SessionState) {
        info!("Session state changed: {}", state);
        let enabled = !matches!(state, SessionState::Connecting | SessionState::Connected);
        self.connect_enabled.store(enabled, Ordering::SeqCst);
    }
}

/// Intercepts flows targeting the configured remote ports.
struct PortFilter {
    ports: Vec<u16>,
}

impl TrafficFilter for PortFilter {
    fn decide(&self, flow: &FlowDescriptor) -> FlowVerdict {
        if self.ports.contains(&flow.remote_port) {
            FlowVerdict::Intercept
        } else {
            FlowVerdict::Bypass
        }
    }
}

/// Counts captured packets and logs them at debug level.
#[derive(Default)]
struct LoggingConsumer {
    packets: AtomicUsize,
}

impl PacketConsumer for LoggingConsumer {
    fn on_packet(&self, packet: &[u8], direction: Direction, user_id: &str) {
        self.packets.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Captured {} byte {} packet for user '{}'",
            packet.len(),
            direction,
            user_id
        );
    }
}

/// Stand-in for the OS consent surface: the right is either held or the
/// prompt is answered with a denial by the shell itself.
struct StaticAuthority {
    held: bool,
}

impl ConsentAuthority for StaticAuthority {
    fn is_held(&self) -> bool {
        self.held
    }
    fn prompt(&self, code: Uuid) {
        debug!("Consent prompt fired for request {}", code);
    }
}

/// Stand-in for the platform trust store with the anchor already present.
struct PreinstalledStore;

impl TrustStore for PreinstalledStore {
    fn is_installed(&self) -> bool {
        true
    }
    fn begin_install(&self, code: Uuid) {
        debug!("Trust install flow started for request {}", code);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;
    debug!("Loaded configuration: {:?}", config);

    // In-process stand-in for the background tunnel engine.
    let service: Arc<dyn SessionService> = match &cli.refuse_connect {
        Some(reason) => Arc::new(LoopbackService::refusing(
            config.loopback.timing(),
            reason.clone(),
        )),
        None => Arc::new(LoopbackService::new(config.loopback.timing())),
    };

    let controller = SessionController::spawn(service);
    let shell = Arc::new(ShellObserver::default());
    controller.register_observer(shell.clone());

    // Bind before any session commands are valid.
    controller.bind();

    // Trust anchor install is triggered once at startup, independent of
    // connection attempts; its outcome is advisory.
    if !cli.skip_trust_install {
        let installer = TrustAnchorInstaller::new(Arc::new(PreinstalledStore));
        let (_code, outcome_rx) = installer.install_if_needed();
        match outcome_rx.await {
            Ok(outcome) => info!("Trust anchor: {:?}", outcome),
            Err(_) => warn!("Trust install flow went away without an outcome"),
        }
    }

    if !controller
        .wait_for(SessionState::BoundIdle, Duration::from_secs(5))
        .await
    {
        anyhow::bail!("Timed out binding to the session service");
    }
    debug!(
        "Connect action enabled: {}",
        shell.connect_enabled.load(Ordering::SeqCst)
    );

    // Consent is re-checked on every connect attempt; a previous grant may
    // have been revoked outside our control.
    let gate = Arc::new(ConsentGate::new(Arc::new(StaticAuthority {
        held: !cli.deny_consent,
    })));
    let (code, decision_rx) = gate.check_or_request();
    if gate.pending_count() > 0 {
        // Nobody is wired to the prompt in this demo; answer it ourselves.
        let gate = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = gate.resolve(code, ConsentDecision::Denied);
        });
    }

    let decision = tokio::time::timeout(config.consent.prompt_timeout(), decision_rx).await;
    match decision {
        Ok(Ok(ConsentDecision::Granted)) => info!("Tunnel consent granted"),
        Ok(Ok(ConsentDecision::Denied)) => {
            warn!("Tunnel consent denied; not connecting");
            return teardown(&controller).await;
        }
        _ => {
            gate.cancel(code);
            anyhow::bail!("Consent prompt timed out");
        }
    }

    // Assemble the traffic-handling set for exactly this attempt.
    let inbound = Arc::new(LoggingConsumer::default());
    let outbound = Arc::new(LoggingConsumer::default());
    let mut request = ConnectionRequest::new(
        Arc::new(PortFilter {
            ports: config.intercept.ports.clone(),
        }),
        inbound.clone(),
        outbound.clone(),
        config.session.user_id.clone(),
    );
    if let Some(token) = &config.session.auth_token {
        request = request.with_auth_token(token.clone());
    }

    controller.connect(request);

    match wait_connect_outcome(&controller, config.session.connect_timeout()).await {
        SessionState::Connected => {
            info!("Tunnel up; intercepting for {}s", cli.run_secs);
            tokio::time::sleep(Duration::from_secs(cli.run_secs)).await;

            controller.disconnect();
            controller
                .wait_for(SessionState::BoundIdle, Duration::from_secs(5))
                .await;
            info!(
                "Session closed: {} inbound / {} outbound packets captured",
                inbound.packets.load(Ordering::SeqCst),
                outbound.packets.load(Ordering::SeqCst),
            );
        }
        SessionState::DisconnectedError => {
            let reason = controller
                .last_error()
                .unwrap_or_else(|| "unknown".to_string());
            warn!("Connect failed: {}", reason);
            // Acknowledge the error to return to BOUND_IDLE.
            controller.disconnect();
            controller
                .wait_for(SessionState::BoundIdle, Duration::from_secs(1))
                .await;
        }
        other => warn!("Connect attempt did not resolve (still {})", other),
    }

    teardown(&controller).await
}

/// Unbind and stop the controller task.
async fn teardown(controller: &SessionController) -> Result<()> {
    controller.unbind();
    controller
        .wait_for(SessionState::Unbound, Duration::from_secs(1))
        .await;
    controller.shutdown();
    Ok(())
}

/// Wait until a connect attempt resolves to `Connected` or
/// `DisconnectedError`, or `timeout` elapses.
async fn wait_connect_outcome(controller: &SessionController, timeout: Duration) -> SessionState {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = controller.state();
        if matches!(
            state,
            SessionState::Connected | SessionState::DisconnectedError
        ) || tokio::time::Instant::now() >= deadline
        {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// # Verbosity Levels
/// - 0 (default): Only warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
