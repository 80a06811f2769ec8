//! In-process session service for demos and integration tests.
//!
//! `LoopbackService` implements the full `SessionService` contract without
//! a real tunnel engine: binds and connects resolve after configurable
//! delays, and while a session is up it pumps synthetic packets through the
//! supplied filter/consumer set. `kill` simulates a service crash.
//!
//! Must be used from within a tokio runtime; every asynchronous result is
//! delivered from a spawned task, never from the calling thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AttemptId, BindingHandle, ServiceEvent, SessionService};
use crate::session::request::{ConnectionRequest, Direction, FlowDescriptor, FlowVerdict, Protocol};

/// Delays applied to the loopback service's asynchronous results.
#[derive(Debug, Clone)]
pub struct LoopbackTiming {
    /// Delay before a bind completes.
    pub bind_delay: Duration,
    /// Delay before a connect attempt resolves.
    pub connect_delay: Duration,
    /// Delay before a stop is acknowledged.
    pub stop_delay: Duration,
    /// Interval between synthetic packets while connected.
    pub packet_interval: Duration,
}

impl Default for LoopbackTiming {
    fn default() -> Self {
        Self {
            bind_delay: Duration::from_millis(10),
            connect_delay: Duration::from_millis(10),
            stop_delay: Duration::from_millis(5),
            packet_interval: Duration::from_millis(20),
        }
    }
}

struct LoopbackInner {
    events: Option<mpsc::UnboundedSender<ServiceEvent>>,
    running: Option<Arc<AtomicBool>>,
}

/// An in-process `SessionService` with scriptable outcomes and latencies.
pub struct LoopbackService {
    timing: LoopbackTiming,
    refuse_reason: Option<String>,
    inner: Mutex<LoopbackInner>,
}

impl LoopbackService {
    /// Create a loopback service that accepts connect attempts.
    #[must_use]
    pub fn new(timing: LoopbackTiming) -> Self {
        Self {
            timing,
            refuse_reason: None,
            inner: Mutex::new(LoopbackInner {
                events: None,
                running: None,
            }),
        }
    }

    /// Create a loopback service that refuses every connect attempt with
    /// `reason`, e.g. to model a missing tunnel-creation right.
    #[must_use]
    pub fn refusing(timing: LoopbackTiming, reason: impl Into<String>) -> Self {
        Self {
            timing,
            refuse_reason: Some(reason.into()),
            inner: Mutex::new(LoopbackInner {
                events: None,
                running: None,
            }),
        }
    }

    /// Simulate an unexpected service death: the packet pump stops and a
    /// single `Died` event is emitted on the binding's event channel.
    pub fn kill(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(flag) = inner.running.take() {
            flag.store(false, Ordering::SeqCst);
        }
        if let Some(events) = inner.events.take() {
            let _ = events.send(ServiceEvent::Died {
                reason: reason.into(),
            });
        }
    }
}

impl SessionService for LoopbackService {
    fn bind(&self, events: mpsc::UnboundedSender<ServiceEvent>) {
        self.inner.lock().unwrap().events = Some(events.clone());

        let delay = self.timing.bind_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ServiceEvent::Bound {
                handle: BindingHandle::new(),
            });
        });
    }

    fn unbind(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.events = None;
        if let Some(flag) = inner.running.take() {
            flag.store(false, Ordering::SeqCst);
        }
        debug!("Loopback service unbound");
    }

    fn start_session(&self, attempt: AttemptId, request: ConnectionRequest) {
        let events = match self.inner.lock().unwrap().events.clone() {
            Some(events) => events,
            None => {
                warn!("start_session without a binding, ignoring");
                return;
            }
        };

        if let Some(reason) = self.refuse_reason.clone() {
            let delay = self.timing.connect_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ServiceEvent::ConnectOutcome {
                    attempt,
                    result: Err(reason),
                });
            });
            return;
        }

        let flag = Arc::new(AtomicBool::new(true));
        self.inner.lock().unwrap().running = Some(flag.clone());

        let connect_delay = self.timing.connect_delay;
        let packet_interval = self.timing.packet_interval;
        tokio::spawn(async move {
            tokio::time::sleep(connect_delay).await;
            if !flag.load(Ordering::SeqCst) {
                debug!("Connect attempt {} cancelled before established", attempt);
                return;
            }
            let _ = events.send(ServiceEvent::ConnectOutcome {
                attempt,
                result: Ok(()),
            });

            // Pump synthetic traffic through the active set until stopped.
            let flow = FlowDescriptor {
                remote_host: "intercepted.test".into(),
                remote_port: 443,
                protocol: Protocol::Tcp,
            };
            let mut seq: u64 = 0;
            while flag.load(Ordering::SeqCst) {
                tokio::time::sleep(packet_interval).await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                if request.filter().decide(&flow) == FlowVerdict::Intercept {
                    let payload = format!("loopback packet {}", seq);
                    request
                        .outbound()
                        .on_packet(payload.as_bytes(), Direction::Outbound, request.user_id());
                    request
                        .inbound()
                        .on_packet(payload.as_bytes(), Direction::Inbound, request.user_id());
                }
                seq += 1;
            }
            debug!("Loopback packet pump for attempt {} stopped", attempt);
        });
    }

    fn stop_session(&self) {
        let events = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(flag) = inner.running.take() {
                flag.store(false, Ordering::SeqCst);
            }
            inner.events.clone()
        };

        if let Some(events) = events {
            let delay = self.timing.stop_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(ServiceEvent::Stopped);
            });
        }
    }
}
