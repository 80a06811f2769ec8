//! End-to-end session lifecycle scenarios against scripted and loopback
//! services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use tunnelctl::consent::{ConsentAuthority, ConsentDecision, ConsentGate};
use tunnelctl::service::{
    AttemptId, BindingHandle, LoopbackService, LoopbackTiming, ServiceEvent, SessionService,
};
use tunnelctl::session::{
    ConnectionRequest, Direction, FlowDescriptor, FlowVerdict, PacketConsumer, SessionController,
    SessionObserver, SessionState, TrafficFilter,
};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(2);

/// A service the test scripts by hand: it records calls and emits events
/// only when told to, so every interleaving is reproducible.
#[derive(Default)]
struct ScriptedService {
    events: Mutex<Option<mpsc::UnboundedSender<ServiceEvent>>>,
    started: Mutex<Vec<AttemptId>>,
    stops: AtomicUsize,
    unbinds: AtomicUsize,
}

impl ScriptedService {
    fn emit(&self, event: ServiceEvent) {
        let guard = self.events.lock().unwrap();
        let tx = guard.as_ref().expect("service is not bound");
        tx.send(event).expect("controller task is gone");
    }

    /// Wait until the controller's bind request reached this service.
    async fn bound(&self) {
        for _ in 0..200 {
            if self.events.lock().unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("bind never reached the service");
    }

    async fn started_count(&self, expected: usize) {
        for _ in 0..200 {
            if self.started.lock().unwrap().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} start_session calls", expected);
    }

    fn attempts(&self) -> Vec<AttemptId> {
        self.started.lock().unwrap().clone()
    }
}

impl SessionService for ScriptedService {
    fn bind(&self, events: mpsc::UnboundedSender<ServiceEvent>) {
        *self.events.lock().unwrap() = Some(events);
    }
    fn unbind(&self) {
        self.unbinds.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }
    fn start_session(&self, attempt: AttemptId, _request: ConnectionRequest) {
        self.started.lock().unwrap().push(attempt);
    }
    fn stop_session(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<SessionState>>,
}

impl SessionObserver for Recorder {
    fn on_state_changed(&self, state: SessionState) {
        self.seen.lock().unwrap().push(state);
    }
}

impl Recorder {
    fn states(&self) -> Vec<SessionState> {
        self.seen.lock().unwrap().clone()
    }
}

struct InterceptAll;
impl TrafficFilter for InterceptAll {
    fn decide(&self, _flow: &FlowDescriptor) -> FlowVerdict {
        FlowVerdict::Intercept
    }
}

#[derive(Default)]
struct CountingConsumer {
    packets: AtomicUsize,
}
impl PacketConsumer for CountingConsumer {
    fn on_packet(&self, _packet: &[u8], _direction: Direction, _user_id: &str) {
        self.packets.fetch_add(1, Ordering::SeqCst);
    }
}

fn request(consumer: Arc<CountingConsumer>) -> ConnectionRequest {
    ConnectionRequest::new(Arc::new(InterceptAll), consumer.clone(), consumer, "demo")
}

async fn scripted_bound_controller() -> (SessionController, Arc<ScriptedService>, Arc<Recorder>) {
    let service = Arc::new(ScriptedService::default());
    let controller = SessionController::spawn(service.clone());
    let recorder = Arc::new(Recorder::default());
    controller.register_observer(recorder.clone());

    controller.bind();
    service.bound().await;
    service.emit(ServiceEvent::Bound {
        handle: BindingHandle::new(),
    });
    assert!(controller.wait_for(SessionState::BoundIdle, WAIT).await);

    (controller, service, recorder)
}

#[tokio::test]
async fn bind_unbind_interleavings_end_unbound() {
    let service = Arc::new(ScriptedService::default());
    let controller = SessionController::spawn(service.clone());

    // unbind before ever binding: still UNBOUND, no crash.
    controller.unbind();
    assert_eq!(controller.state(), SessionState::Unbound);

    // bind, then unbind before the completion arrives; the stale
    // completion from the cancelled bind must be dropped.
    controller.bind();
    service.bound().await;
    let stale_tx = service.events.lock().unwrap().clone().unwrap();
    controller.unbind();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = stale_tx.send(ServiceEvent::Bound {
        handle: BindingHandle::new(),
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(controller.state(), SessionState::Unbound);

    // bind for real, then unbind.
    controller.bind();
    service.bound().await;
    service.emit(ServiceEvent::Bound {
        handle: BindingHandle::new(),
    });
    assert!(controller.wait_for(SessionState::BoundIdle, WAIT).await);
    controller.unbind();
    assert!(controller.wait_for(SessionState::Unbound, WAIT).await);

    controller.shutdown();
}

#[tokio::test]
async fn connect_outside_bound_idle_has_no_side_effects() {
    let service = Arc::new(ScriptedService::default());
    let controller = SessionController::spawn(service.clone());
    let recorder = Arc::new(Recorder::default());
    controller.register_observer(recorder.clone());

    let consumer = Arc::new(CountingConsumer::default());
    controller.connect(request(consumer));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(controller.state(), SessionState::Unbound);
    assert!(service.attempts().is_empty());
    assert!(recorder.states().is_empty());

    controller.shutdown();
}

#[tokio::test]
async fn happy_path_notification_sequence() {
    let (controller, service, recorder) = scripted_bound_controller().await;

    let consumer = Arc::new(CountingConsumer::default());
    controller.connect(request(consumer));
    service.started_count(1).await;
    service.emit(ServiceEvent::ConnectOutcome {
        attempt: 1,
        result: Ok(()),
    });
    assert!(controller.wait_for(SessionState::Connected, WAIT).await);

    assert_eq!(
        recorder.states(),
        vec![
            SessionState::BoundIdle,
            SessionState::Connecting,
            SessionState::Connected,
        ]
    );

    controller.shutdown();
}

#[tokio::test]
async fn second_connect_while_connecting_is_rejected() {
    let (controller, service, recorder) = scripted_bound_controller().await;

    let consumer = Arc::new(CountingConsumer::default());
    controller.connect(request(consumer.clone()));
    service.started_count(1).await;

    controller.connect(request(consumer));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(service.attempts(), vec![1]);
    assert_eq!(
        recorder.states(),
        vec![SessionState::BoundIdle, SessionState::Connecting]
    );

    controller.shutdown();
}

#[tokio::test]
async fn double_disconnect_single_idle_notification() {
    let (controller, service, recorder) = scripted_bound_controller().await;

    controller.connect(request(Arc::new(CountingConsumer::default())));
    service.started_count(1).await;
    service.emit(ServiceEvent::ConnectOutcome {
        attempt: 1,
        result: Ok(()),
    });
    assert!(controller.wait_for(SessionState::Connected, WAIT).await);

    controller.disconnect();
    controller.disconnect();
    service.emit(ServiceEvent::Stopped);
    assert!(controller.wait_for(SessionState::BoundIdle, WAIT).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(service.stops.load(Ordering::SeqCst), 1);
    let idles_after_connect = recorder
        .states()
        .iter()
        .skip(1) // the BoundIdle from binding
        .filter(|s| **s == SessionState::BoundIdle)
        .count();
    assert_eq!(idles_after_connect, 1);

    controller.shutdown();
}

#[tokio::test]
async fn late_success_after_cancellation_never_connects() {
    let (controller, service, recorder) = scripted_bound_controller().await;

    controller.connect(request(Arc::new(CountingConsumer::default())));
    service.started_count(1).await;

    // Cancel mid-connect, then let the superseded attempt "succeed".
    controller.disconnect();
    assert!(controller.wait_for(SessionState::Disconnecting, WAIT).await);
    service.emit(ServiceEvent::ConnectOutcome {
        attempt: 1,
        result: Ok(()),
    });
    service.emit(ServiceEvent::Stopped);
    assert!(controller.wait_for(SessionState::BoundIdle, WAIT).await);

    assert!(!recorder.states().contains(&SessionState::Connected));

    controller.shutdown();
}

#[tokio::test]
async fn connect_failure_is_recoverable_after_acknowledgement() {
    let (controller, service, recorder) = scripted_bound_controller().await;

    controller.connect(request(Arc::new(CountingConsumer::default())));
    service.started_count(1).await;
    service.emit(ServiceEvent::ConnectOutcome {
        attempt: 1,
        result: Err("consent was revoked".into()),
    });
    assert!(
        controller
            .wait_for(SessionState::DisconnectedError, WAIT)
            .await
    );
    assert_eq!(controller.last_error().as_deref(), Some("consent was revoked"));

    // Acknowledge, then a fresh attempt is accepted.
    controller.disconnect();
    assert!(controller.wait_for(SessionState::BoundIdle, WAIT).await);
    controller.connect(request(Arc::new(CountingConsumer::default())));
    service.started_count(2).await;
    assert_eq!(service.attempts(), vec![1, 2]);
    assert!(recorder.states().contains(&SessionState::DisconnectedError));

    controller.shutdown();
}

#[tokio::test]
async fn service_crash_while_connected_yields_single_unbound() {
    let (controller, service, recorder) = scripted_bound_controller().await;

    controller.connect(request(Arc::new(CountingConsumer::default())));
    service.started_count(1).await;
    service.emit(ServiceEvent::ConnectOutcome {
        attempt: 1,
        result: Ok(()),
    });
    assert!(controller.wait_for(SessionState::Connected, WAIT).await);

    service.emit(ServiceEvent::Died {
        reason: "killed by OS".into(),
    });
    assert!(controller.wait_for(SessionState::Unbound, WAIT).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let unbounds = recorder
        .states()
        .iter()
        .filter(|s| **s == SessionState::Unbound)
        .count();
    assert_eq!(unbounds, 1);
    // Death takes the unbind path without a call to the dead service.
    assert_eq!(service.unbinds.load(Ordering::SeqCst), 0);

    controller.shutdown();
}

#[tokio::test]
async fn disconnect_detaches_filter_consumer_set() {
    let timing = LoopbackTiming {
        bind_delay: Duration::from_millis(1),
        connect_delay: Duration::from_millis(1),
        stop_delay: Duration::from_millis(1),
        packet_interval: Duration::from_millis(2),
    };
    let service = Arc::new(LoopbackService::new(timing));
    let controller = SessionController::spawn(service.clone());

    controller.bind();
    assert!(controller.wait_for(SessionState::BoundIdle, WAIT).await);

    let consumer = Arc::new(CountingConsumer::default());
    controller.connect(request(consumer.clone()));
    assert!(controller.wait_for(SessionState::Connected, WAIT).await);

    // Let traffic flow, then tear the session down.
    tokio::time::sleep(Duration::from_millis(30)).await;
    controller.disconnect();
    assert!(controller.wait_for(SessionState::BoundIdle, WAIT).await);

    let at_stop = consumer.packets.load(Ordering::SeqCst);
    assert!(at_stop > 0, "expected packets while connected");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        consumer.packets.load(Ordering::SeqCst),
        at_stop,
        "detached consumers must receive no further packets"
    );

    controller.unbind();
    assert!(controller.wait_for(SessionState::Unbound, WAIT).await);
    controller.shutdown();
}

#[tokio::test]
async fn consent_gate_sequences_a_real_connect() {
    struct HeldAuthority;
    impl ConsentAuthority for HeldAuthority {
        fn is_held(&self) -> bool {
            true
        }
        fn prompt(&self, _code: Uuid) {
            unreachable!("held consent must not prompt");
        }
    }

    let (controller, service, recorder) = scripted_bound_controller().await;

    // The front-end flow: consent first, connect only on a grant.
    let gate = ConsentGate::new(Arc::new(HeldAuthority));
    let (_code, rx) = gate.check_or_request();
    assert_eq!(rx.await.unwrap(), ConsentDecision::Granted);

    controller.connect(request(Arc::new(CountingConsumer::default())));
    service.started_count(1).await;
    service.emit(ServiceEvent::ConnectOutcome {
        attempt: 1,
        result: Ok(()),
    });
    assert!(controller.wait_for(SessionState::Connected, WAIT).await);

    assert_eq!(
        recorder.states(),
        vec![
            SessionState::BoundIdle,
            SessionState::Connecting,
            SessionState::Connected,
        ]
    );

    controller.shutdown();
}
