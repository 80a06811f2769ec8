//! Session state machine, connection requests, and observer notification.
//!
//! The `SessionController` is the single source of truth for session state.
//! A front-end binds it to a background service, attempts connections with a
//! `ConnectionRequest` (traffic filter plus one packet consumer per
//! direction), and registers `SessionObserver`s to receive every state
//! transition.

pub mod controller;
pub mod observer;
pub mod request;
pub mod state;

pub use controller::SessionController;
pub use observer::{ObserverId, ObserverRegistry, SessionObserver};
pub use request::{
    ConnectionRequest, Direction, FlowDescriptor, FlowVerdict, PacketConsumer, Protocol,
    TrafficFilter,
};
pub use state::SessionState;
