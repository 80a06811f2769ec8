//! Connection requests and the pluggable traffic-handling capabilities.
//!
//! A `ConnectionRequest` bundles everything the tunnel service needs for one
//! connection attempt: a traffic filter deciding which outbound flows to
//! intercept, one packet consumer per direction, and an optional
//! authentication token. The front-end constructs it at connect time and
//! hands ownership to the controller for the lifetime of exactly one
//! attempt; it is released on return to `BoundIdle` or `Unbound`.

use std::sync::Arc;

/// Direction of a packet relative to the intercepted host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Packet arriving from the network.
    Inbound,
    /// Packet leaving toward the network.
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Transport protocol of a flow candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TCP flow.
    Tcp,
    /// UDP flow.
    Udp,
}

/// Metadata identifying a network flow candidate for interception decisions.
#[derive(Debug, Clone)]
pub struct FlowDescriptor {
    /// Remote host the flow targets.
    pub remote_host: String,
    /// Remote port the flow targets.
    pub remote_port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

/// Verdict of a traffic filter for one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowVerdict {
    /// Route the flow through the interception path.
    Intercept,
    /// Let the flow pass untouched.
    Bypass,
}

/// Decides which outbound flows are routed through the interception path.
///
/// Supplied by the caller at connect time and invoked by the background
/// service for each flow candidate; the controller manages its lifetime
/// but never calls it directly.
pub trait TrafficFilter: Send + Sync {
    /// Decide whether a flow should be intercepted or bypassed.
    fn decide(&self, flow: &FlowDescriptor) -> FlowVerdict;
}

/// Receives captured packets for one direction.
///
/// Implementations must not block the delivery path; enqueue for later
/// processing instead.
pub trait PacketConsumer: Send + Sync {
    /// Called for each captured packet.
    ///
    /// `user_id` is the identifier configured for this session, used to
    /// attribute captured traffic to a user.
    fn on_packet(&self, packet: &[u8], direction: Direction, user_id: &str);
}

/// A transient bundle of traffic-handling components for one connection
/// attempt.
///
/// Well-formedness (a filter plus both consumers) is enforced by
/// construction, so the controller's only runtime guard on `connect` is the
/// `BoundIdle` state check.
#[derive(Clone)]
pub struct ConnectionRequest {
    filter: Arc<dyn TrafficFilter>,
    inbound: Arc<dyn PacketConsumer>,
    outbound: Arc<dyn PacketConsumer>,
    auth_token: Option<String>,
    user_id: String,
}

impl ConnectionRequest {
    /// Create a request from a filter and one consumer per direction.
    pub fn new(
        filter: Arc<dyn TrafficFilter>,
        inbound: Arc<dyn PacketConsumer>,
        outbound: Arc<dyn PacketConsumer>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            filter,
            inbound,
            outbound,
            auth_token: None,
            user_id: user_id.into(),
        }
    }

    /// Attach an authentication token passed through to the service.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// The traffic filter for this attempt.
    pub fn filter(&self) -> &Arc<dyn TrafficFilter> {
        &self.filter
    }

    /// The consumer for packets arriving from the network.
    pub fn inbound(&self) -> &Arc<dyn PacketConsumer> {
        &self.inbound
    }

    /// The consumer for packets leaving toward the network.
    pub fn outbound(&self) -> &Arc<dyn PacketConsumer> {
        &self.outbound
    }

    /// Optional authentication token.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// User identifier stamped on delivered packets.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

// Trait objects carry no useful Debug output; show the scalar fields only.
impl std::fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("user_id", &self.user_id)
            .field("auth_token", &self.auth_token.as_deref().map(|_| "<redacted>"))
            .finish()
    }
}
