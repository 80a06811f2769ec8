//! tunnelctl: session orchestration for a local traffic-interception tunnel
//!
//! This crate provides the control-plane core for a VPN-style interception
//! session: the component a front-end uses to bind to the long-running
//! tunnel service, sequence the preconditions for interception (trust-anchor
//! install, user consent, service binding), and drive connect/disconnect
//! while broadcasting state to observers.
//!
//! # Architecture
//!
//! - **Session**: the `SessionController` state machine, connection requests
//!   with pluggable filter/consumer capabilities, and observer notification
//! - **Service**: the `SessionService` trait over the background tunnel
//!   engine, the bind/unbind lifecycle, and an in-process loopback service
//! - **Consent**: one-shot, re-checked user authorization for creating a
//!   privileged tunnel
//! - **Trust**: one-shot trust-anchor (root certificate) installation,
//!   decoupled from the connect flow
//! - **Config**: hierarchical TOML configuration
//!
//! # Control flow
//!
//! The front-end binds the controller, triggers trust-anchor installation
//! once at startup, and on a connect action runs the consent gate; on grant
//! it assembles a `ConnectionRequest` (traffic filter plus one packet
//! consumer per direction) and calls `connect`. All outcomes arrive
//! asynchronously as `SessionState` notifications delivered to registered
//! observers.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod consent;
pub mod service;
pub mod session;
pub mod trust;
