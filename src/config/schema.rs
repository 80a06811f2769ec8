//! Configuration schema definitions.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into the binary)
//! 2. User config: `~/.config/tunnelctl/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Lists (intercept ports) are **merged** (appended, deduplicated).
//! Scalars (user id, timeouts) are **overridden** when the later source
//! sets a non-default value; a source that omits a setting leaves the
//! earlier layers untouched.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::service::LoopbackTiming;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Session identity and timeouts.
    #[serde(default)]
    pub session: SessionSettings,

    /// Consent prompt settings.
    #[serde(default)]
    pub consent: ConsentSettings,

    /// Interception policy for the demo filter.
    #[serde(default)]
    pub intercept: InterceptSettings,

    /// Latencies of the in-process loopback service.
    #[serde(default)]
    pub loopback: LoopbackSettings,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Lists are merged (appended, deduplicated); scalars are overridden
    /// only when the overlay carries a non-default value, so a source that
    /// omits a section leaves earlier layers intact.
    pub fn merge(&mut self, other: Config) {
        self.session.merge(other.session);
        self.consent.merge(other.consent);
        self.intercept.merge(other.intercept);
        self.loopback.merge(other.loopback);
    }
}

/// Session identity and timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    /// User identifier stamped on captured packets, for attributing
    /// intercepted traffic to a user.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Optional authentication token forwarded to the tunnel service.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Seconds to wait for a connect attempt to resolve.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl SessionSettings {
    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn merge(&mut self, other: SessionSettings) {
        // Scalars are overridden if non-default
        if other.user_id != default_user_id() {
            self.user_id = other.user_id;
        }
        if other.auth_token.is_some() {
            self.auth_token = other.auth_token;
        }
        if other.connect_timeout_secs != default_connect_timeout() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            auth_token: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Consent prompt settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsentSettings {
    /// Seconds to wait for the user to answer the consent prompt.
    #[serde(default = "default_prompt_timeout")]
    pub prompt_timeout_secs: u64,
}

impl ConsentSettings {
    /// Prompt timeout as a `Duration`.
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    fn merge(&mut self, other: ConsentSettings) {
        if other.prompt_timeout_secs != default_prompt_timeout() {
            self.prompt_timeout_secs = other.prompt_timeout_secs;
        }
    }
}

impl Default for ConsentSettings {
    fn default() -> Self {
        Self {
            prompt_timeout_secs: default_prompt_timeout(),
        }
    }
}

/// Interception policy for the demo port-based filter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InterceptSettings {
    /// Remote ports whose flows are intercepted.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
}

impl InterceptSettings {
    fn merge(&mut self, other: InterceptSettings) {
        for port in other.ports {
            if !self.ports.contains(&port) {
                self.ports.push(port);
            }
        }
    }
}

impl Default for InterceptSettings {
    fn default() -> Self {
        Self {
            ports: default_ports(),
        }
    }
}

/// Latencies of the in-process loopback service, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoopbackSettings {
    /// Delay before a bind completes.
    #[serde(default = "default_bind_delay_ms")]
    pub bind_delay_ms: u64,
    /// Delay before a connect attempt resolves.
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    /// Delay before a stop is acknowledged.
    #[serde(default = "default_stop_delay_ms")]
    pub stop_delay_ms: u64,
    /// Interval between synthetic packets while connected.
    #[serde(default = "default_packet_interval_ms")]
    pub packet_interval_ms: u64,
}

impl LoopbackSettings {
    /// Convert into the loopback service's timing configuration.
    pub fn timing(&self) -> LoopbackTiming {
        LoopbackTiming {
            bind_delay: Duration::from_millis(self.bind_delay_ms),
            connect_delay: Duration::from_millis(self.connect_delay_ms),
            stop_delay: Duration::from_millis(self.stop_delay_ms),
            packet_interval: Duration::from_millis(self.packet_interval_ms),
        }
    }

    fn merge(&mut self, other: LoopbackSettings) {
        if other.bind_delay_ms != default_bind_delay_ms() {
            self.bind_delay_ms = other.bind_delay_ms;
        }
        if other.connect_delay_ms != default_connect_delay_ms() {
            self.connect_delay_ms = other.connect_delay_ms;
        }
        if other.stop_delay_ms != default_stop_delay_ms() {
            self.stop_delay_ms = other.stop_delay_ms;
        }
        if other.packet_interval_ms != default_packet_interval_ms() {
            self.packet_interval_ms = other.packet_interval_ms;
        }
    }
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            bind_delay_ms: default_bind_delay_ms(),
            connect_delay_ms: default_connect_delay_ms(),
            stop_delay_ms: default_stop_delay_ms(),
            packet_interval_ms: default_packet_interval_ms(),
        }
    }
}

fn default_user_id() -> String {
    "demo".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_prompt_timeout() -> u64 {
    30
}

fn default_ports() -> Vec<u16> {
    vec![80, 443]
}

fn default_bind_delay_ms() -> u64 {
    10
}

fn default_connect_delay_ms() -> u64 {
    10
}

fn default_stop_delay_ms() -> u64 {
    5
}

fn default_packet_interval_ms() -> u64 {
    250
}
