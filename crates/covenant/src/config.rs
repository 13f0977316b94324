//! Client configuration.
//!
//! [`ClientConfig`] is plain serde data, so it can come from any format.
//! [`ClientConfig::from_json`] covers the common case. Durations are
//! whole seconds to keep config files readable.

use std::time::Duration;

use covenant_commands::DispatcherConfig;
use covenant_transport::{DatagramConfig, ReconnectPolicy, ReliableConfig};
use serde::{Deserialize, Serialize};

use crate::CovenantError;

/// Which wire the client talks over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Line-framed TCP with automatic reconnection.
    #[default]
    Reliable,
    /// One envelope per UDP datagram, best effort.
    Datagram,
}

/// Everything needed to build a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TransportKind,

    /// Platform endpoint, `host:port`.
    pub address: String,

    /// Pre-issued credential attached to every outbound envelope.
    pub credential: String,

    pub connect_timeout_secs: u64,

    /// Delay before each reconnection attempt; the last entry repeats.
    pub reconnect_schedule_secs: Vec<u64>,

    /// Give up once a failure streak lasts longer than this.
    pub reconnect_ceiling_secs: u64,

    /// Datagram receive poll interval.
    pub poll_timeout_secs: u64,

    /// Datagram pause after a socket error.
    pub error_backoff_secs: u64,

    /// How many recent message ids to remember for deduplication.
    pub dedup_capacity: usize,

    pub dispatcher: DispatcherConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            transport: TransportKind::Reliable,
            address: "127.0.0.1:7000".to_string(),
            credential: String::new(),
            connect_timeout_secs: 10,
            reconnect_schedule_secs: policy.schedule.iter().map(Duration::as_secs).collect(),
            reconnect_ceiling_secs: policy.ceiling.as_secs(),
            poll_timeout_secs: 5,
            error_backoff_secs: 1,
            dedup_capacity: covenant_router::DEFAULT_DEDUP_CAPACITY,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; missing keys take their defaults.
    ///
    /// ```
    /// use covenant::ClientConfig;
    ///
    /// let config = ClientConfig::from_json(r#"{
    ///     "address": "chat.example.net:7000",
    ///     "dispatcher": { "prefix": "?" }
    /// }"#).unwrap();
    /// assert_eq!(config.dispatcher.prefix, "?");
    /// assert_eq!(config.dispatcher.help_trigger, "help");
    /// ```
    pub fn from_json(text: &str) -> Result<Self, CovenantError> {
        let config: Self = serde_json::from_str(text)?;
        Ok(config.validated())
    }

    /// Replaces values that can't work with their defaults, logging each
    /// replacement.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.connect_timeout_secs == 0 {
            tracing::warn!("connect_timeout_secs must be positive, using default");
            self.connect_timeout_secs = defaults.connect_timeout_secs;
        }
        if self.reconnect_schedule_secs.is_empty() {
            tracing::warn!("reconnect_schedule_secs is empty, using default");
            self.reconnect_schedule_secs = defaults.reconnect_schedule_secs;
        }
        if self.reconnect_ceiling_secs == 0 {
            tracing::warn!("reconnect_ceiling_secs must be positive, using default");
            self.reconnect_ceiling_secs = defaults.reconnect_ceiling_secs;
        }
        if self.poll_timeout_secs == 0 {
            tracing::warn!("poll_timeout_secs must be positive, using default");
            self.poll_timeout_secs = defaults.poll_timeout_secs;
        }
        if self.dedup_capacity == 0 {
            tracing::warn!("dedup_capacity must be positive, using 1");
            self.dedup_capacity = 1;
        }
        if self.dispatcher.prefix.is_empty() {
            tracing::warn!("command prefix is empty, using default");
            self.dispatcher.prefix = defaults.dispatcher.prefix;
        }
        if self.dispatcher.help_trigger.trim().is_empty() {
            self.dispatcher.help_trigger = defaults.dispatcher.help_trigger;
        }
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            schedule: self
                .reconnect_schedule_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            ceiling: Duration::from_secs(self.reconnect_ceiling_secs),
        }
    }

    pub fn reliable_config(&self) -> ReliableConfig {
        ReliableConfig {
            credential: self.credential.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            policy: self.reconnect_policy(),
            ..ReliableConfig::default()
        }
    }

    pub fn datagram_config(&self) -> DatagramConfig {
        DatagramConfig {
            credential: self.credential.clone(),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }
}
