//! Configuration for the sync engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default remote endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.hardcover.app/v1/graphql";

/// Default request budget per rolling minute.
pub const DEFAULT_RATE_LIMIT: u32 = 50;

/// Hard cap the remote enforces per rolling minute.
pub const MAX_RATE_LIMIT: u32 = 60;

/// How divergence between local and remote progress is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Ask the user when positions diverge.
    #[default]
    Prompt,
    /// Apply remote progress when it is newer, without asking.
    Silent,
    /// Local progress is authoritative; never pull.
    Send,
    /// Remote progress is authoritative; always apply it.
    Receive,
}

/// When local progress changes are pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushFrequency {
    /// On every page turn, debounced.
    #[default]
    Page,
    /// When the current section changes.
    Chapter,
    /// Once, when the book is closed.
    Session,
}

/// Configuration of the failure gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// Consecutive counted failures that open the gate.
    pub failure_threshold: u32,
    /// Time the gate stays open before admitting a probe.
    pub open_timeout: Duration,
    /// Probes admitted while half-open.
    pub half_open_probes: u32,
}

impl GateConfig {
    /// Creates the default gate configuration.
    pub fn new() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(60),
            half_open_probes: 1,
        }
    }

    /// Sets the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the open timeout.
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the number of half-open probes.
    pub fn with_half_open_probes(mut self, probes: u32) -> Self {
        self.half_open_probes = probes.max(1);
        self
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for sync operations.
///
/// Supplied by the settings store; deserializes from its camelCase JSON.
/// Timing fields are not part of the stored settings and keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Master switch.
    pub enabled: bool,
    /// Bearer token.
    pub token: Option<String>,
    /// Remote endpoint.
    pub endpoint: String,
    /// Divergence policy.
    pub strategy: SyncStrategy,
    /// Push trigger policy.
    pub push_frequency: PushFrequency,
    /// Requests per rolling minute.
    pub rate_limit: u32,
    /// Log request and response payloads.
    pub debug: bool,
    /// Coalescing window for pushes.
    #[serde(skip)]
    pub debounce: Duration,
    /// Pause after navigating to a pulled position.
    #[serde(skip)]
    pub settle_delay: Duration,
    /// Failure gate configuration.
    #[serde(skip)]
    pub gate: GateConfig,
}

impl SyncConfig {
    /// Creates an enabled configuration with the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            enabled: true,
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the divergence strategy.
    pub fn with_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the push frequency.
    pub fn with_push_frequency(mut self, frequency: PushFrequency) -> Self {
        self.push_frequency = frequency;
        self
    }

    /// Sets the request budget. See [`SyncConfig::effective_rate_limit`].
    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Enables payload logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the push coalescing window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the post-navigation settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the failure gate configuration.
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    /// Returns the request budget within `1..=MAX_RATE_LIMIT`.
    pub fn effective_rate_limit(&self) -> u32 {
        self.rate_limit.clamp(1, MAX_RATE_LIMIT)
    }

    /// Returns the token if one is set and non-blank.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Parses settings JSON as stored by the settings collaborator.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            strategy: SyncStrategy::default(),
            push_frequency: PushFrequency::default(),
            rate_limit: DEFAULT_RATE_LIMIT,
            debug: false,
            debounce: Duration::from_secs(5),
            settle_delay: Duration::from_millis(500),
            gate: GateConfig::default(),
        }
    }
}
