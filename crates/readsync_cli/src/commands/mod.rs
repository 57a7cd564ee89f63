//! CLI command implementations.

pub mod dedupe;
pub mod linkage;
pub mod match_book;
pub mod search;
pub mod sessions;
pub mod whoami;

use readsync_engine::{FailureGate, ReqwestClient, RemoteClient, RequestThrottle, SyncConfig};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote connection settings shared by every command.
pub struct RemoteOptions {
    /// API token.
    pub token: Option<String>,
    /// Endpoint override.
    pub endpoint: Option<String>,
    /// Requests-per-minute override.
    pub rate_limit: Option<u32>,
    /// Log request and response payloads.
    pub debug: bool,
}

impl RemoteOptions {
    /// Builds the sync configuration these options describe.
    pub fn config(&self) -> Result<SyncConfig, Box<dyn std::error::Error>> {
        let token = self
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or("API token required (--token or READSYNC_TOKEN)")?;

        let mut config = SyncConfig::new(token).with_debug(self.debug);
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint.clone());
        }
        if let Some(rate_limit) = self.rate_limit {
            config = config.with_rate_limit(rate_limit);
        }
        Ok(config)
    }

    /// Connects a remote client with its own gate and throttle.
    pub fn client(&self) -> Result<RemoteClient<ReqwestClient>, Box<dyn std::error::Error>> {
        let config = self.config()?;
        let http = ReqwestClient::new(REQUEST_TIMEOUT)?;
        let gate = Arc::new(FailureGate::new(config.gate));
        let throttle = Arc::new(RequestThrottle::new(config.effective_rate_limit()));
        Ok(RemoteClient::new(&config, http, gate, throttle))
    }
}
