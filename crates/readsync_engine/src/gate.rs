//! Failure gate (circuit breaker) shared by every remote call.
//!
//! The gate is the only owner of its state. Callers obtain an [`Admission`]
//! from [`admit`] and settle it with the outcome; the display layer reads a
//! copy through [`status`].
//!
//! ```text
//!            failures >= threshold
//!   CLOSED ─────────────────────────► OPEN
//!     ▲                                 │ open_timeout elapsed
//!     │ probe succeeded                 ▼
//!     └──────────────────────────── HALF_OPEN
//!                 probe failed: back to OPEN, timer restarted
//! ```
//!
//! [`admit`]: FailureGate::admit
//! [`status`]: FailureGate::status

use crate::config::GateConfig;
use crate::error::{ErrorKind, SyncError, SyncResult};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// State of the failure gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected locally.
    Open,
    /// A limited number of probes are admitted.
    HalfOpen,
}

/// Read-only copy of the gate, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStatus {
    /// Current state.
    pub state: GateState,
    /// Consecutive counted failures.
    pub consecutive_failures: u32,
    /// Time until a probe is admitted, while open.
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct GateInner {
    state: GateState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_probes_used: u32,
    recovery_pending: bool,
    disconnect_notified: bool,
}

/// Process-wide failure gate.
#[derive(Debug)]
pub struct FailureGate {
    config: GateConfig,
    inner: Mutex<GateInner>,
}

impl FailureGate {
    /// Creates a closed gate.
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(GateInner {
                state: GateState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                half_open_probes_used: 0,
                recovery_pending: false,
                disconnect_notified: false,
            }),
        }
    }

    /// Returns the gate configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Admits or rejects a request.
    ///
    /// An open gate whose timeout has elapsed moves to half-open and admits
    /// the caller as its probe. The returned [`Admission`] must be settled
    /// with the outcome; dropping it unsettled gives the probe slot back.
    pub fn admit(&self) -> SyncResult<Admission<'_>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let probe = match inner.state {
            GateState::Closed => false,
            GateState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.config.open_timeout);
                if elapsed < self.config.open_timeout {
                    return Err(SyncError::CircuitOpen {
                        retry_in: self.config.open_timeout - elapsed,
                    });
                }
                info!("failure gate half-open, admitting probe");
                inner.state = GateState::HalfOpen;
                inner.half_open_probes_used = 1;
                true
            }
            GateState::HalfOpen => {
                if inner.half_open_probes_used >= self.config.half_open_probes {
                    // A probe is already in flight.
                    return Err(SyncError::CircuitOpen {
                        retry_in: Duration::ZERO,
                    });
                }
                inner.half_open_probes_used += 1;
                true
            }
        };

        Ok(Admission {
            gate: self,
            probe,
            settled: false,
        })
    }

    /// Records a successful request.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;

        if inner.state == GateState::HalfOpen {
            info!("failure gate closed, remote recovered");
            inner.state = GateState::Closed;
            inner.half_open_probes_used = 0;
            inner.recovery_pending = true;
            inner.disconnect_notified = false;
        }
    }

    /// Records a failed request and returns the resulting status.
    ///
    /// Authentication failures and local rejections never count toward the
    /// threshold.
    pub fn record_failure(&self, kind: ErrorKind) -> GateStatus {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if !kind.counts_toward_gate() {
            // An auth failure says nothing about remote health.
            if kind == ErrorKind::AuthFailed && inner.state == GateState::HalfOpen {
                inner.half_open_probes_used = inner.half_open_probes_used.saturating_sub(1);
            }
            return self.status_locked(&inner, now);
        }

        inner.last_failure_at = Some(now);
        match inner.state {
            GateState::HalfOpen => {
                warn!(kind = %kind, "probe failed, failure gate reopened");
                inner.state = GateState::Open;
                inner.consecutive_failures = self.config.failure_threshold;
                inner.half_open_probes_used = 0;
            }
            GateState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        kind = %kind,
                        failures = inner.consecutive_failures,
                        "failure gate opened"
                    );
                    inner.state = GateState::Open;
                    inner.half_open_probes_used = 0;
                }
            }
            GateState::Open => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            }
        }

        self.status_locked(&inner, now)
    }

    /// Returns true exactly once after the gate closes from half-open.
    pub fn take_recovery(&self) -> bool {
        std::mem::take(&mut self.inner.lock().recovery_pending)
    }

    /// Returns true exactly once per open episode, while the gate is open.
    pub fn claim_disconnect_notice(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == GateState::Open && !inner.disconnect_notified {
            inner.disconnect_notified = true;
            true
        } else {
            false
        }
    }

    /// Returns a copy of the gate state.
    pub fn status(&self) -> GateStatus {
        let inner = self.inner.lock();
        self.status_locked(&inner, Instant::now())
    }

    /// Returns the current state.
    pub fn state(&self) -> GateState {
        self.inner.lock().state
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == GateState::HalfOpen {
            inner.half_open_probes_used = inner.half_open_probes_used.saturating_sub(1);
        }
    }

    fn status_locked(&self, inner: &GateInner, now: Instant) -> GateStatus {
        let retry_in = match (inner.state, inner.last_failure_at) {
            (GateState::Open, Some(at)) => Some(
                self.config
                    .open_timeout
                    .saturating_sub(now.saturating_duration_since(at)),
            ),
            _ => None,
        };
        GateStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_in,
        }
    }
}

/// Permission to send one request.
#[must_use = "settle the admission with succeeded() or failed()"]
#[derive(Debug)]
pub struct Admission<'a> {
    gate: &'a FailureGate,
    probe: bool,
    settled: bool,
}

impl Admission<'_> {
    /// Returns true if this request is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Reports that the request succeeded.
    pub fn succeeded(mut self) {
        self.settled = true;
        self.gate.record_success();
    }

    /// Reports that the request failed.
    pub fn failed(mut self, kind: ErrorKind) -> GateStatus {
        self.settled = true;
        self.gate.record_failure(kind)
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.gate.release_probe();
        }
    }
}

impl Default for FailureGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}
