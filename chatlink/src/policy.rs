//! Failure classification for the live channel.
//!
//! Two counters drive the policy:
//!
//! - `attempts` bounds scheduled reconnects. It resets when a connection
//!   opens and on a manual reconnect.
//! - `consecutive_failures` counts connection-level errors. It resets only
//!   once a connection has opened *and* delivered its first frame, so a
//!   server that accepts the upgrade and immediately drops the socket still
//!   accumulates toward the trip threshold.
//!
//! Crossing the warning threshold produces one warning; reaching the disable
//! threshold trips the breaker and persists the disabled flag.

use std::sync::Arc;

use crate::flag_store::FlagStore;

/// Thresholds for the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Scheduled reconnects allowed before giving up.
    pub max_attempts: u32,
    /// Consecutive failures that produce a user-visible warning.
    pub warn_threshold: u32,
    /// Consecutive failures that disable the live channel.
    pub disable_threshold: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            warn_threshold: 10,
            disable_threshold: 15,
        }
    }
}

/// What a recorded failure means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Keep going.
    Tolerated,
    /// The warning threshold was just crossed.
    Warn,
    /// The breaker tripped; the live channel is now disabled.
    Disable,
}

/// Reconnect and circuit-breaker state for the live channel.
pub struct ReconnectPolicy {
    config: PolicyConfig,
    attempts: u32,
    consecutive_failures: u32,
    disabled: bool,
    store: Arc<dyn FlagStore>,
}

impl ReconnectPolicy {
    /// Build a policy, reading the persisted disabled flag from `store`.
    ///
    /// An unreadable store is logged and treated as "not disabled".
    pub fn load(config: PolicyConfig, store: Arc<dyn FlagStore>) -> Self {
        let disabled = store.load().unwrap_or_else(|e| {
            tracing::warn!(err = %e, "could not read live channel flag, assuming enabled");
            false
        });
        if disabled {
            tracing::info!("live channel disabled by persisted flag");
        }
        Self {
            config,
            attempts: 0,
            consecutive_failures: 0,
            disabled,
            store,
        }
    }

    /// Thresholds in effect.
    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Scheduled reconnects made since the last open or manual reconnect.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Failures since the last confirmed-healthy connection.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the breaker is open.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether another scheduled reconnect is permitted.
    #[must_use]
    pub const fn retry_allowed(&self) -> bool {
        !self.disabled && self.attempts < self.config.max_attempts
    }

    /// Count a scheduled reconnect.
    pub const fn begin_retry(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Forget scheduled reconnects (manual reconnect).
    pub const fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// A connection opened.
    pub const fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// An opened connection delivered its first frame.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            tracing::debug!(
                failures = self.consecutive_failures,
                "live connection healthy, clearing failure count"
            );
        }
        self.consecutive_failures = 0;
    }

    /// A connection-level error occurred.
    pub fn record_failure(&mut self) -> FailureVerdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.disabled {
            return FailureVerdict::Tolerated;
        }
        if self.consecutive_failures >= self.config.disable_threshold {
            tracing::error!(
                failures = self.consecutive_failures,
                "too many live connection failures, disabling live channel"
            );
            self.set_disabled(true);
            return FailureVerdict::Disable;
        }
        if self.consecutive_failures == self.config.warn_threshold {
            tracing::warn!(
                failures = self.consecutive_failures,
                "live channel is failing repeatedly"
            );
            return FailureVerdict::Warn;
        }
        FailureVerdict::Tolerated
    }

    /// Close the breaker and clear both counters.
    pub fn enable(&mut self) {
        self.attempts = 0;
        self.consecutive_failures = 0;
        self.set_disabled(false);
    }

    /// Open the breaker by hand.
    pub fn disable(&mut self) {
        self.set_disabled(true);
    }

    fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
        // The in-memory flag stays authoritative for this run either way.
        if let Err(e) = self.store.save(disabled) {
            tracing::warn!(err = %e, disabled, "could not persist live channel flag");
        }
    }
}

impl std::fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("config", &self.config)
            .field("attempts", &self.attempts)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}
