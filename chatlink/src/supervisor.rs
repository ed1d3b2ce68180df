//! Connection supervisor for the live channel.
//!
//! The supervisor is the only writer of [`ConnectionState`]. It owns at most
//! one [`LiveLink`], the reconnect [`TimerSlot`] and the
//! [`ReconnectPolicy`]. It does no I/O itself: the session feeds it
//! [`SocketEvent`]s and timer expiries, and it answers with
//! [`LinkUpdate`]s for the session to act on.
//!
//! Each physical connection gets a fresh generation number. Events tagged
//! with any other generation, or arriving after the link was released, are
//! stale and ignored.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::policy::{FailureVerdict, ReconnectPolicy};
use crate::timer::TimerSlot;
use crate::transport::{
    ConnectionState, Connector, LiveEndpoint, LiveLink, NORMAL_CLOSURE, SocketEvent,
    SocketEventKind, TransportError,
};

/// Reported when scheduled reconnects are exhausted.
pub const RETRIES_EXHAUSTED: &str =
    "failed to establish a stable connection after multiple attempts";

/// Reported when the failure policy trips.
pub const AUTO_DISABLED: &str = "live connection disabled after repeated failures; \
     messages will be sent through the fallback path";

/// Reported once when failures cross the warning threshold.
pub const REPEATED_FAILURES: &str =
    "live connection keeps failing; it will be disabled if this continues";

/// Something the session must act on after the supervisor handled an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUpdate {
    /// The connection state changed.
    State(ConnectionState),
    /// A text frame arrived on the current connection.
    Frame(String),
    /// Non-fatal warning for the user.
    Warning(String),
    /// Connection-level error for the user.
    Error(String),
}

/// Owns the live connection lifecycle.
pub struct Supervisor<C: Connector> {
    connector: C,
    endpoint: LiveEndpoint,
    policy: ReconnectPolicy,
    events: mpsc::Sender<SocketEvent>,
    state: ConnectionState,
    link: Option<LiveLink>,
    generation: u64,
    confirmed: bool,
    reconnect_timer: TimerSlot,
    reconnect_delay: Duration,
}

impl<C: Connector> Supervisor<C> {
    /// Create a supervisor. Connection events for every generation will be
    /// sent on `events`.
    ///
    /// Starts in [`ConnectionState::Disabled`] if the policy says so.
    pub fn new(
        connector: C,
        endpoint: LiveEndpoint,
        policy: ReconnectPolicy,
        events: mpsc::Sender<SocketEvent>,
        reconnect_delay: Duration,
    ) -> Self {
        let state = if policy.is_disabled() {
            ConnectionState::Disabled
        } else {
            ConnectionState::Disconnected
        };
        Self {
            connector,
            endpoint,
            policy,
            events,
            state,
            link: None,
            generation: 0,
            confirmed: false,
            reconnect_timer: TimerSlot::new(),
            reconnect_delay,
        }
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The failure policy.
    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Pending reconnect deadline, if any.
    #[must_use]
    pub const fn reconnect_timer(&self) -> &TimerSlot {
        &self.reconnect_timer
    }

    /// Generation of the most recent connection attempt.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a connection handle is currently held.
    #[must_use]
    pub const fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Open a connection unless one is open or opening.
    ///
    /// Does nothing while disabled. A missing credential is reported as an
    /// error update and no attempt is made.
    pub fn connect(&mut self) -> Vec<LinkUpdate> {
        let mut updates = Vec::new();
        self.start_attempt(&mut updates);
        updates
    }

    /// Close the current connection normally and cancel any pending retry.
    pub fn close(&mut self, reason: &str) -> Vec<LinkUpdate> {
        let mut updates = Vec::new();
        self.reconnect_timer.cancel();
        self.release_link(reason);
        if self.state != ConnectionState::Disabled {
            self.set_state(ConnectionState::Disconnected, &mut updates);
        }
        updates
    }

    /// Manual reconnect: abandon whatever is in flight, forget scheduled
    /// attempts and start over.
    pub fn reconnect(&mut self) -> Vec<LinkUpdate> {
        tracing::info!("manual reconnect requested");
        let mut updates = self.close("manual reconnect");
        self.policy.reset_attempts();
        self.start_attempt(&mut updates);
        updates
    }

    /// Clear the disabled flag and both counters, then connect.
    pub fn enable(&mut self) -> Vec<LinkUpdate> {
        tracing::info!("live channel enabled");
        let mut updates = Vec::new();
        self.policy.enable();
        if self.state == ConnectionState::Disabled {
            self.set_state(ConnectionState::Disconnected, &mut updates);
        }
        self.start_attempt(&mut updates);
        updates
    }

    /// Set the disabled flag and close the live connection.
    pub fn disable(&mut self) -> Vec<LinkUpdate> {
        tracing::info!("live channel disabled by user");
        let mut updates = Vec::new();
        self.policy.disable();
        self.reconnect_timer.cancel();
        self.release_link("live channel disabled");
        self.set_state(ConnectionState::Disabled, &mut updates);
        updates
    }

    /// Queue a text frame on the open connection.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotOpen`] unless connected, or whatever the link
    /// reports.
    pub fn transmit(&self, text: String) -> Result<(), TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(TransportError::NotOpen);
        }
        self.link
            .as_ref()
            .ok_or(TransportError::NotOpen)?
            .transmit(text)
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_due(&mut self) -> Vec<LinkUpdate> {
        let mut updates = Vec::new();
        if !self.reconnect_timer.cancel() {
            return updates;
        }
        self.policy.begin_retry();
        tracing::info!(
            attempt = self.policy.attempts(),
            max = self.policy.config().max_attempts,
            "reconnecting live channel"
        );
        self.start_attempt(&mut updates);
        updates
    }

    /// Apply an event from a connection task.
    pub fn handle_event(&mut self, event: SocketEvent) -> Vec<LinkUpdate> {
        let mut updates = Vec::new();
        if event.generation != self.generation || self.link.is_none() {
            tracing::trace!(
                event_generation = event.generation,
                current = self.generation,
                "ignoring event from stale connection"
            );
            return updates;
        }

        match event.kind {
            SocketEventKind::Opened => {
                tracing::info!(generation = self.generation, "live channel connected");
                self.policy.on_open();
                self.reconnect_timer.cancel();
                self.set_state(ConnectionState::Connected, &mut updates);
            }
            SocketEventKind::Frame(text) => {
                if !self.confirmed {
                    self.confirmed = true;
                    self.policy.record_success();
                }
                updates.push(LinkUpdate::Frame(text));
            }
            SocketEventKind::Error(reason) => {
                tracing::warn!(generation = self.generation, %reason, "live connection error");
                updates.push(LinkUpdate::Error(format!("live connection error: {reason}")));
                match self.policy.record_failure() {
                    FailureVerdict::Tolerated => {}
                    FailureVerdict::Warn => {
                        updates.push(LinkUpdate::Warning(REPEATED_FAILURES.to_string()));
                    }
                    FailureVerdict::Disable => self.trip(&mut updates),
                }
            }
            SocketEventKind::Closed { code, reason } => {
                self.link = None;
                if self.state == ConnectionState::Disabled {
                    return updates;
                }
                self.set_state(ConnectionState::Disconnected, &mut updates);
                if code == Some(NORMAL_CLOSURE) {
                    tracing::info!(%reason, "live channel closed normally");
                } else {
                    tracing::info!(?code, %reason, "live channel closed unexpectedly");
                    self.schedule_reconnect(&mut updates);
                }
            }
        }
        updates
    }

    fn start_attempt(&mut self, updates: &mut Vec<LinkUpdate>) {
        if self.policy.is_disabled() {
            tracing::debug!("live channel disabled, not connecting");
            return;
        }
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::debug!(state = %self.state, "connection already open or opening");
            return;
        }
        let url = match self.endpoint.request_url() {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(err = %e, "cannot open live channel");
                updates.push(LinkUpdate::Error(e.to_string()));
                return;
            }
        };

        self.reconnect_timer.cancel();
        self.release_link("superseded by new attempt");
        self.generation += 1;
        self.confirmed = false;
        tracing::info!(
            generation = self.generation,
            endpoint = %self.endpoint,
            "opening live channel"
        );
        self.link = Some(
            self.connector
                .open(self.generation, url, self.events.clone()),
        );
        self.set_state(ConnectionState::Connecting, updates);
    }

    fn schedule_reconnect(&mut self, updates: &mut Vec<LinkUpdate>) {
        if self.policy.is_disabled() || self.reconnect_timer.is_armed() {
            return;
        }
        if self.policy.retry_allowed() {
            tracing::info!(delay = ?self.reconnect_delay, "scheduling reconnect");
            self.reconnect_timer.arm(self.reconnect_delay);
        } else {
            tracing::warn!(
                attempts = self.policy.attempts(),
                "giving up on live channel"
            );
            updates.push(LinkUpdate::Error(RETRIES_EXHAUSTED.to_string()));
        }
    }

    fn trip(&mut self, updates: &mut Vec<LinkUpdate>) {
        self.reconnect_timer.cancel();
        self.release_link("live channel disabled");
        self.set_state(ConnectionState::Disabled, updates);
        updates.push(LinkUpdate::Error(AUTO_DISABLED.to_string()));
    }

    fn release_link(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            tracing::debug!(generation = link.generation(), %reason, "closing live connection");
            link.close(NORMAL_CLOSURE, reason);
        }
    }

    fn set_state(&mut self, state: ConnectionState, updates: &mut Vec<LinkUpdate>) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "connection state change");
            self.state = state;
            updates.push(LinkUpdate::State(state));
        }
    }
}
