//! Cancellable one-shot deadline used inside the session's select loop.

use std::time::Duration;

use tokio::time::Instant;

/// A single pending deadline, or none.
///
/// Arming replaces any previous deadline, so at most one timer of a kind is
/// ever pending. [`TimerSlot::fired`] never completes while disarmed, which
/// lets the slot sit in a `tokio::select!` branch unconditionally.
#[derive(Debug, Default, Clone)]
pub struct TimerSlot {
    deadline: Option<Instant>,
}

impl TimerSlot {
    /// A disarmed slot.
    #[must_use]
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Fire `delay` from now.
    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Fire at `deadline`.
    pub const fn arm_at(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Disarm. Returns whether a deadline was pending.
    pub const fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Whether a deadline is pending.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The pending deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes at the deadline; pends forever while disarmed.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
