//! Typing indicators with explicit per-user deadlines.
//!
//! Every "typing" event pushes that user's deadline `quiet_period` into the
//! future. The tracker keeps one [`TimerSlot`] armed at the earliest
//! deadline so the session loop wakes exactly when something expires.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use chatlink_proto::message::{ConversationId, UserId};

use crate::timer::TimerSlot;

#[derive(Debug, Clone)]
struct Typist {
    conversation: ConversationId,
    deadline: Instant,
}

/// Who is typing right now.
#[derive(Debug)]
pub struct TypingTracker {
    quiet_period: Duration,
    typists: HashMap<UserId, Typist>,
    timer: TimerSlot,
}

impl TypingTracker {
    /// Indicators decay after `quiet_period` without a new event.
    #[must_use]
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            typists: HashMap::new(),
            timer: TimerSlot::new(),
        }
    }

    /// Wakes the session when the earliest indicator expires.
    #[must_use]
    pub const fn timer(&self) -> &TimerSlot {
        &self.timer
    }

    /// Whether `user` is currently typing.
    #[must_use]
    pub fn is_typing(&self, user: &UserId) -> bool {
        self.typists.contains_key(user)
    }

    /// Users typing in `conversation`.
    #[must_use]
    pub fn typing_in(&self, conversation: &ConversationId) -> Vec<&UserId> {
        self.typists
            .iter()
            .filter(|(_, t)| &t.conversation == conversation)
            .map(|(user, _)| user)
            .collect()
    }

    /// Apply a typing event observed at `now`. Returns whether the visible
    /// state of `user` changed.
    pub fn observe(
        &mut self,
        conversation: ConversationId,
        user: UserId,
        is_typing: bool,
        now: Instant,
    ) -> bool {
        let changed = if is_typing {
            let deadline = now + self.quiet_period;
            self.typists
                .insert(
                    user,
                    Typist {
                        conversation,
                        deadline,
                    },
                )
                .is_none()
        } else {
            self.typists.remove(&user).is_some()
        };
        self.rearm();
        changed
    }

    /// Remove every indicator whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(ConversationId, UserId)> {
        let expired: Vec<UserId> = self
            .typists
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(user, _)| user.clone())
            .collect();
        let mut out = Vec::with_capacity(expired.len());
        for user in expired {
            if let Some(typist) = self.typists.remove(&user) {
                out.push((typist.conversation, user));
            }
        }
        self.rearm();
        out
    }

    /// Drop all indicators and disarm the timer.
    pub fn clear(&mut self) {
        self.typists.clear();
        self.timer.cancel();
    }

    fn rearm(&mut self) {
        match self.typists.values().map(|t| t.deadline).min() {
            Some(deadline) => self.timer.arm_at(deadline),
            None => {
                self.timer.cancel();
            }
        }
    }
}
