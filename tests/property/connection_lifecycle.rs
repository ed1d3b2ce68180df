//! Property-based tests for the connection supervisor.
//!
//! Drives a [`Supervisor`] over the loopback connector through arbitrary
//! interleavings of user controls, timer expiries and server behavior, and
//! checks after every step that:
//! 1. At most one connection is live at the remote side.
//! 2. A connection handle is held exactly while connecting or connected.
//! 3. A pending reconnect only exists while disconnected.
//! 4. `Disabled` persists until the channel is enabled again.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chatlink::flag_store::MemoryFlagStore;
use chatlink::policy::{PolicyConfig, ReconnectPolicy};
use chatlink::supervisor::Supervisor;
use chatlink::transport::loopback::{LoopbackConnector, LoopbackServer};
use chatlink::transport::{ConnectionState, LiveEndpoint, SocketEvent};
use proptest::prelude::*;
use tokio::sync::mpsc;

/// Low thresholds so sequences reach the retry limit and the breaker.
const POLICY: PolicyConfig = PolicyConfig {
    max_attempts: 3,
    warn_threshold: 3,
    disable_threshold: 6,
};

#[derive(Debug, Clone)]
enum Step {
    Connect,
    Reconnect,
    Close,
    Enable,
    Disable,
    ReconnectDue,
    /// Server actions address attempt `pick % attempts`, so older
    /// generations get scripted too.
    Accept(usize),
    Fail(usize),
    ServerClose(usize, u16),
    Frame(usize),
}

fn arb_close_code() -> impl Strategy<Value = u16> {
    prop_oneof![Just(1000_u16), Just(1001), Just(1006), Just(4001), 1000_u16..5000]
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Connect),
        2 => Just(Step::Reconnect),
        1 => Just(Step::Close),
        1 => Just(Step::Enable),
        1 => Just(Step::Disable),
        3 => Just(Step::ReconnectDue),
        4 => any::<usize>().prop_map(Step::Accept),
        4 => any::<usize>().prop_map(Step::Fail),
        2 => (any::<usize>(), arb_close_code()).prop_map(|(i, c)| Step::ServerClose(i, c)),
        2 => any::<usize>().prop_map(Step::Frame),
    ]
}

struct Rig {
    supervisor: Supervisor<LoopbackConnector>,
    server: LoopbackServer,
    events: mpsc::Receiver<SocketEvent>,
    store: MemoryFlagStore,
}

impl Rig {
    fn new() -> Self {
        let (connector, server) = LoopbackConnector::create();
        let endpoint =
            LiveEndpoint::parse("ws://loopback/api/chat/ws", Some("tok".into()), "patient")
                .unwrap();
        let store = MemoryFlagStore::default();
        let policy = ReconnectPolicy::load(POLICY, Arc::new(store.clone()));
        let (tx, events) = mpsc::channel(256);
        let supervisor = Supervisor::new(connector, endpoint, policy, tx, Duration::from_secs(5));
        Self {
            supervisor,
            server,
            events,
            store,
        }
    }

    fn target(&self, pick: usize) -> Option<usize> {
        let attempts = self.server.attempts();
        (attempts > 0).then(|| pick % attempts)
    }

    fn apply(&mut self, step: &Step) {
        match *step {
            Step::Connect => drop(self.supervisor.connect()),
            Step::Reconnect => drop(self.supervisor.reconnect()),
            Step::Close => drop(self.supervisor.close("user closed")),
            Step::Enable => drop(self.supervisor.enable()),
            Step::Disable => drop(self.supervisor.disable()),
            Step::ReconnectDue => drop(self.supervisor.on_reconnect_due()),
            Step::Accept(pick) => {
                if let Some(i) = self.target(pick) {
                    self.server.accept(i);
                }
            }
            Step::Fail(pick) => {
                if let Some(i) = self.target(pick) {
                    self.server.fail(i, "connection reset");
                }
            }
            Step::ServerClose(pick, code) => {
                if let Some(i) = self.target(pick) {
                    self.server.close(i, code);
                }
            }
            Step::Frame(pick) => {
                if let Some(i) = self.target(pick) {
                    self.server.push_frame(i, r#"{"type":"system","message":"hi"}"#);
                }
            }
        }
        while let Ok(event) = self.events.try_recv() {
            self.supervisor.handle_event(event);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn connection_invariants_hold_for_any_sequence(
        steps in prop::collection::vec(arb_step(), 1..80)
    ) {
        let mut rig = Rig::new();
        for step in &steps {
            let was_disabled = rig.supervisor.state() == ConnectionState::Disabled;
            rig.apply(step);
            let state = rig.supervisor.state();

            prop_assert!(rig.server.live_count() <= 1, "after {:?}", step);

            let active = matches!(state, ConnectionState::Connecting | ConnectionState::Connected);
            prop_assert_eq!(rig.supervisor.has_link(), active, "after {:?}", step);

            if rig.supervisor.reconnect_timer().is_armed() {
                prop_assert_eq!(state, ConnectionState::Disconnected, "after {:?}", step);
            }

            if was_disabled && !matches!(step, Step::Enable) {
                prop_assert_eq!(state, ConnectionState::Disabled, "after {:?}", step);
            }
            prop_assert_eq!(
                state == ConnectionState::Disabled,
                rig.store.get(),
                "after {:?}",
                step
            );
        }
    }
}
