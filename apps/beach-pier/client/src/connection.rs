//! Connection lifecycle as a pure state machine.
//!
//! [`ConnectionMachine::handle`] consumes one [`ConnectionEvent`] and returns
//! the [`Effect`]s the driver must perform. It never touches a socket or a
//! timer itself, which keeps every transition testable without a runtime.
//!
//! Each transport gets a fresh [`ConnectionId`] and each scheduled retry a
//! fresh [`TimerId`]; events carrying anything but the current ids are stale
//! and are dropped.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::events::{Notice, UpdateEvent};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a transport opened by a reconnect attempt closes before
/// it ever reached `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectingFailurePolicy {
    /// Count the failure and schedule the next attempt until the ceiling.
    #[default]
    Retry,
    /// Stop the episode after the first failed attempt.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub connecting_failures: ConnectingFailurePolicy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            connecting_failures: ConnectingFailurePolicy::default(),
        }
    }
}

impl ReconnectPolicy {
    /// Linear backoff: `min(attempt * base, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    DisconnectRequested,
    TransportOpened(ConnectionId),
    TransportError {
        connection: ConnectionId,
        message: String,
    },
    TransportClosed(ConnectionId),
    ReconnectTimerFired(TimerId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenTransport(ConnectionId),
    CloseTransport(ConnectionId),
    ScheduleReconnect {
        timer: TimerId,
        delay: Duration,
        attempt: u32,
    },
    CancelReconnect(TimerId),
    Emit(UpdateEvent),
}

#[derive(Debug)]
pub struct ConnectionMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    manual_disconnect: bool,
    in_episode: bool,
    active: Option<ConnectionId>,
    pending_timer: Option<TimerId>,
    next_connection: u64,
    next_timer: u64,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            manual_disconnect: false,
            in_episode: false,
            active: None,
            pending_timer: None,
            next_connection: 1,
            next_timer: 1,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.active
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            ConnectionEvent::ConnectRequested => {
                self.manual_disconnect = false;
                self.in_episode = false;
                self.cancel_pending(&mut effects);
                self.begin_connect(&mut effects);
            }
            ConnectionEvent::DisconnectRequested => self.on_disconnect(&mut effects),
            ConnectionEvent::TransportOpened(id) => self.on_opened(id, &mut effects),
            ConnectionEvent::TransportError { connection, message } => {
                if self.active == Some(connection) {
                    warn!(
                        target: "beach_pier::connection",
                        connection = %connection,
                        error = %message,
                        "transport error"
                    );
                    effects.push(Effect::Emit(UpdateEvent::Notice(Notice::TransportError(
                        message,
                    ))));
                } else {
                    debug!(target: "beach_pier::connection", connection = %connection, "ignoring error from stale transport");
                }
            }
            ConnectionEvent::TransportClosed(id) => self.on_closed(id, &mut effects),
            ConnectionEvent::ReconnectTimerFired(timer) => self.on_timer(timer, &mut effects),
        }
        effects
    }

    fn begin_connect(&mut self, effects: &mut Vec<Effect>) {
        if let Some(previous) = self.active.take() {
            effects.push(Effect::CloseTransport(previous));
        }
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.active = Some(id);
        self.set_state(ConnectionState::Connecting, effects);
        effects.push(Effect::OpenTransport(id));
    }

    fn on_disconnect(&mut self, effects: &mut Vec<Effect>) {
        self.manual_disconnect = true;
        self.in_episode = false;
        self.cancel_pending(effects);
        if let Some(active) = self.active.take() {
            effects.push(Effect::CloseTransport(active));
        }
        self.set_state(ConnectionState::Disconnected, effects);
    }

    fn on_opened(&mut self, id: ConnectionId, effects: &mut Vec<Effect>) {
        if self.active != Some(id) || self.state != ConnectionState::Connecting {
            debug!(target: "beach_pier::connection", connection = %id, "ignoring open from stale transport");
            return;
        }
        if self.attempts > 0 {
            info!(
                target: "beach_pier::connection",
                connection = %id,
                attempts = self.attempts,
                "reconnected"
            );
        }
        self.attempts = 0;
        self.in_episode = false;
        self.set_state(ConnectionState::Connected, effects);
    }

    fn on_closed(&mut self, id: ConnectionId, effects: &mut Vec<Effect>) {
        if self.active != Some(id) {
            debug!(target: "beach_pier::connection", connection = %id, "ignoring close from stale transport");
            return;
        }
        self.active = None;
        let previous = self.state;
        self.set_state(ConnectionState::Disconnected, effects);
        if self.manual_disconnect {
            return;
        }

        let eligible = match previous {
            ConnectionState::Connected => true,
            ConnectionState::Connecting => {
                self.in_episode
                    && self.policy.connecting_failures == ConnectingFailurePolicy::Retry
            }
            ConnectionState::Disconnected => false,
        };
        if !eligible {
            if previous == ConnectionState::Connecting && self.in_episode {
                warn!(
                    target: "beach_pier::connection",
                    attempt = self.attempts,
                    "reconnect attempt failed; not retrying"
                );
                effects.push(Effect::Emit(UpdateEvent::Notice(
                    Notice::ReconnectAbandoned {
                        attempt: self.attempts,
                    },
                )));
            } else {
                info!(target: "beach_pier::connection", connection = %id, "connect attempt failed");
            }
            self.in_episode = false;
            return;
        }

        if self.attempts >= self.policy.max_attempts {
            error!(
                target: "beach_pier::connection",
                attempts = self.attempts,
                "reconnect attempts exhausted"
            );
            self.in_episode = false;
            effects.push(Effect::Emit(UpdateEvent::Notice(
                Notice::ReconnectExhausted {
                    attempts: self.attempts,
                },
            )));
            return;
        }

        self.attempts += 1;
        self.in_episode = true;
        let delay = self.policy.delay_for(self.attempts);
        let timer = TimerId(self.next_timer);
        self.next_timer += 1;
        self.pending_timer = Some(timer);
        info!(
            target: "beach_pier::connection",
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "connection lost; scheduling reconnect"
        );
        effects.push(Effect::Emit(UpdateEvent::Notice(Notice::ConnectionLost {
            delay,
            attempt: self.attempts,
            max_attempts: self.policy.max_attempts,
        })));
        effects.push(Effect::ScheduleReconnect {
            timer,
            delay,
            attempt: self.attempts,
        });
    }

    fn on_timer(&mut self, timer: TimerId, effects: &mut Vec<Effect>) {
        if self.pending_timer != Some(timer) {
            debug!(target: "beach_pier::connection", timer = timer.0, "ignoring superseded reconnect timer");
            return;
        }
        self.pending_timer = None;
        // Intent may have changed while the timer was pending.
        if self.manual_disconnect || self.state != ConnectionState::Disconnected {
            return;
        }
        effects.push(Effect::Emit(UpdateEvent::Notice(Notice::Reconnecting {
            attempt: self.attempts,
            max_attempts: self.policy.max_attempts,
        })));
        self.begin_connect(effects);
    }

    fn cancel_pending(&mut self, effects: &mut Vec<Effect>) {
        if let Some(timer) = self.pending_timer.take() {
            effects.push(Effect::CancelReconnect(timer));
        }
    }

    fn set_state(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state == next {
            return;
        }
        debug!(
            target: "beach_pier::connection",
            from = self.state.as_str(),
            to = next.as_str(),
            "connection state changed"
        );
        self.state = next;
        effects.push(Effect::Emit(UpdateEvent::StatusChanged(next)));
    }
}
