//! Liveness tracking for one push connection.
//!
//! The writer task owns a [`Heartbeat`], sleeps until [`Heartbeat::next_wakeup`]
//! and acts on whatever [`Heartbeat::poll`] returns. Pongs observed by the
//! read loop are fed back through [`Heartbeat::on_pong`].

use harrow_config::WebSocketConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Connected,
    AwaitingPong,
    TimedOut,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due yet.
    Idle,
    SendPing,
    /// The peer missed its pong deadline; drop the connection.
    Expire,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    state: HeartbeatState,
    ping_period: Duration,
    pong_wait: Duration,
    last_pong: Instant,
    next_ping: Instant,
}

impl Heartbeat {
    pub fn new(config: &WebSocketConfig, now: Instant) -> Self {
        Self {
            state: HeartbeatState::Connected,
            ping_period: config.ping_period,
            pong_wait: config.pong_wait,
            last_pong: now,
            next_ping: now + config.ping_period,
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, HeartbeatState::TimedOut | HeartbeatState::Closed)
    }

    fn deadline(&self) -> Instant {
        self.last_pong + self.pong_wait
    }

    /// Earliest instant at which [`Heartbeat::poll`] can return something
    /// other than [`HeartbeatAction::Idle`].
    pub fn next_wakeup(&self) -> Instant {
        self.next_ping.min(self.deadline())
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if self.is_finished() {
            return HeartbeatAction::Idle;
        }
        if now >= self.deadline() {
            self.state = HeartbeatState::TimedOut;
            return HeartbeatAction::Expire;
        }
        if now >= self.next_ping {
            self.state = HeartbeatState::AwaitingPong;
            self.next_ping = now + self.ping_period;
            return HeartbeatAction::SendPing;
        }
        HeartbeatAction::Idle
    }

    pub fn on_pong(&mut self, now: Instant) {
        if self.is_finished() {
            return;
        }
        self.last_pong = now;
        self.state = HeartbeatState::Connected;
    }

    pub fn close(&mut self) {
        self.state = HeartbeatState::Closed;
    }
}
