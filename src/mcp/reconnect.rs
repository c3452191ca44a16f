//! Reconnection policy as an explicit state machine
//!
//! [`ReconnectMachine`] is pure: it consumes [`ConnectionEvent`]s and returns
//! the [`Action`] the owner should perform next. It performs no I/O and
//! reads no clock, so every transition can be tested without sockets or
//! timers. Waiting is delegated to a [`Sleeper`], which tests replace with
//! a recording fake.
//!
//! ```text
//!                 ConnectRequested
//!  Disconnected ───────────────────► Connecting ──ConnectSucceeded──► Connected
//!       ▲                              ▲    │                            │
//!       │ ConnectFailed (explicit)     │    │ ConnectFailed (retry)      │ Closed
//!       └──────────────────────────────┘    ▼                            ▼
//!                                  BackoffElapsed ◄──────────────── Backoff
//!                                                  (attempts >= max) ──► Exhausted
//! ```

use std::time::Duration;

use async_trait::async_trait;

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts allowed after an unexpected close.
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and nothing scheduled.
    Disconnected,
    /// A connect is in progress. `attempt` is 0 for an explicit connect and
    /// the reconnect attempt number otherwise.
    Connecting { attempt: u32 },
    /// A live connection exists.
    Connected,
    /// Waiting `delay` before reconnect attempt `attempt`.
    Backoff { attempt: u32, delay: Duration },
    /// The reconnect budget is spent; only an explicit connect leaves this
    /// state.
    Exhausted { attempts: u32 },
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    ConnectSucceeded,
    ConnectFailed,
    /// The live connection ended without being asked to.
    Closed,
    DisconnectRequested,
    BackoffElapsed,
}

/// What the owner of the machine should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Open a connection and report the outcome.
    Connect,
    /// Sleep, then report [`ConnectionEvent::BackoffElapsed`].
    Wait(Duration),
    /// Stop retrying and surface the exhausted budget.
    GiveUp { attempts: u32 },
}

/// Pure reconnection state machine.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ReconnectMachine {
    /// Create a machine in [`ConnectionState::Disconnected`].
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive reconnect attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Apply `event` and return the next action.
    pub fn handle(&mut self, event: ConnectionEvent) -> Action {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self.state, event) {
            (_, E::DisconnectRequested) => {
                self.state = S::Disconnected;
                self.attempts = 0;
                Action::None
            }
            (S::Disconnected | S::Exhausted { .. }, E::ConnectRequested) => {
                self.attempts = 0;
                self.state = S::Connecting { attempt: 0 };
                Action::Connect
            }
            (S::Connecting { .. }, E::ConnectSucceeded) => {
                self.attempts = 0;
                self.state = S::Connected;
                Action::None
            }
            // An explicit connect reports its failure to the caller directly.
            (S::Connecting { attempt: 0 }, E::ConnectFailed) => {
                self.state = S::Disconnected;
                Action::None
            }
            (S::Connecting { .. }, E::ConnectFailed) | (S::Connected, E::Closed) => {
                self.schedule_retry()
            }
            (S::Backoff { attempt, .. }, E::BackoffElapsed) => {
                self.state = S::Connecting { attempt };
                Action::Connect
            }
            (state, event) => {
                tracing::debug!(?state, ?event, "ignoring event in current state");
                Action::None
            }
        }
    }

    fn schedule_retry(&mut self) -> Action {
        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::Exhausted {
                attempts: self.attempts,
            };
            return Action::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.state = ConnectionState::Backoff {
            attempt: self.attempts,
            delay,
        };
        Action::Wait(delay)
    }
}

/// Source of delays for the reconnect loop.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
