//! Connection lifecycle as a pure state machine.
//!
//! Nothing here touches the network: every transition appends the
//! [`Effect`]s the driver must perform (open/close the socket, arm or cancel
//! the reconnect timer, answer a heartbeat).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::effect::{Effect, TimerKey};
use crate::core::events::SessionEvent;
use crate::protocol::ClientFrame;

/// Invalid or expired session token. Never retried.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// Server idle timeout after 10 minutes without traffic. Benign.
pub const CLOSE_IDLE_TIMEOUT: u16 = 4002;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    /// Last attempt failed; a retry is scheduled
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

/// How a close (or failed open) was interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Token discarded, the user must authenticate again
    Reauthenticate,
    /// Benign idle timeout, reopened without delay
    ReconnectNow,
    /// Transient failure, retry scheduled
    Retry { attempt: u32, after: Duration },
    /// Close we asked for, or one arriving while already torn down
    Ignored,
}

/// Bounded fixed-delay retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

#[derive(Debug)]
pub struct ConnectionState {
    status: ConnectionStatus,
    token: Option<String>,
    consecutive_failures: u32,
    last_heartbeat_at: Option<DateTime<Utc>>,
    policy: ReconnectPolicy,
    /// Set once `AuthenticationRequired` was announced for the current
    /// teardown; cleared when a new token arrives
    auth_required: bool,
    /// A socket is open or being opened
    socket_live: bool,
}

impl ConnectionState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            token: None,
            consecutive_failures: 0,
            last_heartbeat_at: None,
            policy,
            auth_required: false,
            socket_live: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat_at
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
        self.auth_required = false;
        self.consecutive_failures = 0;
    }

    fn set_status(&mut self, status: ConnectionStatus, effects: &mut Vec<Effect>) {
        if self.status != status {
            tracing::info!(from = self.status.as_str(), to = status.as_str(), "Connection status");
            self.status = status;
            effects.push(Effect::Emit(SessionEvent::StatusChanged(status)));
        }
    }

    /// Open a connection with the current token, superseding any pending
    /// reconnect. Returns false when there is no token to connect with.
    pub fn connect(&mut self, effects: &mut Vec<Effect>) -> bool {
        effects.push(Effect::CancelTimer(TimerKey::Reconnect));

        let Some(token) = self.token.clone() else {
            tracing::warn!("connect() without a session token");
            return false;
        };

        if self.socket_live {
            effects.push(Effect::CloseSocket);
        }
        self.socket_live = true;
        self.set_status(ConnectionStatus::Connecting, effects);
        effects.push(Effect::OpenSocket { token });
        true
    }

    /// The socket finished its handshake
    pub fn on_open(&mut self, effects: &mut Vec<Effect>) {
        self.consecutive_failures = 0;
        self.set_status(ConnectionStatus::Connected, effects);
    }

    /// Answer a server heartbeat
    pub fn on_ping(&mut self, effects: &mut Vec<Effect>) {
        self.last_heartbeat_at = Some(Utc::now());
        effects.push(Effect::Send(ClientFrame::Pong {}));
    }

    /// The socket closed, or an attempt failed before it ever opened
    /// (`code` is None then).
    pub fn on_close(&mut self, code: Option<u16>, effects: &mut Vec<Effect>) -> CloseDisposition {
        if !self.socket_live {
            return CloseDisposition::Ignored;
        }
        self.socket_live = false;

        match code {
            Some(CLOSE_AUTH_FAILED) => {
                tracing::warn!(code = CLOSE_AUTH_FAILED, "Session token rejected");
                self.require_authentication(effects);
                CloseDisposition::Reauthenticate
            }
            Some(CLOSE_IDLE_TIMEOUT) => {
                tracing::info!(code = CLOSE_IDLE_TIMEOUT, "Idle timeout, reconnecting");
                self.connect(effects);
                CloseDisposition::ReconnectNow
            }
            other => {
                self.consecutive_failures += 1;
                let attempt = self.consecutive_failures;
                if attempt >= self.policy.max_consecutive_failures {
                    tracing::warn!(
                        code = ?other,
                        failures = attempt,
                        "Too many consecutive connection failures, discarding token"
                    );
                    self.require_authentication(effects);
                    return CloseDisposition::Reauthenticate;
                }

                tracing::warn!(code = ?other, attempt, "Connection lost, retry scheduled");
                self.set_status(ConnectionStatus::Error, effects);
                effects.push(Effect::ScheduleTimer {
                    key: TimerKey::Reconnect,
                    after: self.policy.delay,
                });
                CloseDisposition::Retry {
                    attempt,
                    after: self.policy.delay,
                }
            }
        }
    }

    /// The reconnect timer fired
    pub fn on_reconnect_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.socket_live || self.token.is_none() {
            return;
        }
        self.connect(effects);
    }

    /// Discard the token and tear the connection down. Returns true on the
    /// transition into the unauthenticated state; repeated calls are no-ops
    /// apart from the teardown itself.
    pub fn require_authentication(&mut self, effects: &mut Vec<Effect>) -> bool {
        self.token = None;
        self.consecutive_failures = 0;
        effects.push(Effect::CancelTimer(TimerKey::Reconnect));
        if self.socket_live {
            self.socket_live = false;
            effects.push(Effect::CloseSocket);
        }
        self.set_status(ConnectionStatus::Disconnected, effects);

        if self.auth_required {
            return false;
        }
        self.auth_required = true;
        effects.push(Effect::Emit(SessionEvent::AuthenticationRequired));
        true
    }

    /// User-initiated close. The token is kept.
    pub fn disconnect(&mut self, effects: &mut Vec<Effect>) {
        effects.push(Effect::CancelTimer(TimerKey::Reconnect));
        if self.socket_live {
            self.socket_live = false;
            effects.push(Effect::CloseSocket);
        }
        self.set_status(ConnectionStatus::Disconnected, effects);
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}
