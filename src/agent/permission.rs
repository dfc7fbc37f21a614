//! Approval workflow for tool invocations that need the user's consent.
//!
//! Each request moves `pending -> {approved, denied, expired}` exactly once.
//! Responses are applied optimistically; expiry is advisory UI state, the
//! server independently auto-denies after the same window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::message::{ChatMessage, MessageKind};
use crate::agent::state::Agent;
use crate::core::effect::{Effect, TimerKey};
use crate::protocol::ClientFrame;

/// Default window before an unanswered request expires
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Auto-approved server-side; never expected on the client
    Green,
    Yellow,
    /// Approval requires the user's PIN
    Red,
    /// Approval for a computer-use action; handled like yellow
    Computer,
}

impl PermissionLevel {
    pub fn requires_pin(&self) -> bool {
        matches!(self, PermissionLevel::Red)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Green => "green",
            PermissionLevel::Yellow => "yellow",
            PermissionLevel::Red => "red",
            PermissionLevel::Computer => "computer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    #[default]
    Pending,
    Approved,
    Denied,
    Expired,
}

impl PermissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PermissionStatus::Pending)
    }
}

/// Bookkeeping for a request that is still awaiting a decision
#[derive(Debug, Clone)]
pub struct PendingPermission {
    pub request_id: String,
    pub tool: String,
    pub level: PermissionLevel,
    /// Index of the request's message in the agent conversation
    pub message_index: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Permission request {0} is not pending")]
    NotPending(String),

    #[error("Permission request {0} requires a PIN to approve")]
    PinRequired(String),
}

pub struct PermissionCoordinator {
    timeout: Duration,
}

impl Default for PermissionCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_PERMISSION_TIMEOUT)
    }
}

impl PermissionCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register an incoming `permission_request` and start its expiry timer
    #[allow(clippy::too_many_arguments)]
    pub fn on_request(
        &self,
        agent: &mut Agent,
        request_id: String,
        tool: String,
        input: Value,
        level: PermissionLevel,
        reason: Option<String>,
        effects: &mut Vec<Effect>,
    ) {
        if agent.pending_permissions.contains_key(&request_id) {
            tracing::warn!(
                agent_id = %agent.id,
                %request_id,
                "Duplicate permission_request ignored"
            );
            return;
        }
        if level == PermissionLevel::Green {
            tracing::warn!(
                agent_id = %agent.id,
                %request_id,
                "Green permission request reached the client, treating as yellow"
            );
        }

        let message_index = agent.push_message(ChatMessage::new(MessageKind::PermissionRequest {
            request_id: request_id.clone(),
            tool: tool.clone(),
            input,
            level,
            reason,
            status: PermissionStatus::Pending,
        }));

        effects.push(Effect::ScheduleTimer {
            key: TimerKey::PermissionExpiry {
                agent_id: agent.id.clone(),
                request_id: request_id.clone(),
            },
            after: self.timeout,
        });

        agent.pending_permissions.insert(
            request_id.clone(),
            PendingPermission {
                request_id,
                tool,
                level,
                message_index,
                created_at: Utc::now(),
            },
        );
    }

    /// Answer a pending request; the local status flips optimistically
    pub fn respond(
        &self,
        agent: &mut Agent,
        request_id: &str,
        approved: bool,
        pin: Option<String>,
        effects: &mut Vec<Effect>,
    ) -> Result<PermissionStatus, PermissionError> {
        let pending = agent
            .pending_permissions
            .get(request_id)
            .ok_or_else(|| PermissionError::NotPending(request_id.to_string()))?;

        let pin = pin.filter(|p| !p.trim().is_empty());
        if approved && pending.level.requires_pin() && pin.is_none() {
            return Err(PermissionError::PinRequired(request_id.to_string()));
        }

        let status = if approved {
            PermissionStatus::Approved
        } else {
            PermissionStatus::Denied
        };

        effects.push(Effect::Send(ClientFrame::PermissionResponse {
            request_id: request_id.to_string(),
            agent_id: Some(agent.id.clone()),
            approved,
            pin,
        }));
        effects.push(Effect::CancelTimer(TimerKey::PermissionExpiry {
            agent_id: agent.id.clone(),
            request_id: request_id.to_string(),
        }));

        self.settle(agent, request_id, status);
        Ok(status)
    }

    /// Expire a request whose timer fired. Returns false when it was
    /// already settled.
    pub fn expire(&self, agent: &mut Agent, request_id: &str) -> bool {
        if !agent.pending_permissions.contains_key(request_id) {
            return false;
        }
        tracing::info!(agent_id = %agent.id, %request_id, "Permission request expired");
        self.settle(agent, request_id, PermissionStatus::Expired)
    }

    /// Move a pending request to a terminal status
    fn settle(&self, agent: &mut Agent, request_id: &str, status: PermissionStatus) -> bool {
        let Some(pending) = agent.pending_permissions.remove(request_id) else {
            return false;
        };

        let is_request = |m: &ChatMessage| {
            matches!(&m.kind, MessageKind::PermissionRequest { request_id: id, .. } if id == request_id)
        };
        // The conversation may have been replaced by a history reload
        let index = match agent.messages.get(pending.message_index) {
            Some(m) if is_request(m) => Some(pending.message_index),
            _ => agent.messages.iter().position(is_request),
        };
        if let Some(MessageKind::PermissionRequest { status: current, .. }) = index
            .and_then(|i| agent.messages.get_mut(i))
            .map(|m| &mut m.kind)
        {
            *current = status;
        }
        true
    }
}
