use std::time::Duration;

use crate::agent::session::AgentId;
use crate::protocol::ClientFrame;

use super::events::SessionEvent;

/// Identity of a scheduled timer. Scheduling a key that is already pending
/// replaces the earlier deadline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Next connection attempt after a failure
    Reconnect,
    /// Advisory expiry of a pending permission request
    PermissionExpiry {
        agent_id: AgentId,
        request_id: String,
    },
    /// Grace window after `interrupt` before force stop is offered
    InterruptGrace { agent_id: AgentId },
}

/// Side effects that should be executed outside the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open the socket, authenticating with the session token
    OpenSocket { token: String },
    CloseSocket,
    /// Write a frame on the open socket
    Send(ClientFrame),
    ScheduleTimer { key: TimerKey, after: Duration },
    CancelTimer(TimerKey),
    /// Load an agent's conversation from the REST history endpoint
    FetchHistory { agent_id: AgentId, cwd: String },
    /// Publish an event to observers
    Emit(SessionEvent),
}
