use crate::agent::session::AgentId;
use crate::connection::ConnectionStatus;

/// Notifications published to whatever UI observes the session.
///
/// Events only say *what* changed; observers read the current state back
/// through the session handle.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    AgentCreated(AgentId),
    /// Messages, flags or status of an agent changed
    AgentUpdated(AgentId),
    AgentRemoved(AgentId),
    ForegroundChanged(AgentId),
    /// The session token is gone; the UI must return to PIN entry
    AuthenticationRequired,
    ApiKeyLoaded { provider: String },
    /// Interrupt grace period elapsed without the agent stopping
    ForceStopAvailable(AgentId),
    PermissionExpired { agent_id: AgentId, request_id: String },
    /// Dismissable, non-fatal notice (e.g. a server rejection)
    Notice(String),
}

impl SessionEvent {
    /// Agent this event concerns, if any
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            SessionEvent::AgentCreated(id)
            | SessionEvent::AgentUpdated(id)
            | SessionEvent::AgentRemoved(id)
            | SessionEvent::ForegroundChanged(id)
            | SessionEvent::ForceStopAvailable(id) => Some(id),
            SessionEvent::PermissionExpired { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}
