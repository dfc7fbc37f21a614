use crate::agent::permission::PermissionError;
use crate::agent::session::AgentId;
use crate::api::ApiError;
use crate::protocol::CodecError;

/// Errors returned by session operations. None of them leave the session in
/// a partially mutated state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("No active agent")]
    NoActiveAgent,

    #[error("Agent {0} has no working directory")]
    NoWorkingDirectory(AgentId),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Cannot close the last remaining agent")]
    LastAgent,

    #[error("Not connected")]
    NotConnected,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session driver has stopped")]
    DriverStopped,
}
