pub mod agent;
pub mod api;
pub mod config;
pub mod connection;
pub mod core;
pub mod protocol;
pub mod util;

pub use agent::{
    Agent, AgentId, AgentMode, AgentRegistry, AgentStatus, ChatMessage, MessageKind,
    PermissionLevel, PermissionStatus, SessionId,
};
pub use api::{ApiClient, ApiError, HistorySource};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionStatus, Endpoint};
pub use crate::core::{ChatSession, SessionCore, SessionError, SessionEvent, SessionSettings};
pub use protocol::{ClientFrame, FrameCodec, ServerFrame};
