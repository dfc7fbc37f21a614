pub mod message;
pub mod permission;
pub mod registry;
pub mod session;
pub mod state;
pub mod stream;
pub mod tools;

pub use message::{flatten_content, ChatMessage, MessageId, MessageKind};
pub use permission::{
    PendingPermission, PermissionCoordinator, PermissionError, PermissionLevel, PermissionStatus,
};
pub use registry::AgentRegistry;
pub use session::{AgentId, SessionId};
pub use state::{Agent, AgentMode, AgentStatus};
pub use stream::StreamAccumulator;
pub use tools::{ToolCorrelationTable, ToolPair};
