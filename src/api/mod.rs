//! REST side of the backend: authentication, stored history, directory
//! browsing, metrics and saved conversations.

mod client;
mod error;
pub mod types;

use async_trait::async_trait;

use crate::agent::{AgentId, MessageKind};

pub use client::ApiClient;
pub use error::ApiError;
pub use types::{DirectoryEntry, DirectoryListing, SavedConversation, MAX_SAVED_CONVERSATIONS};

/// Where recovery reloads an agent's conversation from
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch(&self, cwd: &str, agent_id: &AgentId) -> Result<Vec<MessageKind>, ApiError>;
}
