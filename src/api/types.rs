use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::MessageKind;

/// Most conversations the server keeps per user
pub const MAX_SAVED_CONVERSATIONS: usize = 5;

#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub pin: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthResponse {
    pub token: String,
}

/// Error body returned alongside non-2xx statuses
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default, alias = "message")]
    pub error: Option<String>,
    #[serde(default, alias = "remainingAttempts")]
    pub remaining_attempts: Option<u32>,
    #[serde(default, alias = "retryAfter")]
    pub retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<Value>,
}

impl HistoryResponse {
    /// Decode each entry, skipping (and logging) ones of unknown shape
    pub fn into_messages(self) -> Vec<MessageKind> {
        self.messages
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<MessageKind>(value) {
                Ok(kind) => Some(kind),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable history entry");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    #[serde(default, alias = "isDirectory")]
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub path: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub entries: Vec<DirectoryEntry>,
}

/// A conversation snapshot stored server-side. `id` is stable across
/// saves so re-saving replaces rather than duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedConversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default, alias = "savedAt")]
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ConversationsResponse {
    Wrapped { conversations: Vec<SavedConversation> },
    List(Vec<SavedConversation>),
}

impl ConversationsResponse {
    pub fn into_vec(self) -> Vec<SavedConversation> {
        match self {
            ConversationsResponse::Wrapped { conversations } => conversations,
            ConversationsResponse::List(list) => list,
        }
    }
}
