//! Conversation messages as a closed, tagged set of variants.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::agent::permission::{PermissionLevel, PermissionStatus};
use crate::protocol::ImageAttachment;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageId(u64);

impl MessageId {
    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One entry in an agent's ordered conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    /// Presentation hint only: true for messages that arrived live
    pub animate: bool,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl ChatMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            id: MessageId::next(),
            timestamp: Utc::now(),
            animate: true,
            kind,
        }
    }

    /// Build a message restored from server-side history (no entry animation)
    pub fn restored(kind: MessageKind) -> Self {
        Self {
            animate: false,
            ..Self::new(kind)
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageKind::System { text: text.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    User {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageAttachment>,
    },

    Assistant {
        text: String,
        #[serde(default)]
        is_streaming: bool,
    },

    System {
        text: String,
    },

    ToolUse {
        tool: String,
        #[serde(default)]
        input: Value,
        tool_use_id: String,
    },

    ToolResult {
        #[serde(deserialize_with = "content_as_text")]
        content: String,
        #[serde(default)]
        is_error: bool,
        tool_use_id: String,
    },

    PermissionRequest {
        request_id: String,
        tool: String,
        #[serde(default)]
        input: Value,
        level: PermissionLevel,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        status: PermissionStatus,
    },

    ComputerScreenshot {
        /// Base64-encoded image payload
        image: String,
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        iteration: Option<u32>,
    },

    ComputerAction {
        tool: String,
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        iteration: Option<u32>,
    },

    SubAgent {
        sub_agent_id: String,
        #[serde(default)]
        task: String,
        #[serde(default)]
        status: String,
        #[serde(default)]
        preview: Option<String>,
    },
}

impl MessageKind {
    /// Human-readable variant name for logs
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageKind::User { .. } => "User",
            MessageKind::Assistant { .. } => "Assistant",
            MessageKind::System { .. } => "System",
            MessageKind::ToolUse { .. } => "ToolUse",
            MessageKind::ToolResult { .. } => "ToolResult",
            MessageKind::PermissionRequest { .. } => "PermissionRequest",
            MessageKind::ComputerScreenshot { .. } => "ComputerScreenshot",
            MessageKind::ComputerAction { .. } => "ComputerAction",
            MessageKind::SubAgent { .. } => "SubAgent",
        }
    }
}

/// Flatten a tool result payload to display text.
///
/// Content can be a string or an array of `{ "type": "text", "text": ... }` blocks.
pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                other => other.get("text").and_then(|t| t.as_str()).map(String::from),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn content_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(flatten_content(&value))
}
