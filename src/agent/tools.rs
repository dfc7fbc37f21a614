//! Logical join between `tool_use` invocations and their `tool_result`s.

use std::collections::HashMap;

use crate::agent::message::{ChatMessage, MessageId, MessageKind};

/// The messages known for one tool invocation id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPair {
    pub tool_use: Option<MessageId>,
    pub tool_result: Option<MessageId>,
}

impl ToolPair {
    pub fn is_complete(&self) -> bool {
        self.tool_use.is_some() && self.tool_result.is_some()
    }
}

/// Per-agent index of tool invocations keyed by their shared identifier.
///
/// Uses and results stay as distinct messages in the conversation; this
/// table only records which of them belong together.
#[derive(Debug, Clone, Default)]
pub struct ToolCorrelationTable {
    pairs: HashMap<String, ToolPair>,
}

impl ToolCorrelationTable {
    /// Rebuild the index from an existing conversation (e.g. restored history)
    pub fn rebuild(messages: &[ChatMessage]) -> Self {
        let mut table = Self::default();
        for message in messages {
            match &message.kind {
                MessageKind::ToolUse { tool_use_id, .. } => {
                    table.entry(tool_use_id).tool_use = Some(message.id);
                }
                MessageKind::ToolResult { tool_use_id, .. } => {
                    table.entry(tool_use_id).tool_result = Some(message.id);
                }
                _ => {}
            }
        }
        table
    }

    fn entry(&mut self, tool_use_id: &str) -> &mut ToolPair {
        self.pairs.entry(tool_use_id.to_string()).or_default()
    }

    /// Record a `tool_use` and append it as its own message
    pub fn on_tool_use(
        &mut self,
        messages: &mut Vec<ChatMessage>,
        id: &str,
        tool: &str,
        input: serde_json::Value,
    ) -> MessageId {
        let message = ChatMessage::new(MessageKind::ToolUse {
            tool: tool.to_string(),
            input,
            tool_use_id: id.to_string(),
        });
        let message_id = message.id;
        messages.push(message);

        let pair = self.entry(id);
        if pair.tool_use.is_some() {
            tracing::warn!(tool_use_id = %id, "Duplicate tool_use id, newest wins");
        }
        pair.tool_use = Some(message_id);
        message_id
    }

    /// Record a `tool_result` and append it. Results without a prior
    /// `tool_use` are still appended.
    pub fn on_tool_result(
        &mut self,
        messages: &mut Vec<ChatMessage>,
        tool_use_id: &str,
        content: String,
        is_error: bool,
    ) -> MessageId {
        let message = ChatMessage::new(MessageKind::ToolResult {
            content,
            is_error,
            tool_use_id: tool_use_id.to_string(),
        });
        let message_id = message.id;
        messages.push(message);

        let pair = self.entry(tool_use_id);
        if pair.tool_use.is_none() {
            tracing::debug!(%tool_use_id, "tool_result without matching tool_use");
        }
        pair.tool_result = Some(message_id);
        message_id
    }

    pub fn pair(&self, tool_use_id: &str) -> Option<&ToolPair> {
        self.pairs.get(tool_use_id)
    }

    /// Tool invocations still waiting for a result
    pub fn outstanding(&self) -> impl Iterator<Item = &str> {
        self.pairs
            .iter()
            .filter(|(_, pair)| pair.tool_use.is_some() && pair.tool_result.is_none())
            .map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
