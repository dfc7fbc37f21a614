use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::message::{ChatMessage, MessageKind};
use crate::agent::permission::PendingPermission;
use crate::agent::session::{AgentId, SessionId};
use crate::agent::stream::StreamAccumulator;
use crate::agent::tools::ToolCorrelationTable;

/// Agent mode (Coding vs Computer Use)
///
/// Coding (default): the assistant works against the agent's working directory
/// Computer Use: the assistant drives a desktop via screenshots and input actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Coding,
    #[serde(alias = "computerUse")]
    ComputerUse,
}

impl AgentMode {
    /// Display name for the UI
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentMode::Coding => "Coding",
            AgentMode::ComputerUse => "Computer Use",
        }
    }

    /// String representation on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Coding => "coding",
            AgentMode::ComputerUse => "computer_use",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "computer" | "computer_use" | "computeruse" => AgentMode::ComputerUse,
            _ => AgentMode::Coding,
        }
    }

    /// Toggle between Coding and Computer Use
    pub fn toggle(&self) -> Self {
        match self {
            AgentMode::Coding => AgentMode::ComputerUse,
            AgentMode::ComputerUse => AgentMode::Coding,
        }
    }
}

/// Last known outcome of an agent's work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Done,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
        }
    }
}

/// State of one multiplexed conversation
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    /// Working directory; None until chosen
    pub cwd: Option<String>,
    /// Whether the server has confirmed `cwd` for this agent
    pub registered: bool,
    pub session_id: Option<SessionId>,
    pub status: AgentStatus,
    /// Latest free-form `status` text from the server
    pub status_text: Option<String>,
    pub mode: AgentMode,
    pub model: Option<String>,
    pub rate_limits: Option<Value>,
    pub messages: Vec<ChatMessage>,
    pub stream: StreamAccumulator,
    pub tools: ToolCorrelationTable,
    pub pending_permissions: HashMap<String, PendingPermission>,
    pub is_processing: bool,
    pub interrupt_pending: bool,
    /// Set once the interrupt grace period elapsed without confirmation
    pub force_stop_available: bool,
    /// Local processing state was discarded by a force stop; the next
    /// authoritative frame for this agent reconciles it
    pub awaiting_reconciliation: bool,
    /// `destroy_agent` sent, waiting for `agent_destroyed`
    pub closing: bool,
    pub unread_count: u32,
    pub(crate) foreground: bool,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            cwd: None,
            registered: false,
            session_id: None,
            status: AgentStatus::Idle,
            status_text: None,
            mode: AgentMode::Coding,
            model: None,
            rate_limits: None,
            messages: Vec::new(),
            stream: StreamAccumulator::default(),
            tools: ToolCorrelationTable::default(),
            pending_permissions: HashMap::new(),
            is_processing: false,
            interrupt_pending: false,
            force_stop_available: false,
            awaiting_reconciliation: false,
            closing: false,
            unread_count: 0,
            foreground: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    fn note_appended(&mut self) {
        if !self.foreground {
            self.unread_count = self.unread_count.saturating_add(1);
        }
    }

    /// Append a message, returning its index in the conversation
    pub fn push_message(&mut self, message: ChatMessage) -> usize {
        self.note_appended();
        self.messages.push(message);
        self.messages.len() - 1
    }

    pub fn push_system(&mut self, text: impl Into<String>) -> usize {
        self.push_message(ChatMessage::system(text))
    }

    /// Feed one `assistant_text` chunk into the live stream
    pub fn append_chunk(&mut self, text: &str) {
        if self.stream.on_chunk(&mut self.messages, text) {
            self.note_appended();
        }
    }

    /// Close the live stream, if any
    pub fn finalize_stream(&mut self) {
        self.stream.finalize(&mut self.messages);
    }

    pub fn record_tool_use(&mut self, id: &str, tool: &str, input: Value) {
        self.tools.on_tool_use(&mut self.messages, id, tool, input);
        self.note_appended();
    }

    pub fn record_tool_result(&mut self, tool_use_id: &str, content: String, is_error: bool) {
        self.tools
            .on_tool_result(&mut self.messages, tool_use_id, content, is_error);
        self.note_appended();
    }

    /// Clear all transient processing flags
    pub fn clear_processing(&mut self) {
        self.is_processing = false;
        self.interrupt_pending = false;
        self.force_stop_available = false;
    }

    /// Replace the conversation with server-side history.
    ///
    /// A live assistant message moves to the end of the restored history and
    /// keeps receiving chunks. The tool index is rebuilt.
    pub fn replace_messages(&mut self, messages: Vec<ChatMessage>) {
        let previous = std::mem::replace(&mut self.messages, messages);
        self.stream.carry_over(previous, &mut self.messages);
        self.tools = ToolCorrelationTable::rebuild(&self.messages);
    }

    /// Most recent assistant message text, if any
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match &m.kind {
            MessageKind::Assistant { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}
