use base64::engine::general_purpose;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::permission::PermissionLevel;
use crate::agent::session::AgentId;
use crate::agent::state::AgentMode;

/// Image attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub media_type: String,
    /// Base64-encoded image bytes
    pub data: String,
}

impl ImageAttachment {
    pub fn from_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            data: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Raw image bytes
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_base64_image(&self.data).map(|(bytes, _)| bytes)
    }
}

/// Decode a base64 image payload, plain or as a `data:` URL. The media type
/// is returned when the payload carries one.
pub fn decode_base64_image(data: &str) -> Result<(Vec<u8>, Option<String>), base64::DecodeError> {
    if let Some(rest) = data.strip_prefix("data:") {
        if let Some((media_type, encoded)) = rest.split_once(";base64,") {
            let bytes = general_purpose::STANDARD.decode(encoded.trim().as_bytes())?;
            return Ok((bytes, Some(media_type.to_string())));
        }
    }
    let bytes = general_purpose::STANDARD.decode(data.trim().as_bytes())?;
    Ok((bytes, None))
}

/// Frames sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        text: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageAttachment>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },

    SetCwd {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    SetApiKey {
        key: String,
        provider: String,
        model: String,
    },

    SetTranscriptionLang {
        lang: String,
    },

    Interrupt {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },

    DestroyAgent {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },

    PermissionResponse {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        approved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },

    SetMode {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        mode: AgentMode,
    },

    EmergencyStop {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
    },

    Pong {},
}

impl ClientFrame {
    /// Wire name of this frame type
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientFrame::SendMessage { .. } => "send_message",
            ClientFrame::SetCwd { .. } => "set_cwd",
            ClientFrame::SetApiKey { .. } => "set_api_key",
            ClientFrame::SetTranscriptionLang { .. } => "set_transcription_lang",
            ClientFrame::Interrupt { .. } => "interrupt",
            ClientFrame::DestroyAgent { .. } => "destroy_agent",
            ClientFrame::PermissionResponse { .. } => "permission_response",
            ClientFrame::SetMode { .. } => "set_mode",
            ClientFrame::EmergencyStop { .. } => "emergency_stop",
            ClientFrame::Pong {} => "pong",
        }
    }

    /// Agent tag slot, for frames that are addressed to an agent
    pub fn agent_slot(&mut self) -> Option<&mut Option<AgentId>> {
        match self {
            ClientFrame::SendMessage { agent_id, .. }
            | ClientFrame::SetCwd { agent_id, .. }
            | ClientFrame::Interrupt { agent_id }
            | ClientFrame::DestroyAgent { agent_id }
            | ClientFrame::PermissionResponse { agent_id, .. }
            | ClientFrame::SetMode { agent_id, .. }
            | ClientFrame::EmergencyStop { agent_id } => Some(agent_id),
            ClientFrame::SetApiKey { .. }
            | ClientFrame::SetTranscriptionLang { .. }
            | ClientFrame::Pong {} => None,
        }
    }

    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            ClientFrame::SendMessage { agent_id, .. }
            | ClientFrame::SetCwd { agent_id, .. }
            | ClientFrame::Interrupt { agent_id }
            | ClientFrame::DestroyAgent { agent_id }
            | ClientFrame::PermissionResponse { agent_id, .. }
            | ClientFrame::SetMode { agent_id, .. }
            | ClientFrame::EmergencyStop { agent_id } => agent_id.as_ref(),
            _ => None,
        }
    }
}

/// Token accounting reported with a terminal `result` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status {
        #[serde(default)]
        text: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    ApiKeyLoaded {
        provider: String,
    },

    AssistantText {
        text: String,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    ToolUse {
        tool: String,
        #[serde(default)]
        input: Value,
        id: String,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
        tool_use_id: String,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    PermissionRequest {
        request_id: String,
        #[serde(default)]
        agent_id: Option<AgentId>,
        tool: String,
        #[serde(default)]
        input: Value,
        level: PermissionLevel,
        #[serde(default)]
        reason: Option<String>,
    },

    Result {
        #[serde(default)]
        usage: Option<Usage>,
        #[serde(default)]
        cost: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    Error {
        #[serde(alias = "message")]
        text: String,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    ModelInfo {
        model: String,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    RateLimits {
        #[serde(default)]
        limits: Value,
        #[serde(default)]
        agent_id: Option<AgentId>,
    },

    AgentDestroyed {
        agent_id: AgentId,
    },

    ModeChanged {
        #[serde(default)]
        agent_id: Option<AgentId>,
        mode: AgentMode,
        #[serde(default)]
        display_info: Value,
    },

    ComputerScreenshot {
        #[serde(default)]
        agent_id: Option<AgentId>,
        image: String,
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        iteration: Option<u32>,
    },

    ComputerAction {
        #[serde(default)]
        agent_id: Option<AgentId>,
        #[serde(default)]
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

    Ping {
        #[serde(default)]
        ts: Option<i64>,
    },

    /// Unknown frame type (for forward compatibility)
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Get the wire type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerFrame::Status { .. } => "status",
            ServerFrame::ApiKeyLoaded { .. } => "api_key_loaded",
            ServerFrame::AssistantText { .. } => "assistant_text",
            ServerFrame::ToolUse { .. } => "tool_use",
            ServerFrame::ToolResult { .. } => "tool_result",
            ServerFrame::PermissionRequest { .. } => "permission_request",
            ServerFrame::Result { .. } => "result",
            ServerFrame::Error { .. } => "error",
            ServerFrame::ModelInfo { .. } => "model_info",
            ServerFrame::RateLimits { .. } => "rate_limits",
            ServerFrame::AgentDestroyed { .. } => "agent_destroyed",
            ServerFrame::ModeChanged { .. } => "mode_changed",
            ServerFrame::ComputerScreenshot { .. } => "computer_screenshot",
            ServerFrame::ComputerAction { .. } => "computer_action",
            ServerFrame::Ping { .. } => "ping",
            ServerFrame::Unknown => "unknown",
        }
    }

    /// The agent this frame is addressed to, if the server tagged it
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            ServerFrame::Status { agent_id, .. }
            | ServerFrame::AssistantText { agent_id, .. }
            | ServerFrame::ToolUse { agent_id, .. }
            | ServerFrame::ToolResult { agent_id, .. }
            | ServerFrame::PermissionRequest { agent_id, .. }
            | ServerFrame::Result { agent_id, .. }
            | ServerFrame::Error { agent_id, .. }
            | ServerFrame::ModelInfo { agent_id, .. }
            | ServerFrame::RateLimits { agent_id, .. }
            | ServerFrame::ModeChanged { agent_id, .. }
            | ServerFrame::ComputerScreenshot { agent_id, .. }
            | ServerFrame::ComputerAction { agent_id, .. } => agent_id.as_ref(),
            ServerFrame::AgentDestroyed { agent_id } => Some(agent_id),
            ServerFrame::ApiKeyLoaded { .. } | ServerFrame::Ping { .. } | ServerFrame::Unknown => {
                None
            }
        }
    }

    /// Whether this frame is session-scoped rather than addressed to an agent
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            ServerFrame::Ping { .. } | ServerFrame::ApiKeyLoaded { .. } | ServerFrame::Unknown
        )
    }

    /// Whether this frame terminates an in-progress assistant text stream
    pub fn finalizes_stream(&self) -> bool {
        matches!(
            self,
            ServerFrame::ToolUse { .. } | ServerFrame::Result { .. } | ServerFrame::Error { .. }
        )
    }
}
