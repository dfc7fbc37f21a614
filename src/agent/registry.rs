//! The multiplexing table: every agent conversation sharing the connection.

use std::time::Duration;

use serde_json::Value;

use crate::agent::message::{flatten_content, ChatMessage, MessageKind};
use crate::agent::permission::PermissionCoordinator;
use crate::agent::session::{AgentId, SessionId};
use crate::agent::state::{Agent, AgentMode, AgentStatus};
use crate::core::effect::{Effect, TimerKey};
use crate::core::error::SessionError;
use crate::core::events::SessionEvent;
use crate::protocol::{ClientFrame, FrameCodec, ImageAttachment, ServerFrame, Usage};

/// Default window after `interrupt` before force stop is offered
pub const DEFAULT_INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// Owns all agents, which one is in the foreground, and the inbound frame
/// routing that mutates them.
pub struct AgentRegistry {
    agents: Vec<Agent>,
    active: Option<AgentId>,
    permissions: PermissionCoordinator,
    interrupt_grace: Duration,
    codec: FrameCodec,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(
            PermissionCoordinator::default(),
            DEFAULT_INTERRUPT_GRACE,
            FrameCodec::default(),
        )
    }
}

impl AgentRegistry {
    pub fn new(
        permissions: PermissionCoordinator,
        interrupt_grace: Duration,
        codec: FrameCodec,
    ) -> Self {
        Self {
            agents: Vec::new(),
            active: None,
            permissions,
            interrupt_grace,
            codec,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn active_id(&self) -> Option<&AgentId> {
        self.active.as_ref()
    }

    pub fn active_agent(&self) -> Option<&Agent> {
        self.active.as_ref().and_then(|id| self.agent(id))
    }

    /// Agents whose server-side state should be restored after a reconnect
    pub(crate) fn resumable_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents
            .iter_mut()
            .filter(|a| a.cwd.is_some() && !a.closing)
    }

    fn index_of(&self, id: &AgentId) -> Result<usize, SessionError> {
        self.agents
            .iter()
            .position(|a| &a.id == id)
            .ok_or_else(|| SessionError::UnknownAgent(id.clone()))
    }

    fn set_foreground(&mut self, id: &AgentId, effects: &mut Vec<Effect>) {
        for agent in &mut self.agents {
            agent.foreground = &agent.id == id;
            if agent.foreground {
                agent.unread_count = 0;
            }
        }
        self.active = Some(id.clone());
        effects.push(Effect::Emit(SessionEvent::ForegroundChanged(id.clone())));
    }

    /// Create a new agent with default state and bring it to the foreground.
    /// No working directory is registered yet.
    pub fn create_agent(&mut self, effects: &mut Vec<Effect>) -> AgentId {
        let id = AgentId::generate();
        self.agents.push(Agent::new(id.clone()));
        tracing::info!(agent_id = %id, total = self.agents.len(), "Agent created");
        effects.push(Effect::Emit(SessionEvent::AgentCreated(id.clone())));
        self.set_foreground(&id, effects);
        id
    }

    /// Change the foreground agent and clear its unread count. Nothing is
    /// sent to the server.
    pub fn switch_to_agent(
        &mut self,
        id: &AgentId,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        self.index_of(id)?;
        self.set_foreground(id, effects);
        Ok(())
    }

    /// Close an agent. Registered agents are removed once the server
    /// confirms with `agent_destroyed`; agents the server never saw are
    /// removed immediately.
    pub fn close_agent(
        &mut self,
        id: &AgentId,
        connected: bool,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        if self.agents[index].closing {
            if !connected {
                self.remove_at(index, effects);
            }
            return Ok(());
        }

        let open = self.agents.iter().filter(|a| !a.closing).count();
        if open <= 1 {
            return Err(SessionError::LastAgent);
        }

        let agent = &mut self.agents[index];
        if agent.registered && connected {
            agent.closing = true;
            effects.push(Effect::Send(ClientFrame::DestroyAgent {
                agent_id: Some(id.clone()),
            }));
            effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
            if self.active.as_ref() == Some(id) {
                self.select_successor(index, effects);
            }
        } else {
            self.remove_at(index, effects);
        }
        Ok(())
    }

    /// The socket closed and the server forgot its agents, so pending
    /// `destroy_agent` confirmations will never arrive
    pub fn drop_closing(&mut self, effects: &mut Vec<Effect>) {
        while let Some(index) = self.agents.iter().position(|a| a.closing) {
            self.remove_at(index, effects);
        }
    }

    /// Foreground the nearest agent that is not on its way out
    fn select_successor(&mut self, index: usize, effects: &mut Vec<Effect>) {
        let successor = self.agents[index..]
            .iter()
            .chain(self.agents[..index].iter().rev())
            .find(|a| !a.closing)
            .map(|a| a.id.clone());
        match successor {
            Some(next) => self.set_foreground(&next, effects),
            None => self.active = None,
        }
    }

    fn cancel_timers(agent: &Agent, effects: &mut Vec<Effect>) {
        for request_id in agent.pending_permissions.keys() {
            effects.push(Effect::CancelTimer(TimerKey::PermissionExpiry {
                agent_id: agent.id.clone(),
                request_id: request_id.clone(),
            }));
        }
        effects.push(Effect::CancelTimer(TimerKey::InterruptGrace {
            agent_id: agent.id.clone(),
        }));
    }

    fn remove_at(&mut self, index: usize, effects: &mut Vec<Effect>) {
        let agent = self.agents.remove(index);
        Self::cancel_timers(&agent, effects);
        tracing::info!(agent_id = %agent.id, remaining = self.agents.len(), "Agent removed");
        effects.push(Effect::Emit(SessionEvent::AgentRemoved(agent.id.clone())));

        if self.active.as_ref() == Some(&agent.id) {
            if self.agents.is_empty() {
                self.active = None;
            } else {
                self.select_successor(index.min(self.agents.len() - 1), effects);
            }
        }
    }

    /// Bind a working directory to an agent and register it with the server.
    /// The directory is recorded optimistically; a `status` frame carrying
    /// it confirms the registration.
    pub fn set_working_directory(
        &mut self,
        id: &AgentId,
        path: impl Into<String>,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        let path = path.into();
        let agent = &mut self.agents[index];

        if agent.cwd.as_deref() != Some(path.as_str()) {
            agent.session_id = None;
        }
        agent.cwd = Some(path.clone());
        agent.registered = false;

        effects.push(Effect::Send(ClientFrame::SetCwd {
            path,
            agent_id: Some(id.clone()),
            session_id: agent.session_id.as_ref().map(|s| s.as_str().to_string()),
        }));
        effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
        Ok(())
    }

    /// Send a user prompt to an agent.
    ///
    /// Fails without touching state when the agent has no working directory,
    /// the connection is down, or the frame would exceed the size limit.
    pub fn send_message(
        &mut self,
        id: &AgentId,
        text: impl Into<String>,
        images: Vec<ImageAttachment>,
        connected: bool,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        let text = text.into();
        if text.trim().is_empty() && images.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.agents[index].cwd.is_none() {
            return Err(SessionError::NoWorkingDirectory(id.clone()));
        }
        if !connected {
            return Err(SessionError::NotConnected);
        }

        let frame = ClientFrame::SendMessage {
            text: text.clone(),
            images: images.clone(),
            agent_id: Some(id.clone()),
        };
        self.codec.encode(&frame)?;

        let agent = &mut self.agents[index];
        agent.push_message(ChatMessage::new(MessageKind::User { text, images }));
        agent.status = AgentStatus::Working;
        agent.is_processing = true;
        agent.awaiting_reconciliation = false;

        effects.push(Effect::Send(frame));
        effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
        Ok(())
    }

    /// Ask the server to stop the agent's current turn and start the grace
    /// period after which force stop is offered.
    pub fn interrupt(&mut self, id: &AgentId, effects: &mut Vec<Effect>) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        effects.push(Effect::Send(ClientFrame::Interrupt {
            agent_id: Some(id.clone()),
        }));
        self.begin_interrupt(index, effects);
        Ok(())
    }

    /// Like `interrupt`, but asks the server to abort immediately
    pub fn emergency_stop(
        &mut self,
        id: &AgentId,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        effects.push(Effect::Send(ClientFrame::EmergencyStop {
            agent_id: Some(id.clone()),
        }));
        self.begin_interrupt(index, effects);
        Ok(())
    }

    fn begin_interrupt(&mut self, index: usize, effects: &mut Vec<Effect>) {
        let agent = &mut self.agents[index];
        if !agent.is_processing || agent.interrupt_pending {
            return;
        }
        agent.interrupt_pending = true;
        effects.push(Effect::ScheduleTimer {
            key: TimerKey::InterruptGrace {
                agent_id: agent.id.clone(),
            },
            after: self.interrupt_grace,
        });
        effects.push(Effect::Emit(SessionEvent::AgentUpdated(agent.id.clone())));
    }

    /// Interrupt grace period elapsed
    pub fn on_interrupt_grace(&mut self, id: &AgentId, effects: &mut Vec<Effect>) {
        let Ok(index) = self.index_of(id) else {
            return;
        };
        let agent = &mut self.agents[index];
        if agent.is_processing && agent.interrupt_pending {
            tracing::warn!(agent_id = %id, "Interrupt not confirmed, offering force stop");
            agent.force_stop_available = true;
            effects.push(Effect::Emit(SessionEvent::ForceStopAvailable(id.clone())));
            effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
        }
    }

    /// Stop waiting for the server. Local processing state is discarded and
    /// the next authoritative frame for the agent reconciles it.
    pub fn force_stop(&mut self, id: &AgentId, effects: &mut Vec<Effect>) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        let agent = &mut self.agents[index];

        agent.finalize_stream();
        agent.clear_processing();
        agent.status = AgentStatus::Idle;
        agent.awaiting_reconciliation = true;
        agent.push_system("Stopped");

        effects.push(Effect::CancelTimer(TimerKey::InterruptGrace {
            agent_id: id.clone(),
        }));
        effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
        Ok(())
    }

    /// Request a mode change. The local mode only follows `mode_changed`.
    pub fn set_mode(
        &mut self,
        id: &AgentId,
        mode: AgentMode,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        self.index_of(id)?;
        effects.push(Effect::Send(ClientFrame::SetMode {
            agent_id: Some(id.clone()),
            mode,
        }));
        Ok(())
    }

    pub fn respond_permission(
        &mut self,
        id: &AgentId,
        request_id: &str,
        approved: bool,
        pin: Option<String>,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        let index = self.index_of(id)?;
        self.permissions
            .respond(&mut self.agents[index], request_id, approved, pin, effects)?;
        effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
        Ok(())
    }

    /// Permission expiry timer fired
    pub fn on_permission_timer(&mut self, id: &AgentId, request_id: &str, effects: &mut Vec<Effect>) {
        let Ok(index) = self.index_of(id) else {
            return;
        };
        if self.permissions.expire(&mut self.agents[index], request_id) {
            effects.push(Effect::Emit(SessionEvent::PermissionExpired {
                agent_id: id.clone(),
                request_id: request_id.to_string(),
            }));
            effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
        }
    }

    /// Replace an agent's conversation with history loaded from the server
    pub fn apply_history(
        &mut self,
        id: &AgentId,
        history: Vec<MessageKind>,
        effects: &mut Vec<Effect>,
    ) {
        let Ok(index) = self.index_of(id) else {
            tracing::debug!(agent_id = %id, "History for unknown agent dropped");
            return;
        };
        let messages = history.into_iter().map(ChatMessage::restored).collect();
        self.agents[index].replace_messages(messages);
        effects.push(Effect::Emit(SessionEvent::AgentUpdated(id.clone())));
    }

    /// Drop every agent (connection-scoped teardown)
    pub fn clear(&mut self, effects: &mut Vec<Effect>) {
        for agent in self.agents.drain(..) {
            Self::cancel_timers(&agent, effects);
            effects.push(Effect::Emit(SessionEvent::AgentRemoved(agent.id)));
        }
        self.active = None;
    }

    /// Dispatch an agent-addressed frame. Frames without an `agent_id` go to
    /// the active agent; frames for unknown agents are dropped.
    pub fn route(&mut self, frame: ServerFrame, effects: &mut Vec<Effect>) {
        let target = match frame.agent_id().or(self.active.as_ref()) {
            Some(id) => id.clone(),
            None => {
                tracing::debug!(frame = frame.type_name(), "No agent to route frame to");
                return;
            }
        };
        let Ok(index) = self.index_of(&target) else {
            tracing::debug!(
                agent_id = %target,
                frame = frame.type_name(),
                "Frame for unknown agent dropped"
            );
            return;
        };
        tracing::debug!(agent_id = %target, frame = frame.type_name(), "Routing frame");

        if let ServerFrame::AgentDestroyed { .. } = frame {
            self.remove_at(index, effects);
            return;
        }

        let agent = &mut self.agents[index];
        if frame.finalizes_stream() {
            agent.finalize_stream();
        }

        match frame {
            ServerFrame::Status { text, cwd, .. } => {
                if let Some(cwd) = cwd {
                    agent.cwd = Some(cwd);
                    agent.registered = true;
                }
                if !text.is_empty() {
                    agent.status_text = Some(text);
                }
            }
            ServerFrame::AssistantText { text, .. } => {
                agent.awaiting_reconciliation = false;
                agent.is_processing = true;
                agent.status = AgentStatus::Working;
                agent.append_chunk(&text);
            }
            ServerFrame::ToolUse {
                tool, input, id, ..
            } => {
                agent.record_tool_use(&id, &tool, input);
            }
            ServerFrame::ToolResult {
                content,
                is_error,
                tool_use_id,
                ..
            } => {
                agent.record_tool_result(&tool_use_id, flatten_content(&content), is_error);
            }
            ServerFrame::PermissionRequest {
                request_id,
                tool,
                input,
                level,
                reason,
                ..
            } => {
                self.permissions
                    .on_request(agent, request_id, tool, input, level, reason, effects);
            }
            ServerFrame::Result {
                usage,
                cost,
                duration_ms,
                num_turns,
                session_id,
                ..
            } => {
                if let Some(session_id) = session_id {
                    agent.session_id = Some(SessionId::from_string(session_id));
                }
                agent.push_system(result_summary(
                    usage.as_ref(),
                    cost,
                    duration_ms,
                    num_turns,
                ));
                agent.clear_processing();
                agent.awaiting_reconciliation = false;
                agent.status = AgentStatus::Done;
                effects.push(Effect::CancelTimer(TimerKey::InterruptGrace {
                    agent_id: target.clone(),
                }));
            }
            ServerFrame::Error { text, .. } => {
                if agent.cwd.is_some() && !agent.registered {
                    tracing::warn!(agent_id = %target, error = %text, "Agent registration rejected");
                    agent.cwd = None;
                    effects.push(Effect::Emit(SessionEvent::Notice(text.clone())));
                }
                agent.push_system(format!("Error: {}", text));
                agent.clear_processing();
                agent.awaiting_reconciliation = false;
                agent.status = AgentStatus::Error;
                effects.push(Effect::CancelTimer(TimerKey::InterruptGrace {
                    agent_id: target.clone(),
                }));
            }
            ServerFrame::ModelInfo { model, .. } => {
                agent.model = Some(model);
            }
            ServerFrame::RateLimits { limits, .. } => {
                agent.rate_limits = Some(limits);
            }
            ServerFrame::ModeChanged {
                mode, display_info, ..
            } => {
                agent.mode = mode;
                agent.push_system(format!("Mode: {}", mode_label(mode, &display_info)));
            }
            ServerFrame::ComputerScreenshot {
                image,
                action,
                description,
                iteration,
                ..
            } => {
                agent.push_message(ChatMessage::new(MessageKind::ComputerScreenshot {
                    image,
                    action,
                    description,
                    iteration,
                }));
            }
            ServerFrame::ComputerAction {
                tool,
                action,
                input,
                description,
                iteration,
                ..
            } => {
                agent.push_message(ChatMessage::new(MessageKind::ComputerAction {
                    tool,
                    action,
                    input,
                    description,
                    iteration,
                }));
            }
            ServerFrame::AgentDestroyed { .. }
            | ServerFrame::ApiKeyLoaded { .. }
            | ServerFrame::Ping { .. }
            | ServerFrame::Unknown => return,
        }

        effects.push(Effect::Emit(SessionEvent::AgentUpdated(target)));
    }
}

/// One-line summary appended when a turn completes
pub fn result_summary(
    usage: Option<&Usage>,
    cost: Option<f64>,
    duration_ms: Option<u64>,
    num_turns: Option<u32>,
) -> String {
    let mut parts = vec!["Done".to_string()];
    if let Some(turns) = num_turns {
        parts.push(format!(
            "{} turn{}",
            turns,
            if turns == 1 { "" } else { "s" }
        ));
    }
    if let Some(ms) = duration_ms {
        parts.push(format!("{:.1}s", ms as f64 / 1000.0));
    }
    if let Some(Usage {
        input_tokens: Some(input),
        output_tokens: Some(output),
        ..
    }) = usage
    {
        parts.push(format!("{} in / {} out", input, output));
    }
    if let Some(cost) = cost {
        parts.push(format!("${:.4}", cost));
    }
    parts.join(" · ")
}

fn mode_label(mode: AgentMode, display_info: &Value) -> String {
    match display_info {
        Value::String(label) if !label.is_empty() => label.clone(),
        Value::Object(map) => map
            .get("label")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| mode.display_name().to_string()),
        _ => mode.display_name().to_string(),
    }
}
