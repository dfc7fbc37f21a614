use std::time::Duration;

use crate::agent::permission::{PermissionCoordinator, DEFAULT_PERMISSION_TIMEOUT};
use crate::agent::registry::DEFAULT_INTERRUPT_GRACE;
use crate::agent::{Agent, AgentId, AgentMode, AgentRegistry, MessageKind};
use crate::api::ApiError;
use crate::connection::{ConnectionState, ConnectionStatus, ReconnectPolicy};
use crate::core::effect::{Effect, TimerKey};
use crate::core::error::SessionError;
use crate::core::events::SessionEvent;
use crate::core::recovery::{ProviderCredentials, RecoveryCoordinator};
use crate::protocol::{FrameCodec, ImageAttachment, ServerFrame, DEFAULT_MAX_FRAME_BYTES};

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub reconnect: ReconnectPolicy,
    pub permission_timeout: Duration,
    pub interrupt_grace: Duration,
    pub max_frame_bytes: usize,
    pub credentials: Option<ProviderCredentials>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            interrupt_grace: DEFAULT_INTERRUPT_GRACE,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            credentials: None,
        }
    }
}

/// Synchronous reducer for the whole client session.
///
/// Every input (user action, socket event, timer, history result) mutates
/// state and queues [`Effect`]s; the owner drains them with
/// [`SessionCore::take_effects`] and performs the I/O.
pub struct SessionCore {
    connection: ConnectionState,
    registry: AgentRegistry,
    recovery: RecoveryCoordinator,
    codec: FrameCodec,
    api_provider: Option<String>,
    effects: Vec<Effect>,
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

impl SessionCore {
    pub fn new(settings: SessionSettings) -> Self {
        let codec = FrameCodec::new(settings.max_frame_bytes);
        Self {
            connection: ConnectionState::new(settings.reconnect),
            registry: AgentRegistry::new(
                PermissionCoordinator::new(settings.permission_timeout),
                settings.interrupt_grace,
                codec,
            ),
            recovery: RecoveryCoordinator::new(settings.credentials),
            codec,
            api_provider: None,
            effects: Vec::new(),
        }
    }

    // ---- observation ----

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn agents(&self) -> &[Agent] {
        self.registry.agents()
    }

    pub fn agent(&self, id: &AgentId) -> Option<&Agent> {
        self.registry.agent(id)
    }

    pub fn active_agent(&self) -> Option<&Agent> {
        self.registry.active_agent()
    }

    pub fn active_agent_id(&self) -> Option<&AgentId> {
        self.registry.active_id()
    }

    /// Provider announced by the last `api_key_loaded`
    pub fn api_provider(&self) -> Option<&str> {
        self.api_provider.as_deref()
    }

    /// Drain queued effects.
    ///
    /// Outbound frames are tagged with the active agent when untagged and
    /// dropped when no connection is open: sending is best-effort, there is
    /// no queue.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        let connected = self.connection.is_connected();
        let active = self.registry.active_id().cloned();
        std::mem::take(&mut self.effects)
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Send(mut frame) => {
                    if !connected {
                        tracing::debug!(frame = frame.type_name(), "Not connected, frame dropped");
                        return None;
                    }
                    self.codec.tag(&mut frame, active.as_ref());
                    Some(Effect::Send(frame))
                }
                other => Some(other),
            })
            .collect()
    }

    // ---- authentication & connection ----

    /// Install a session token. At least one agent exists afterwards.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.connection.set_token(token);
        if self.registry.is_empty() {
            self.registry.create_agent(&mut self.effects);
        }
    }

    pub fn connect(&mut self) -> Result<(), SessionError> {
        if self.connection.connect(&mut self.effects) {
            Ok(())
        } else {
            Err(SessionError::NotAuthenticated)
        }
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect(&mut self.effects);
    }

    /// Forget the token and every agent, and close the socket
    pub fn logout(&mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.connection.require_authentication(&mut self.effects);
        self.registry.clear(&mut self.effects);
        self.api_provider = None;
    }

    // ---- driver inputs ----

    pub fn on_socket_open(&mut self) {
        self.connection.on_open(&mut self.effects);
        self.recovery.on_open(&mut self.registry, &mut self.effects);
    }

    /// `code` is None when the attempt failed before opening or the stream
    /// ended without a close frame
    pub fn on_socket_close(&mut self, code: Option<u16>) {
        use crate::connection::CloseDisposition;

        self.registry.drop_closing(&mut self.effects);
        if self.connection.on_close(code, &mut self.effects) == CloseDisposition::Reauthenticate {
            self.teardown();
        }
    }

    /// Decode and dispatch one inbound text frame. Malformed frames are
    /// logged and skipped.
    pub fn on_text(&mut self, text: &str) {
        match self.codec.decode(text) {
            Ok(frame) => self.on_frame(frame),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
        }
    }

    pub fn on_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Ping { .. } => self.connection.on_ping(&mut self.effects),
            ServerFrame::ApiKeyLoaded { provider } => {
                tracing::info!(%provider, "Provider key loaded");
                self.api_provider = Some(provider.clone());
                self.effects
                    .push(Effect::Emit(SessionEvent::ApiKeyLoaded { provider }));
            }
            ServerFrame::Unknown => tracing::debug!("Ignoring unknown frame type"),
            frame => self.registry.route(frame, &mut self.effects),
        }
    }

    pub fn on_timer(&mut self, key: TimerKey) {
        match key {
            TimerKey::Reconnect => self.connection.on_reconnect_timer(&mut self.effects),
            TimerKey::PermissionExpiry {
                agent_id,
                request_id,
            } => self
                .registry
                .on_permission_timer(&agent_id, &request_id, &mut self.effects),
            TimerKey::InterruptGrace { agent_id } => {
                self.registry.on_interrupt_grace(&agent_id, &mut self.effects)
            }
        }
    }

    pub fn on_history_loaded(&mut self, agent_id: &AgentId, result: Result<Vec<MessageKind>, ApiError>) {
        match result {
            Ok(history) => {
                tracing::debug!(%agent_id, messages = history.len(), "History loaded");
                self.registry
                    .apply_history(agent_id, history, &mut self.effects);
            }
            Err(e) => tracing::warn!(%agent_id, error = %e, "History reload failed"),
        }
    }

    // ---- user actions ----

    pub fn create_agent(&mut self) -> AgentId {
        self.registry.create_agent(&mut self.effects)
    }

    pub fn switch_to_agent(&mut self, id: &AgentId) -> Result<(), SessionError> {
        self.registry.switch_to_agent(id, &mut self.effects)
    }

    pub fn close_agent(&mut self, id: &AgentId) -> Result<(), SessionError> {
        let connected = self.connection.is_connected();
        self.registry.close_agent(id, connected, &mut self.effects)
    }

    pub fn set_working_directory(
        &mut self,
        id: &AgentId,
        path: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.registry
            .set_working_directory(id, path, &mut self.effects)
    }

    pub fn send_message(
        &mut self,
        id: &AgentId,
        text: impl Into<String>,
        images: Vec<ImageAttachment>,
    ) -> Result<(), SessionError> {
        let connected = self.connection.is_connected();
        self.registry
            .send_message(id, text, images, connected, &mut self.effects)
    }

    pub fn interrupt(&mut self, id: &AgentId) -> Result<(), SessionError> {
        self.registry.interrupt(id, &mut self.effects)
    }

    pub fn emergency_stop(&mut self, id: &AgentId) -> Result<(), SessionError> {
        self.registry.emergency_stop(id, &mut self.effects)
    }

    pub fn force_stop(&mut self, id: &AgentId) -> Result<(), SessionError> {
        self.registry.force_stop(id, &mut self.effects)
    }

    pub fn set_mode(&mut self, id: &AgentId, mode: AgentMode) -> Result<(), SessionError> {
        self.registry.set_mode(id, mode, &mut self.effects)
    }

    pub fn respond_permission(
        &mut self,
        id: &AgentId,
        request_id: &str,
        approved: bool,
        pin: Option<String>,
    ) -> Result<(), SessionError> {
        self.registry
            .respond_permission(id, request_id, approved, pin, &mut self.effects)
    }

    /// Switch to bring-your-own-key mode; replayed on every reconnect
    pub fn set_api_key(&mut self, credentials: ProviderCredentials) {
        self.recovery.set_credentials(credentials, &mut self.effects);
    }

    pub fn set_transcription_lang(&mut self, lang: impl Into<String>) {
        self.recovery
            .set_transcription_lang(lang.into(), &mut self.effects);
    }
}
