use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::agent::{AgentId, AgentMode};
use crate::api::{ApiClient, HistorySource};
use crate::connection::{ConnectionManager, ConnectionStatus, Endpoint};
use crate::core::effect::Effect;
use crate::core::error::SessionError;
use crate::core::events::SessionEvent;
use crate::core::recovery::ProviderCredentials;
use crate::core::session_core::{SessionCore, SessionSettings};
use crate::protocol::{FrameCodec, ImageAttachment};

const EVENT_CAPACITY: usize = 256;

/// Explicitly owned handle to one chat session.
///
/// Cheap to clone. Operations mutate the shared [`SessionCore`] and hand
/// the resulting effects to the [`ConnectionManager`] task; events are
/// published to every subscriber.
#[derive(Clone)]
pub struct ChatSession {
    core: Arc<Mutex<SessionCore>>,
    effects_tx: mpsc::UnboundedSender<Effect>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    /// Create the session and spawn its connection driver on the current
    /// runtime. The driver stops once every handle is dropped.
    pub fn spawn(
        settings: SessionSettings,
        endpoint: Endpoint,
        history: Arc<dyn HistorySource>,
    ) -> (Self, JoinHandle<()>) {
        let codec = FrameCodec::new(settings.max_frame_bytes);
        let core = Arc::new(Mutex::new(SessionCore::new(settings)));
        let (effects_tx, effects_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let manager = ConnectionManager::new(
            core.clone(),
            events.clone(),
            effects_rx,
            endpoint,
            history,
            codec,
        );
        let driver = tokio::spawn(manager.run());

        (
            Self {
                core,
                effects_tx,
                events,
            },
            driver,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Read access to the current state. Do not hold across `.await`.
    pub fn state(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock()
    }

    fn apply<R>(&self, step: impl FnOnce(&mut SessionCore) -> R) -> Result<R, SessionError> {
        let mut core = self.core.lock();
        let result = step(&mut core);
        // Forwarded under the lock so effects reach the driver in order
        for effect in core.take_effects() {
            match effect {
                Effect::Emit(event) => {
                    let _ = self.events.send(event);
                }
                effect => self
                    .effects_tx
                    .send(effect)
                    .map_err(|_| SessionError::DriverStopped)?,
            }
        }
        Ok(result)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.core.lock().status()
    }

    pub fn active_agent_id(&self) -> Option<AgentId> {
        self.core.lock().active_agent_id().cloned()
    }

    fn require_active(&self) -> Result<AgentId, SessionError> {
        self.active_agent_id().ok_or(SessionError::NoActiveAgent)
    }

    /// Exchange a PIN for a session token, then connect
    pub async fn authenticate(&self, api: &ApiClient, pin: &str) -> Result<(), SessionError> {
        let token = api.authenticate(pin).await?;
        self.set_token(token)?;
        self.connect()
    }

    /// Install a token (ensuring at least one agent exists) without connecting
    pub fn set_token(&self, token: impl Into<String>) -> Result<(), SessionError> {
        let token = token.into();
        self.apply(|core| core.set_token(token))
    }

    pub fn connect(&self) -> Result<(), SessionError> {
        self.apply(|core| core.connect())?
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.apply(|core| core.disconnect())
    }

    pub fn logout(&self) -> Result<(), SessionError> {
        self.apply(|core| core.logout())
    }

    pub fn create_agent(&self) -> Result<AgentId, SessionError> {
        self.apply(|core| core.create_agent())
    }

    pub fn switch_to_agent(&self, id: &AgentId) -> Result<(), SessionError> {
        self.apply(|core| core.switch_to_agent(id))?
    }

    pub fn close_agent(&self, id: &AgentId) -> Result<(), SessionError> {
        self.apply(|core| core.close_agent(id))?
    }

    pub fn set_working_directory(
        &self,
        id: &AgentId,
        path: impl Into<String>,
    ) -> Result<(), SessionError> {
        let path = path.into();
        self.apply(|core| core.set_working_directory(id, path))?
    }

    pub fn send_message(
        &self,
        id: &AgentId,
        text: impl Into<String>,
        images: Vec<ImageAttachment>,
    ) -> Result<(), SessionError> {
        let text = text.into();
        self.apply(|core| core.send_message(id, text, images))?
    }

    /// Send to the foreground agent
    pub fn send_to_active(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let id = self.require_active()?;
        self.send_message(&id, text, Vec::new())
    }

    pub fn interrupt(&self, id: &AgentId) -> Result<(), SessionError> {
        self.apply(|core| core.interrupt(id))?
    }

    pub fn emergency_stop(&self, id: &AgentId) -> Result<(), SessionError> {
        self.apply(|core| core.emergency_stop(id))?
    }

    pub fn force_stop(&self, id: &AgentId) -> Result<(), SessionError> {
        self.apply(|core| core.force_stop(id))?
    }

    pub fn set_mode(&self, id: &AgentId, mode: AgentMode) -> Result<(), SessionError> {
        self.apply(|core| core.set_mode(id, mode))?
    }

    pub fn respond_permission(
        &self,
        id: &AgentId,
        request_id: &str,
        approved: bool,
        pin: Option<String>,
    ) -> Result<(), SessionError> {
        self.apply(|core| core.respond_permission(id, request_id, approved, pin))?
    }

    pub fn set_api_key(&self, credentials: ProviderCredentials) -> Result<(), SessionError> {
        self.apply(|core| core.set_api_key(credentials))
    }

    pub fn set_transcription_lang(&self, lang: impl Into<String>) -> Result<(), SessionError> {
        let lang = lang.into();
        self.apply(|core| core.set_transcription_lang(lang))
    }
}
