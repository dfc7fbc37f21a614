//! State replay after every successful (re)connect.
//!
//! The server forgets per-connection state when a socket closes. On open we
//! re-send the bring-your-own-key credentials and every agent's working
//! directory (with its resumable session id), then reload each agent's
//! history over REST. Sends are fire-and-forget; nothing here blocks frame
//! delivery.

use serde::{Deserialize, Serialize};

use crate::agent::AgentRegistry;
use crate::core::effect::Effect;
use crate::protocol::ClientFrame;

/// Provider credentials supplied by the user instead of the server's own key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub provider: String,
    pub model: String,
    pub key: String,
}

impl ProviderCredentials {
    fn frame(&self) -> ClientFrame {
        ClientFrame::SetApiKey {
            key: self.key.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecoveryCoordinator {
    credentials: Option<ProviderCredentials>,
    transcription_lang: Option<String>,
}

impl RecoveryCoordinator {
    pub fn new(credentials: Option<ProviderCredentials>) -> Self {
        Self {
            credentials,
            transcription_lang: None,
        }
    }

    pub fn credentials(&self) -> Option<&ProviderCredentials> {
        self.credentials.as_ref()
    }

    /// Remember credentials for future reconnects and apply them now
    pub fn set_credentials(&mut self, credentials: ProviderCredentials, effects: &mut Vec<Effect>) {
        effects.push(Effect::Send(credentials.frame()));
        self.credentials = Some(credentials);
    }

    pub fn set_transcription_lang(&mut self, lang: String, effects: &mut Vec<Effect>) {
        effects.push(Effect::Send(ClientFrame::SetTranscriptionLang { lang: lang.clone() }));
        self.transcription_lang = Some(lang);
    }

    /// Replay client state onto a freshly opened connection
    ///
    /// Each restored agent counts as unregistered until the server confirms
    /// its directory again.
    pub fn on_open(&self, registry: &mut AgentRegistry, effects: &mut Vec<Effect>) {
        if let Some(credentials) = &self.credentials {
            tracing::debug!(provider = %credentials.provider, "Restoring provider key");
            effects.push(Effect::Send(credentials.frame()));
        }
        if let Some(lang) = &self.transcription_lang {
            effects.push(Effect::Send(ClientFrame::SetTranscriptionLang { lang: lang.clone() }));
        }

        let mut restored = 0;
        for agent in registry.resumable_mut() {
            let Some(cwd) = agent.cwd.clone() else {
                continue;
            };
            agent.registered = false;
            effects.push(Effect::Send(ClientFrame::SetCwd {
                path: cwd.clone(),
                agent_id: Some(agent.id.clone()),
                session_id: agent.session_id.as_ref().map(|s| s.as_str().to_string()),
            }));
            effects.push(Effect::FetchHistory {
                agent_id: agent.id.clone(),
                cwd,
            });
            restored += 1;
        }
        tracing::info!(agents = restored, "Recovery replayed");
    }
}
