use async_trait::async_trait;
use parking_lot::Mutex;

use switchboard::agent::{AgentId, MessageKind};
use switchboard::api::{ApiError, HistorySource};

/// History source that records every fetch and answers with a fixed
/// conversation
#[derive(Default)]
pub struct RecordingHistory {
    calls: Mutex<Vec<(String, AgentId)>>,
    messages: Vec<MessageKind>,
}

impl RecordingHistory {
    pub fn with_messages(messages: Vec<MessageKind>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            messages,
        }
    }

    pub fn calls(&self) -> Vec<(String, AgentId)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl HistorySource for RecordingHistory {
    async fn fetch(&self, cwd: &str, agent_id: &AgentId) -> Result<Vec<MessageKind>, ApiError> {
        self.calls.lock().push((cwd.to_string(), agent_id.clone()));
        Ok(self.messages.clone())
    }
}
