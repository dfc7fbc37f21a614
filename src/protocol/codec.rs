use crate::agent::session::AgentId;
use crate::protocol::frames::{ClientFrame, ServerFrame};

/// Largest outbound frame the server accepts (16 KiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// Stateless JSON envelope codec
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Serialize a client frame, enforcing the frame size limit
    pub fn encode(&self, frame: &ClientFrame) -> Result<String, CodecError> {
        let text = serde_json::to_string(frame)?;
        if text.len() > self.max_frame_bytes {
            return Err(CodecError::FrameTooLarge {
                size: text.len(),
                max: self.max_frame_bytes,
            });
        }
        Ok(text)
    }

    pub fn decode(&self, text: &str) -> Result<ServerFrame, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Inject `active` as the agent tag when an agent-addressed frame lacks one
    pub fn tag(&self, frame: &mut ClientFrame, active: Option<&AgentId>) {
        if let (Some(slot), Some(active)) = (frame.agent_slot(), active) {
            if slot.is_none() {
                *slot = Some(active.clone());
            }
        }
    }
}
