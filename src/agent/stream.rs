//! Reassembly of streamed assistant text into one growing message.

use crate::agent::message::{ChatMessage, MessageKind};

/// Per-agent accumulator for `assistant_text` chunks.
///
/// Chunks are concatenation fragments: each one is appended to the live
/// assistant message in arrival order, with no reordering or deduplication.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    /// Index of the live assistant message in the agent's conversation
    active: Option<usize>,
    buffer: String,
}

impl StreamAccumulator {
    /// Whether a stream is currently open
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Text accumulated by the open stream so far
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append a chunk. Returns true when the chunk opened a new message.
    pub fn on_chunk(&mut self, messages: &mut Vec<ChatMessage>, text: &str) -> bool {
        self.buffer.push_str(text);

        if let Some(index) = self.active {
            if let Some(MessageKind::Assistant { text: current, .. }) =
                messages.get_mut(index).map(|m| &mut m.kind)
            {
                current.push_str(text);
                return false;
            }
            // The live message vanished from under us; start a fresh one
            tracing::warn!(index, "Streaming message missing, reopening stream");
            self.buffer = text.to_string();
        }

        messages.push(ChatMessage::new(MessageKind::Assistant {
            text: self.buffer.clone(),
            is_streaming: true,
        }));
        self.active = Some(messages.len() - 1);
        true
    }

    /// Freeze the live message, if any. Returns its index.
    pub fn finalize(&mut self, messages: &mut [ChatMessage]) -> Option<usize> {
        let index = self.active.take()?;
        self.buffer.clear();

        if let Some(MessageKind::Assistant { is_streaming, .. }) =
            messages.get_mut(index).map(|m| &mut m.kind)
        {
            *is_streaming = false;
        }
        Some(index)
    }

    /// Move the live message out of a conversation that was just replaced
    /// and append it to the replacement, keeping the stream open.
    pub fn carry_over(&mut self, previous: Vec<ChatMessage>, messages: &mut Vec<ChatMessage>) {
        let Some(index) = self.active.take() else {
            return;
        };
        match previous.into_iter().nth(index) {
            Some(live) if matches!(live.kind, MessageKind::Assistant { .. }) => {
                messages.push(live);
                self.active = Some(messages.len() - 1);
            }
            _ => self.buffer.clear(),
        }
    }
}
