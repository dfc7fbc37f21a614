//! Property tests for streamed assistant text reassembly

use proptest::prelude::*;

use switchboard::agent::{AgentId, ChatMessage, MessageKind, StreamAccumulator};
use switchboard::AgentRegistry;

proptest! {
    #[test]
    fn prop_chunks_concatenate_in_order(chunks in prop::collection::vec(".{0,12}", 1..20)) {
        let mut messages: Vec<ChatMessage> = Vec::new();
        let mut stream = StreamAccumulator::default();
        for chunk in &chunks {
            stream.on_chunk(&mut messages, chunk);
        }
        stream.finalize(&mut messages);

        prop_assert_eq!(messages.len(), 1);
        prop_assert_eq!(
            &messages[0].kind,
            &MessageKind::Assistant { text: chunks.concat(), is_streaming: false }
        );
        prop_assert!(!stream.is_streaming());
    }

    #[test]
    fn prop_routed_chunks_form_one_message(chunks in prop::collection::vec("[a-z ]{1,8}", 1..10)) {
        let mut registry = AgentRegistry::default();
        let mut effects = Vec::new();
        let id: AgentId = registry.create_agent(&mut effects);

        for chunk in &chunks {
            let frame = serde_json::from_value(serde_json::json!({
                "type": "assistant_text",
                "text": chunk,
                "agent_id": id.as_str(),
            }))
            .unwrap();
            registry.route(frame, &mut effects);
        }

        let agent = registry.agent(&id).unwrap();
        prop_assert_eq!(agent.messages.len(), 1);
        let expected = chunks.concat();
        prop_assert_eq!(agent.last_assistant_text(), Some(expected.as_str()));
        prop_assert!(agent.stream.is_streaming());
    }
}
