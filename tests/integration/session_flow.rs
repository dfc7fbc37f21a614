//! Integration tests for a session talking to a scripted backend
//!
//! Tests the flow: ChatSession -> ConnectionManager -> WebSocket -> frames
//! routed back into agent state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use switchboard::agent::{AgentId, AgentStatus, MessageKind, PermissionStatus};
use switchboard::{ChatSession, ConnectionStatus, SessionError, SessionEvent, SessionSettings};

use super::common::{
    eventually, events_within, fast_settings, wait_for_event, RecordingHistory, ScriptedServer,
    ServerConn,
};

/// Connect a session with one agent bound to `cwd`, confirmed by the server
async fn connected_session(
    server: &mut ScriptedServer,
    settings: SessionSettings,
    cwd: &str,
) -> (ChatSession, ServerConn, AgentId) {
    let (session, _driver) = ChatSession::spawn(
        settings,
        server.endpoint(),
        Arc::new(RecordingHistory::default()),
    );
    session.set_token("tok").unwrap();
    session.connect().unwrap();

    let mut conn = server.accept().await;
    eventually(&session, |core| core.status() == ConnectionStatus::Connected).await;

    let id = session.active_agent_id().expect("an agent exists after login");
    session.set_working_directory(&id, cwd).unwrap();
    let set_cwd = conn.recv_type("set_cwd").await;
    assert_eq!(set_cwd["path"], cwd);
    assert_eq!(set_cwd["agent_id"], id.as_str());

    conn.send(json!({"type": "status", "text": "Ready", "cwd": cwd, "agent_id": id.as_str()}));
    eventually(&session, |core| {
        core.agent(&id).map(|a| a.registered).unwrap_or(false)
    })
    .await;

    (session, conn, id)
}

#[tokio::test]
async fn test_token_is_sent_in_the_upgrade_url() {
    let mut server = ScriptedServer::start().await;
    let (session, _driver) = ChatSession::spawn(
        fast_settings(),
        server.endpoint(),
        Arc::new(RecordingHistory::default()),
    );
    session.set_token("secret-token").unwrap();
    session.connect().unwrap();

    let conn = server.accept().await;
    assert!(conn.uri.starts_with("/ws?"), "uri: {}", conn.uri);
    assert!(conn.uri.contains("token=secret-token"), "uri: {}", conn.uri);
}

#[tokio::test]
async fn test_connect_without_token_is_rejected() {
    let server = ScriptedServer::start().await;
    let (session, _driver) = ChatSession::spawn(
        fast_settings(),
        server.endpoint(),
        Arc::new(RecordingHistory::default()),
    );

    assert!(matches!(session.connect(), Err(SessionError::NotAuthenticated)));
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_streamed_turn_with_tool_call_completes() {
    let mut server = ScriptedServer::start().await;
    let (session, mut conn, id) = connected_session(&mut server, fast_settings(), "/work").await;

    session.send_to_active("say hello").unwrap();
    let sent = conn.recv_type("send_message").await;
    assert_eq!(sent["text"], "say hello");
    assert_eq!(sent["agent_id"], id.as_str());

    let agent = id.as_str();
    conn.send(json!({"type": "assistant_text", "text": "Hello ", "agent_id": agent}));
    conn.send(json!({"type": "assistant_text", "text": "world", "agent_id": agent}));
    conn.send(json!({"type": "tool_use", "tool": "Bash", "input": {"command": "ls"}, "id": "t1", "agent_id": agent}));
    conn.send(json!({"type": "tool_result", "content": "a.txt", "tool_use_id": "t1", "agent_id": agent}));
    conn.send(json!({
        "type": "result",
        "usage": {"input_tokens": 100, "output_tokens": 20},
        "cost": 0.01,
        "duration_ms": 1500,
        "num_turns": 1,
        "session_id": "sess-1",
        "agent_id": agent
    }));

    eventually(&session, |core| {
        core.agent(&id).map(|a| a.status == AgentStatus::Done).unwrap_or(false)
    })
    .await;

    let state = session.state();
    let agent = state.agent(&id).unwrap();
    let kinds: Vec<&MessageKind> = agent.messages.iter().map(|m| &m.kind).collect();
    assert_eq!(kinds.len(), 5);
    assert!(matches!(kinds[0], MessageKind::User { text, .. } if text == "say hello"));
    assert!(matches!(
        kinds[1],
        MessageKind::Assistant { text, is_streaming: false } if text == "Hello world"
    ));
    assert!(matches!(kinds[2], MessageKind::ToolUse { tool, .. } if tool == "Bash"));
    assert!(matches!(
        kinds[3],
        MessageKind::ToolResult { content, is_error: false, .. } if content == "a.txt"
    ));
    assert!(matches!(
        kinds[4],
        MessageKind::System { text } if text == "Done · 1 turn · 1.5s · 100 in / 20 out · $0.0100"
    ));
    assert!(!agent.is_processing);
    assert_eq!(agent.session_id.as_ref().map(|s| s.as_str()), Some("sess-1"));
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let mut server = ScriptedServer::start().await;
    let (_session, mut conn, _id) = connected_session(&mut server, fast_settings(), "/work").await;

    conn.send(json!({"type": "ping", "ts": 1}));
    let pong = conn.recv_type("pong").await;
    assert_eq!(pong, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_untagged_frames_go_to_the_foreground_agent() {
    let mut server = ScriptedServer::start().await;
    let (session, mut conn, first) = connected_session(&mut server, fast_settings(), "/a").await;

    let second = session.create_agent().unwrap();
    session.set_working_directory(&second, "/b").unwrap();
    conn.recv_type("set_cwd").await;

    conn.send(json!({"type": "assistant_text", "text": "for whoever is in front"}));
    eventually(&session, |core| {
        core.agent(&second).map(|a| !a.messages.is_empty()).unwrap_or(false)
    })
    .await;

    let state = session.state();
    assert!(state.agent(&first).unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_background_agent_accumulates_unread() {
    let mut server = ScriptedServer::start().await;
    let (session, conn, first) = connected_session(&mut server, fast_settings(), "/a").await;
    let second = session.create_agent().unwrap();

    conn.send(json!({"type": "assistant_text", "text": "one", "agent_id": first.as_str()}));
    conn.send(json!({"type": "assistant_text", "text": " two", "agent_id": first.as_str()}));
    conn.send(json!({"type": "result", "agent_id": first.as_str()}));
    eventually(&session, |core| {
        core.agent(&first).map(|a| a.status == AgentStatus::Done).unwrap_or(false)
    })
    .await;

    assert_eq!(session.state().agent(&first).unwrap().unread_count, 2);

    session.switch_to_agent(&first).unwrap();
    let state = session.state();
    assert_eq!(state.agent(&first).unwrap().unread_count, 0);
    assert_eq!(state.agent(&second).unwrap().unread_count, 0);
}

#[tokio::test]
async fn test_rejected_registration_clears_directory() {
    let mut server = ScriptedServer::start().await;
    let (session, mut conn, _first) = connected_session(&mut server, fast_settings(), "/a").await;
    let mut events = session.subscribe();

    let extra = session.create_agent().unwrap();
    session.set_working_directory(&extra, "/f").unwrap();
    conn.recv_type("set_cwd").await;
    conn.send(json!({"type": "error", "text": "Maximum 5 agents", "agent_id": extra.as_str()}));

    let notice = wait_for_event(&mut events, |e| matches!(e, SessionEvent::Notice(_))).await;
    assert_eq!(notice, SessionEvent::Notice("Maximum 5 agents".into()));

    let state = session.state();
    let agent = state.agent(&extra).unwrap();
    assert_eq!(agent.cwd, None);
    assert!(!agent.registered);
    assert_eq!(agent.status, AgentStatus::Error);
}

#[tokio::test]
async fn test_permission_request_expires_exactly_once() {
    let mut server = ScriptedServer::start().await;
    let settings = SessionSettings {
        permission_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let (session, conn, id) = connected_session(&mut server, settings, "/work").await;
    let mut events = session.subscribe();

    conn.send(json!({
        "type": "permission_request",
        "request_id": "r1",
        "agent_id": id.as_str(),
        "tool": "Write",
        "input": {"path": "/etc/hosts"},
        "level": "yellow"
    }));

    let expired =
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::PermissionExpired { .. })).await;
    assert_eq!(
        expired,
        SessionEvent::PermissionExpired {
            agent_id: id.clone(),
            request_id: "r1".into()
        }
    );

    let later = events_within(&mut events, Duration::from_millis(300)).await;
    assert!(!later
        .iter()
        .any(|e| matches!(e, SessionEvent::PermissionExpired { .. })));

    {
        let state = session.state();
        let agent = state.agent(&id).unwrap();
        assert!(agent.pending_permissions.is_empty());
        assert!(agent.messages.iter().any(|m| matches!(
            &m.kind,
            MessageKind::PermissionRequest { status: PermissionStatus::Expired, .. }
        )));
    }

    assert!(matches!(
        session.respond_permission(&id, "r1", true, None),
        Err(SessionError::Permission(_))
    ));
}

#[tokio::test]
async fn test_approved_permission_is_sent_with_pin() {
    let mut server = ScriptedServer::start().await;
    let (session, mut conn, id) = connected_session(&mut server, fast_settings(), "/work").await;

    conn.send(json!({
        "type": "permission_request",
        "request_id": "r2",
        "agent_id": id.as_str(),
        "tool": "Bash",
        "input": {"command": "rm -rf build"},
        "level": "red",
        "reason": "destructive"
    }));
    eventually(&session, |core| {
        core.agent(&id)
            .map(|a| a.pending_permissions.contains_key("r2"))
            .unwrap_or(false)
    })
    .await;

    assert!(session.respond_permission(&id, "r2", true, None).is_err());
    session
        .respond_permission(&id, "r2", true, Some("1234".into()))
        .unwrap();

    let response = conn.recv_type("permission_response").await;
    assert_eq!(response["request_id"], "r2");
    assert_eq!(response["approved"], true);
    assert_eq!(response["pin"], "1234");
    assert_eq!(response["agent_id"], id.as_str());
}

#[tokio::test]
async fn test_unanswered_interrupt_offers_force_stop() {
    let mut server = ScriptedServer::start().await;
    let settings = SessionSettings {
        interrupt_grace: Duration::from_millis(100),
        ..fast_settings()
    };
    let (session, mut conn, id) = connected_session(&mut server, settings, "/work").await;
    let mut events = session.subscribe();

    session.send_to_active("long task").unwrap();
    conn.recv_type("send_message").await;
    session.interrupt(&id).unwrap();
    conn.recv_type("interrupt").await;

    wait_for_event(&mut events, |e| matches!(e, SessionEvent::ForceStopAvailable(_))).await;
    session.force_stop(&id).unwrap();

    {
        let state = session.state();
        let agent = state.agent(&id).unwrap();
        assert!(!agent.is_processing);
        assert!(agent.awaiting_reconciliation);
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    // A late frame from the server reconciles the agent
    conn.send(json!({"type": "assistant_text", "text": "still here", "agent_id": id.as_str()}));
    eventually(&session, |core| {
        core.agent(&id)
            .map(|a| !a.awaiting_reconciliation && a.is_processing)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_closing_registered_agent_waits_for_server() {
    let mut server = ScriptedServer::start().await;
    let (session, mut conn, first) = connected_session(&mut server, fast_settings(), "/a").await;
    let second = session.create_agent().unwrap();

    assert!(matches!(
        session.close_agent(&second).and_then(|_| session.close_agent(&first)),
        Err(SessionError::LastAgent)
    ));

    // The unregistered agent went away immediately; recreate one to close the first
    let third = session.create_agent().unwrap();
    session.close_agent(&first).unwrap();
    let destroy = conn.recv_type("destroy_agent").await;
    assert_eq!(destroy["agent_id"], first.as_str());
    assert!(session.state().agent(&first).unwrap().closing);
    assert_eq!(session.active_agent_id(), Some(third.clone()));

    conn.send(json!({"type": "agent_destroyed", "agent_id": first.as_str()}));
    eventually(&session, |core| core.agent(&first).is_none()).await;
}

#[tokio::test]
async fn test_api_key_is_restored_on_connect() {
    let mut server = ScriptedServer::start().await;
    let settings = SessionSettings {
        credentials: Some(switchboard::core::ProviderCredentials {
            provider: "openai".into(),
            model: "m".into(),
            key: "sk-test".into(),
        }),
        ..fast_settings()
    };
    let (session, _driver) = ChatSession::spawn(
        settings,
        server.endpoint(),
        Arc::new(RecordingHistory::default()),
    );
    let mut events = session.subscribe();
    session.set_token("tok").unwrap();
    session.connect().unwrap();

    let mut conn = server.accept().await;
    let first = conn.recv().await;
    assert_eq!(
        first,
        json!({"type": "set_api_key", "key": "sk-test", "provider": "openai", "model": "m"})
    );

    conn.send(json!({"type": "api_key_loaded", "provider": "openai"}));
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::ApiKeyLoaded { .. })).await;
    assert_eq!(session.state().api_provider(), Some("openai"));
}
