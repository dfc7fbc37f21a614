//! Integration tests for the REST client against a mock backend

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use switchboard::agent::{AgentId, MessageKind};
use switchboard::api::{ApiClient, ApiError, HistorySource, SavedConversation};

fn conversation(id: &str) -> serde_json::Value {
    json!({"id": id, "title": format!("conversation {id}"), "messages": []})
}

async fn authenticated_client(server: &MockServer) -> ApiClient {
    let client = ApiClient::new(server.uri()).unwrap();
    client.set_token("tok");
    client
}

#[tokio::test]
async fn test_authenticate_stores_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .and(body_json(json!({"pin": "1234"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "session-abc"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let token = client.authenticate("1234").await.unwrap();

    assert_eq!(token, "session-abc");
    assert_eq!(client.token().as_deref(), Some("session-abc"));
}

#[tokio::test]
async fn test_wrong_pin_reports_remaining_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": "Invalid PIN", "remainingAttempts": 2})),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let err = client.authenticate("0000").await.unwrap_err();

    assert!(matches!(
        err,
        ApiError::InvalidPin {
            remaining_attempts: Some(2)
        }
    ));
    assert_eq!(err.to_string(), "Invalid PIN (2 attempts remaining)");
    assert!(client.token().is_none());
}

#[tokio::test]
async fn test_lockout_uses_retry_after_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "900"))
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri()).unwrap();
    let err = client.authenticate("0000").await.unwrap_err();

    assert!(matches!(
        err,
        ApiError::LockedOut {
            retry_after_secs: Some(900)
        }
    ));
}

#[tokio::test]
async fn test_history_fetch_sends_bearer_token_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/messages"))
        .and(query_param("cwd", "/repo"))
        .and(query_param("agent_id", "agent-1"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                {"type": "user", "text": "hi"},
                {"type": "assistant", "text": "hello"},
                {"type": "sub_agent", "sub_agent_id": "s1", "task": "scan", "status": "done"},
                {"type": "mystery"}
            ]
        })))
        .mount(&server)
        .await;

    let client = authenticated_client(&server).await;
    let messages = client
        .fetch("/repo", &AgentId::from_string("agent-1"))
        .await
        .unwrap();

    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[1],
        MessageKind::Assistant {
            text: "hello".into(),
            is_streaming: false
        }
    );
    assert!(matches!(&messages[2], MessageKind::SubAgent { task, .. } if task == "scan"));
}

#[tokio::test]
async fn test_requests_without_token_fail_locally() {
    let server = MockServer::start().await;
    let client = ApiClient::new(server.uri()).unwrap();

    let err = client.metrics().await.unwrap_err();
    assert!(matches!(err, ApiError::NotAuthenticated));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_expired_token_maps_to_not_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/browse"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = authenticated_client(&server).await;
    assert!(matches!(
        client.browse("/").await.unwrap_err(),
        ApiError::NotAuthenticated
    ));
}

#[tokio::test]
async fn test_browse_lists_directories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/browse"))
        .and(query_param("path", "/home"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "/home",
            "parent": "/",
            "entries": [{"name": "dev", "path": "/home/dev", "isDirectory": true}]
        })))
        .mount(&server)
        .await;

    let client = authenticated_client(&server).await;
    let listing = client.browse("/home").await.unwrap();

    assert_eq!(listing.parent.as_deref(), Some("/"));
    assert_eq!(listing.entries.len(), 1);
    assert!(listing.entries[0].is_dir);
}

#[tokio::test]
async fn test_saving_sixth_conversation_is_refused_locally() {
    let server = MockServer::start().await;
    let existing: Vec<_> = (1..=5).map(|i| conversation(&format!("c{i}"))).collect();
    Mock::given(method("GET"))
        .and(path("/api/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"conversations": existing})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/history"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = authenticated_client(&server).await;
    let new: SavedConversation = serde_json::from_value(conversation("c6")).unwrap();
    let err = client.save_conversation(&new).await.unwrap_err();
    assert!(matches!(err, ApiError::LimitExceeded(_)));
    assert!(err.is_dismissable());

    // Re-saving an existing conversation replaces it
    let resave: SavedConversation = serde_json::from_value(conversation("c3")).unwrap();
    client.save_conversation(&resave).await.unwrap();
}

#[tokio::test]
async fn test_server_quota_is_a_dismissable_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/history"))
        .respond_with(
            ResponseTemplate::new(413).set_body_json(json!({"error": "Conversation too large"})),
        )
        .mount(&server)
        .await;

    let client = authenticated_client(&server).await;
    let snapshot: SavedConversation = serde_json::from_value(conversation("big")).unwrap();
    let err = client.save_conversation(&snapshot).await.unwrap_err();

    match err {
        ApiError::LimitExceeded(message) => assert_eq!(message, "Conversation too large"),
        other => panic!("expected LimitExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_conversation_hits_its_path() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/history/c2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = authenticated_client(&server).await;
    client.delete_conversation("c2").await.unwrap();
}

#[test]
fn test_invalid_base_url_is_rejected() {
    assert!(matches!(
        ApiClient::new("not a url"),
        Err(ApiError::InvalidUrl(_))
    ));
}
