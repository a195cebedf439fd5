//! Console command parsing and panel rendering used by `run()`.

use crate::backend::{BackendError, OllamaClient, Translation};
use crate::orchestrator::{QueryError, QueryState};
use crate::{describe_answer, describe_translation, stream_chat, Command};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_plain_lines_are_input() {
    assert_eq!(Command::parse("what time is it\r\n"), Command::Input("what time is it".to_string()));
    assert_eq!(Command::parse(""), Command::Input(String::new()));
}

#[test]
fn test_settings_commands() {
    assert_eq!(Command::parse(":model qwen3:4b"), Command::Model("qwen3:4b".to_string()));
    assert_eq!(Command::parse(":think on"), Command::Think(true));
    assert_eq!(Command::parse(":think off"), Command::Think(false));
    assert_eq!(Command::parse(":lang  ja "), Command::Language("ja".to_string()));
    assert_eq!(
        Command::parse(":search-url https://search.example/api"),
        Command::SearchUrl("https://search.example/api".to_string())
    );
    assert_eq!(Command::parse(":search-key sk-1"), Command::SearchKey("sk-1".to_string()));
}

#[test]
fn test_surface_commands() {
    assert_eq!(Command::parse(":models"), Command::Models);
    assert_eq!(
        Command::parse(":chat tell me a joke"),
        Command::Chat("tell me a joke".to_string())
    );
    assert_eq!(Command::parse(":measure 40"), Command::Measure(40.0));
    assert_eq!(Command::parse(":copy"), Command::Copy);
    assert_eq!(Command::parse(":toggle"), Command::Toggle);
    assert_eq!(Command::parse(":q"), Command::Quit);
}

#[test]
fn test_bad_commands_are_reported() {
    assert_eq!(Command::parse(":think maybe"), Command::Unknown(":think maybe".to_string()));
    assert_eq!(Command::parse(":measure tall"), Command::Unknown(":measure tall".to_string()));
    assert_eq!(Command::parse(":frobnicate"), Command::Unknown(":frobnicate".to_string()));
    assert_eq!(Command::parse(":chat "), Command::Unknown(":chat ".to_string()));
}

#[test]
fn test_rendering_hides_empty_states() {
    assert_eq!(describe_answer(&QueryState::Idle), None);
    assert_eq!(
        describe_answer(&QueryState::Settled { seq: 3, payload: Some("42".to_string()) }),
        Some("answer: 42".to_string())
    );
    assert_eq!(
        describe_answer(&QueryState::Failed {
            seq: 4,
            error: QueryError::BackendUnavailable("connection refused".to_string()),
        }),
        Some("answer error: Backend unavailable: connection refused".to_string())
    );
    assert_eq!(describe_translation(&QueryState::Settled { seq: 1, payload: None }), None);
    assert_eq!(
        describe_translation(&QueryState::Settled {
            seq: 2,
            payload: Some(Translation {
                text: "hello".to_string(),
                detected_language: "fr".to_string(),
            }),
        }),
        Some("translation [fr]: hello".to_string())
    );
}

#[tokio::test]
async fn test_chat_streams_tokens_as_they_arrive() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#,
        "\n",
        r#"{"message":{"role":"assistant","content":"lo!"},"done":false}"#,
        "\n",
        r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        "\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({"model": "m1", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let client = OllamaClient::with_url(server.uri());
    let mut out = Vec::new();
    let reply = stream_chat(&client, "m1", "say hello", &mut out).await.unwrap();

    assert_eq!(reply, "Hello!");
    assert_eq!(String::from_utf8(out).unwrap(), "Hello!\n");
}

#[tokio::test]
async fn test_chat_reports_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = OllamaClient::with_url(server.uri());
    let mut out = Vec::new();
    let err = stream_chat(&client, "m1", "hi", &mut out).await.unwrap_err();
    assert!(matches!(err, BackendError::Api(_)));
}
