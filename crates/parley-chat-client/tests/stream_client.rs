mod support;

use std::cell::Cell;
use std::sync::Arc;

use anyhow::Result;
use parley_chat_client::{
    ChatClient, ChatClientConfig, SendMessageRequest, StreamEvent, StreamOutcome,
};
use reqwest::cookie::Jar;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use support::{start_mock_backend, unreachable_base_url};

struct Captured {
    events: Vec<StreamEvent>,
    errors: Vec<String>,
    outcome: StreamOutcome,
}

async fn send(client: &ChatClient, request: SendMessageRequest<'_>) -> Captured {
    let mut events = Vec::new();
    let mut errors = Vec::new();
    let outcome = client
        .send_message_stream(
            request,
            |event| events.push(event),
            |error| errors.push(error),
            &CancellationToken::new(),
        )
        .await;
    Captured {
        events,
        errors,
        outcome,
    }
}

fn request<'a>(conversation_id: &'a str, content: &'a str) -> SendMessageRequest<'a> {
    SendMessageRequest {
        conversation_id,
        content,
        access_token: None,
    }
}

#[tokio::test]
async fn split_stream_is_reassembled_and_stops_at_done() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;

    let captured = send(&client, request("split", "hi")).await;

    assert!(captured.errors.is_empty(), "errors: {:?}", captured.errors);
    assert_eq!(captured.outcome, StreamOutcome::Terminated);
    let kinds = captured
        .events
        .iter()
        .map(StreamEvent::kind)
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["message", "token", "tool_call", "token", "done"]);
    assert_eq!(captured.events[0], StreamEvent::user_message("hi"));
    assert_eq!(captured.events[1], StreamEvent::token("Hello"));
    assert_eq!(captured.events[3], StreamEvent::token(" there"));
    assert!(
        !captured
            .events
            .contains(&StreamEvent::token("after done"))
    );
    Ok(())
}

#[tokio::test]
async fn error_event_terminates_the_stream() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;

    let captured = send(&client, request("error-event", "hi")).await;

    assert_eq!(
        captured.events,
        vec![
            StreamEvent::token("partial"),
            StreamEvent::error(Some("model overloaded".to_string())),
        ]
    );
    assert!(captured.errors.is_empty());
    assert_eq!(captured.outcome, StreamOutcome::Terminated);
    Ok(())
}

#[tokio::test]
async fn stream_without_terminal_event_ends_at_eof() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;

    let captured = send(&client, request("eof", "hi")).await;

    assert_eq!(
        captured.events,
        vec![StreamEvent::token("a"), StreamEvent::token("b")]
    );
    assert_eq!(captured.outcome, StreamOutcome::Completed);
    Ok(())
}

#[tokio::test]
async fn synchronous_reply_is_replayed_as_three_events() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;

    let captured = send(&client, request("sync", "hi")).await;

    assert_eq!(
        captured.events,
        vec![
            StreamEvent::user_message("hi"),
            StreamEvent::token("hello"),
            StreamEvent::done(),
        ]
    );
    assert_eq!(
        captured
            .events
            .iter()
            .map(StreamEvent::to_value)
            .collect::<Vec<_>>(),
        vec![
            json!({"type": "message", "role": "user", "content": "hi"}),
            json!({"type": "token", "content": "hello"}),
            json!({"type": "done"}),
        ]
    );
    assert!(captured.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn synchronous_reply_without_messages_is_a_decode_error() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;

    let captured = send(&client, request("sync-malformed", "hi")).await;

    assert!(captured.events.is_empty(), "events: {:?}", captured.events);
    assert_eq!(captured.errors.len(), 1);
    assert!(captured.errors[0].starts_with("send_message_decode_failed:"));
    assert_eq!(captured.outcome, StreamOutcome::Failed);
    Ok(())
}

#[tokio::test]
async fn http_failure_reports_status_and_body_once() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;

    let captured = send(&client, request("fail", "hi")).await;

    assert!(captured.events.is_empty());
    assert_eq!(captured.errors.len(), 1);
    assert!(captured.errors[0].contains("500"));
    assert!(captured.errors[0].contains("boom"));
    assert_eq!(captured.outcome, StreamOutcome::Failed);
    Ok(())
}

#[tokio::test]
async fn unparseable_error_body_falls_back_to_generic_message() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;

    let captured = send(&client, request("fail-html", "hi")).await;
    assert_eq!(
        captured.errors,
        vec!["send_message_http_502:Failed to send message".to_string()]
    );

    let captured = send(&client, request("missing", "hi")).await;
    assert_eq!(
        captured.errors,
        vec!["send_message_http_404:conversation not found".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn transport_failure_is_reported_not_returned() -> Result<()> {
    let client = ChatClient::new(ChatClientConfig::new(unreachable_base_url().await?))?;

    let captured = send(&client, request("split", "hi")).await;

    assert!(captured.events.is_empty());
    assert_eq!(captured.errors.len(), 1);
    assert!(captured.errors[0].starts_with("send_message_request_failed:"));
    assert_eq!(captured.outcome, StreamOutcome::Failed);
    Ok(())
}

#[tokio::test]
async fn bearer_header_is_sent_only_when_supplied_and_cookies_always() -> Result<()> {
    let backend = start_mock_backend().await?;
    let jar = Arc::new(Jar::default());
    let url = reqwest::Url::parse(&backend.base_url)?;
    jar.add_cookie_str("session=cookie-session; Path=/", &url);
    let client = ChatClient::with_cookie_jar(ChatClientConfig::new(&backend.base_url), jar)?;

    let with_token = send(
        &client,
        SendMessageRequest {
            conversation_id: "echo-auth",
            content: "ping",
            access_token: Some("token-123"),
        },
    )
    .await;
    assert_eq!(
        with_token.events,
        vec![
            StreamEvent::token("token-123"),
            StreamEvent::token("cookie-session"),
            StreamEvent::token("ping"),
            StreamEvent::done(),
        ]
    );

    let without_token = send(&client, request("echo-auth", "pong")).await;
    assert_eq!(without_token.events[0], StreamEvent::token("none"));
    assert_eq!(without_token.events[1], StreamEvent::token("cookie-session"));
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_reading_without_callbacks() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;
    let cancel = CancellationToken::new();

    let mut events = Vec::new();
    let mut errors = Vec::new();
    let outcome = client
        .send_message_stream(
            request("hang", "hi"),
            |event| {
                events.push(event);
                cancel.cancel();
            },
            |error| errors.push(error),
            &cancel,
        )
        .await;

    assert_eq!(outcome, StreamOutcome::Cancelled);
    assert_eq!(events, vec![StreamEvent::token("first")]);
    assert!(errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn pre_cancelled_token_skips_the_request() -> Result<()> {
    let backend = start_mock_backend().await?;
    let client = ChatClient::new(ChatClientConfig::new(&backend.base_url))?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let delivered = Cell::new(0);
    let outcome = client
        .send_message_stream(
            request("split", "hi"),
            |_| delivered.set(delivered.get() + 1),
            |_| delivered.set(delivered.get() + 1),
            &cancel,
        )
        .await;

    assert_eq!(outcome, StreamOutcome::Cancelled);
    assert_eq!(delivered.get(), 0);
    Ok(())
}
