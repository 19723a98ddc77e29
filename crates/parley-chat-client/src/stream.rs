use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::events::StreamEvent;
use crate::sse::SseLineDecoder;
use crate::{ChatClient, ChatClientError, format_http_error, request_id, with_bearer};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

#[derive(Debug, Clone, Copy)]
pub struct SendMessageRequest<'a> {
    pub conversation_id: &'a str,
    pub content: &'a str,
    pub access_token: Option<&'a str>,
}

/// How a streamed send ended. Failures have already been reported through
/// `on_error` by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The transport reached end-of-stream.
    Completed,
    /// A `done` or `error` event was delivered.
    Terminated,
    Failed,
    Cancelled,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// Body of a backend that answers synchronously.
#[derive(Debug, Deserialize)]
struct SyncReplyBody {
    user_message: MessageContent,
    ai_message: MessageContent,
}

enum Flow {
    Continue,
    Stop(StreamOutcome),
}

impl ChatClient {
    /// Sends one message and reports the reply through callbacks.
    ///
    /// Never fails: every error path calls `on_error` exactly once and
    /// returns [`StreamOutcome::Failed`]. Cancelling `cancel` drops the
    /// response body and returns [`StreamOutcome::Cancelled`] without calling
    /// either callback.
    pub async fn send_message_stream<E, R>(
        &self,
        request: SendMessageRequest<'_>,
        mut on_event: E,
        mut on_error: R,
        cancel: &CancellationToken,
    ) -> StreamOutcome
    where
        E: FnMut(StreamEvent),
        R: FnMut(String),
    {
        match self.try_send_message_stream(request, &mut on_event, cancel).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(
                    conversation_id = request.conversation_id,
                    error = %error,
                    "send message failed"
                );
                on_error(error.to_string());
                StreamOutcome::Failed
            }
        }
    }

    async fn try_send_message_stream<E>(
        &self,
        request: SendMessageRequest<'_>,
        on_event: &mut E,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ChatClientError>
    where
        E: FnMut(StreamEvent),
    {
        let url = self.endpoint(&Self::messages_path(request.conversation_id));
        let builder = with_bearer(
            self.http()
                .post(url.as_str())
                .header("x-request-id", request_id())
                .json(&SendMessageBody {
                    content: request.content,
                }),
            request.access_token,
        );

        tracing::debug!(
            conversation_id = request.conversation_id,
            authenticated = request.access_token.is_some(),
            "sending chat message"
        );

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
            sent = builder.send() => sent.map_err(|error| ChatClientError::Request {
                message: error.to_string(),
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            // Best effort: an unreadable error body still yields the status.
            let body = response.bytes().await.unwrap_or_default();
            return Err(format_http_error(status, &body));
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains(EVENT_STREAM_CONTENT_TYPE));

        if is_event_stream {
            read_event_stream(response, on_event, cancel).await
        } else {
            read_sync_reply(response, on_event, cancel).await
        }
    }
}

async fn read_event_stream<E>(
    response: reqwest::Response,
    on_event: &mut E,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, ChatClientError>
where
    E: FnMut(StreamEvent),
{
    let mut body = Box::pin(response.bytes_stream());
    let mut decoder = SseLineDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("chat stream cancelled");
                return Ok(StreamOutcome::Cancelled);
            }
            next = body.next() => next,
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|error| ChatClientError::Read {
            message: error.to_string(),
        })?;

        for payload in decoder.push(&chunk) {
            if let Flow::Stop(outcome) = deliver(&payload, on_event) {
                return Ok(outcome);
            }
        }
    }

    if let Some(payload) = decoder.finish() {
        if let Flow::Stop(outcome) = deliver(&payload, on_event) {
            return Ok(outcome);
        }
    }
    Ok(StreamOutcome::Completed)
}

fn deliver<E>(payload: &str, on_event: &mut E) -> Flow
where
    E: FnMut(StreamEvent),
{
    match StreamEvent::parse(payload) {
        Ok(event) => {
            let terminal = event.is_terminal();
            on_event(event);
            if terminal {
                Flow::Stop(StreamOutcome::Terminated)
            } else {
                Flow::Continue
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, payload, "dropping malformed stream event");
            Flow::Continue
        }
    }
}

async fn read_sync_reply<E>(
    response: reqwest::Response,
    on_event: &mut E,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, ChatClientError>
where
    E: FnMut(StreamEvent),
{
    let bytes = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
        bytes = response.bytes() => bytes.map_err(|error| ChatClientError::Read {
            message: error.to_string(),
        })?,
    };

    let reply = serde_json::from_slice::<SyncReplyBody>(&bytes).map_err(|error| {
        ChatClientError::Decode {
            message: error.to_string(),
        }
    })?;

    on_event(StreamEvent::user_message(reply.user_message.content));
    on_event(StreamEvent::token(reply.ai_message.content));
    on_event(StreamEvent::done());
    Ok(StreamOutcome::Terminated)
}
