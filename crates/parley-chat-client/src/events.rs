use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// One unit of server-pushed progress for a chat reply.
///
/// Fields the client does not model are kept in `extra` (or `payload` for
/// unknown event types) and forwarded untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Echo of the message the user submitted.
    Message {
        role: String,
        content: String,
        extra: Map<String, Value>,
    },
    /// Incremental or complete assistant text.
    Token {
        content: String,
        extra: Map<String, Value>,
    },
    Error {
        message: Option<String>,
        extra: Map<String, Value>,
    },
    Done {
        extra: Map<String, Value>,
    },
    /// Any other `type`, e.g. tool-call metadata.
    Other {
        kind: String,
        payload: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamEventError {
    #[error("stream_event_invalid_json:{message}")]
    InvalidJson { message: String },
    #[error("stream_event_not_object")]
    NotObject,
    #[error("stream_event_missing_type")]
    MissingType,
}

impl StreamEvent {
    pub fn user_message(content: impl Into<String>) -> Self {
        Self::Message {
            role: "user".to_string(),
            content: content.into(),
            extra: Map::new(),
        }
    }

    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
            extra: Map::new(),
        }
    }

    pub fn error(message: Option<String>) -> Self {
        Self::Error {
            message,
            extra: Map::new(),
        }
    }

    pub fn done() -> Self {
        Self::Done { extra: Map::new() }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Message { .. } => "message",
            Self::Token { .. } => "token",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
            Self::Other { kind, .. } => kind,
        }
    }

    /// `error` and `done` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }

    pub fn parse(payload: &str) -> Result<Self, StreamEventError> {
        let value = serde_json::from_str::<Value>(payload).map_err(|error| {
            StreamEventError::InvalidJson {
                message: error.to_string(),
            }
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, StreamEventError> {
        let Value::Object(mut fields) = value else {
            return Err(StreamEventError::NotObject);
        };
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(StreamEventError::MissingType),
        };

        let event = match kind.as_str() {
            "message" => Self::Message {
                role: take_string(&mut fields, "role").unwrap_or_default(),
                content: take_string(&mut fields, "content").unwrap_or_default(),
                extra: fields,
            },
            "token" => Self::Token {
                content: take_string(&mut fields, "content").unwrap_or_default(),
                extra: fields,
            },
            "error" => Self::Error {
                message: take_string(&mut fields, "message"),
                extra: fields,
            },
            "done" => Self::Done { extra: fields },
            _ => Self::Other {
                kind,
                payload: fields,
            },
        };
        Ok(event)
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(self.kind().to_string()));
        match self {
            Self::Message {
                role,
                content,
                extra,
            } => {
                fields.insert("role".to_string(), Value::String(role.clone()));
                fields.insert("content".to_string(), Value::String(content.clone()));
                fields.extend(extra.clone());
            }
            Self::Token { content, extra } => {
                fields.insert("content".to_string(), Value::String(content.clone()));
                fields.extend(extra.clone());
            }
            Self::Error { message, extra } => {
                if let Some(message) = message {
                    fields.insert("message".to_string(), Value::String(message.clone()));
                }
                fields.extend(extra.clone());
            }
            Self::Done { extra } => fields.extend(extra.clone()),
            Self::Other { payload, .. } => fields.extend(payload.clone()),
        }
        Value::Object(fields)
    }
}

impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

// Non-string values are left in place so they are forwarded with the extras.
fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(_)) => match fields.remove(key) {
            Some(Value::String(value)) => Some(value),
            _ => None,
        },
        _ => None,
    }
}
