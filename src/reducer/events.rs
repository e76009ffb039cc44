//! Typed decoding of the server's `{type, properties}` event envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event from the live subscription.
///
/// Only the handful of fields the reducer reads are lifted out; the rest of
/// each envelope is kept as raw JSON for side-channel forwarding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageUpdated {
        session_id: Option<String>,
        info: Value,
    },
    PartUpdated {
        session_id: Option<String>,
        part: Value,
        delta: Option<String>,
    },
    PartDelta {
        session_id: Option<String>,
        message_id: String,
        part_id: String,
        field: String,
        delta: String,
    },
    PartRemoved {
        session_id: Option<String>,
        message_id: String,
        part_id: String,
    },
    PermissionAsked {
        session_id: Option<String>,
        id: String,
        request: Value,
    },
    QuestionAsked {
        session_id: Option<String>,
        id: String,
        request: Value,
    },
    QuestionResolved {
        session_id: Option<String>,
        id: String,
    },
    Toast {
        payload: Value,
    },
    PromptAppend {
        text: String,
    },
    SessionError {
        session_id: Option<String>,
        error: Value,
    },
    SessionIdle {
        session_id: Option<String>,
    },
    SessionStatus {
        session_id: Option<String>,
        status: Value,
    },
    Other {
        event_type: String,
    },
}

impl StreamEvent {
    /// Decode a raw envelope. Unknown or malformed envelopes become `Other`.
    pub fn from_value(envelope: &Value) -> Self {
        let event_type = envelope
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let props = envelope.get("properties").cloned().unwrap_or(Value::Null);
        let session_id = session_id_of(&props);

        match event_type.as_str() {
            "message.updated" => match props.get("info") {
                Some(info) => Self::MessageUpdated {
                    session_id: session_id.or_else(|| session_id_of(info)),
                    info: info.clone(),
                },
                None => Self::Other { event_type },
            },
            "message.part.updated" => match props.get("part") {
                Some(part) => Self::PartUpdated {
                    session_id: session_id.or_else(|| session_id_of(part)),
                    part: part.clone(),
                    delta: str_prop(&props, "delta"),
                },
                None => Self::Other { event_type },
            },
            "message.part.delta" => {
                let message_id = str_prop(&props, "messageID");
                let part_id = str_prop(&props, "partID");
                let delta = str_prop(&props, "delta");
                match (message_id, part_id, delta) {
                    (Some(message_id), Some(part_id), Some(delta)) => Self::PartDelta {
                        session_id,
                        message_id,
                        part_id,
                        field: str_prop(&props, "field").unwrap_or_else(|| "text".to_string()),
                        delta,
                    },
                    _ => Self::Other { event_type },
                }
            }
            "message.part.removed" => {
                match (str_prop(&props, "messageID"), str_prop(&props, "partID")) {
                    (Some(message_id), Some(part_id)) => Self::PartRemoved {
                        session_id,
                        message_id,
                        part_id,
                    },
                    _ => Self::Other { event_type },
                }
            }
            "permission.asked" | "permission.updated" => match str_prop(&props, "id") {
                Some(id) => Self::PermissionAsked {
                    session_id,
                    id,
                    request: props,
                },
                None => Self::Other { event_type },
            },
            "question.asked" => match str_prop(&props, "id") {
                Some(id) => Self::QuestionAsked {
                    session_id,
                    id,
                    request: props,
                },
                None => Self::Other { event_type },
            },
            "question.replied" | "question.rejected" => {
                match str_prop(&props, "requestID").or_else(|| str_prop(&props, "id")) {
                    Some(id) => Self::QuestionResolved { session_id, id },
                    None => Self::Other { event_type },
                }
            }
            "tui.toast.show" => Self::Toast { payload: props },
            "tui.prompt.append" => Self::PromptAppend {
                text: str_prop(&props, "text").unwrap_or_default(),
            },
            "session.error" => Self::SessionError {
                session_id,
                error: props.get("error").cloned().unwrap_or(Value::Null),
            },
            "session.idle" => Self::SessionIdle { session_id },
            "session.status" => Self::SessionStatus {
                session_id,
                status: props.get("status").cloned().unwrap_or(Value::Null),
            },
            _ => Self::Other { event_type },
        }
    }

    /// Session the event is scoped to, when it carries one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::MessageUpdated { session_id, .. }
            | Self::PartUpdated { session_id, .. }
            | Self::PartDelta { session_id, .. }
            | Self::PartRemoved { session_id, .. }
            | Self::PermissionAsked { session_id, .. }
            | Self::QuestionAsked { session_id, .. }
            | Self::QuestionResolved { session_id, .. }
            | Self::SessionError { session_id, .. }
            | Self::SessionIdle { session_id }
            | Self::SessionStatus { session_id, .. } => session_id.as_deref(),
            Self::Toast { .. } | Self::PromptAppend { .. } | Self::Other { .. } => None,
        }
    }
}

fn session_id_of(value: &Value) -> Option<String> {
    value
        .get("sessionID")
        .or_else(|| value.get("sessionId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn str_prop(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}
