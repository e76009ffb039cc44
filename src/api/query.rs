//! HTTP-backed [`TurnQuery`] for one session.

use super::client::OpencodeClient;
use crate::error::ApiError;
use crate::finalizer::TurnQuery;
use crate::types::MessageDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// How many trailing messages to scan for the newest assistant reply.
const LATEST_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct SessionQuery {
    client: Arc<OpencodeClient>,
    session_id: String,
}

impl SessionQuery {
    pub fn new(client: Arc<OpencodeClient>, session_id: impl Into<String>) -> Self {
        Self {
            client,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl TurnQuery for SessionQuery {
    async fn fetch_by_id(&self, message_id: &str) -> Result<Option<MessageDescriptor>, ApiError> {
        self.client.message(&self.session_id, message_id).await
    }

    async fn fetch_latest(&self) -> Result<Option<MessageDescriptor>, ApiError> {
        let messages = self.client.messages(&self.session_id, LATEST_WINDOW).await?;
        Ok(latest_assistant(messages))
    }

    async fn fetch_status(&self) -> Result<Option<Value>, ApiError> {
        let statuses = self.client.session_status().await?;
        Ok(statuses.get(&self.session_id).cloned())
    }

    async fn fetch_question_pending(&self) -> Result<bool, ApiError> {
        let questions = self.client.questions().await?;
        Ok(questions
            .iter()
            .any(|question| question_session(question) == Some(self.session_id.as_str())))
    }
}

/// Newest assistant message; ties on creation time go to the later entry.
fn latest_assistant(messages: Vec<MessageDescriptor>) -> Option<MessageDescriptor> {
    messages
        .into_iter()
        .filter(MessageDescriptor::is_assistant)
        .fold(None, |best: Option<MessageDescriptor>, message| match best {
            Some(best) if best.created_ms() > message.created_ms() => Some(best),
            _ => Some(message),
        })
}

fn question_session(question: &Value) -> Option<&str> {
    question
        .get("sessionID")
        .or_else(|| question.get("sessionId"))
        .and_then(Value::as_str)
}
