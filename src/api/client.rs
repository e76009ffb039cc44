//! Thin HTTP client over the assistant server's session endpoints.

use super::retry::RetryPolicy;
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::types::MessageDescriptor;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;

const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one assistant server, optionally scoped to a project directory.
#[derive(Debug, Clone)]
pub struct OpencodeClient {
    http: reqwest::Client,
    /// No overall timeout: the event stream stays open indefinitely.
    stream_http: reqwest::Client,
    base_url: String,
    directory: Option<String>,
    retry_policy: RetryPolicy,
}

impl OpencodeClient {
    pub fn new(config: &ServerConfig) -> Self {
        let timeout = Duration::from_millis(config.request_timeout_ms.max(1));
        Self {
            http: build_http_client(Some(timeout)),
            stream_http: build_http_client(None),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            directory: config
                .directory
                .as_deref()
                .map(str::trim)
                .filter(|dir| !dir.is_empty())
                .map(str::to_string),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /session/{id}/message/{messageID}`. A 404 means "not yet known".
    pub async fn message(
        &self,
        session_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageDescriptor>, ApiError> {
        let path = format!("/session/{session_id}/message/{message_id}");
        match self.get_with_retries(&path, &[]).await {
            Ok(response) => Ok(Some(response.json::<MessageDescriptor>().await?)),
            Err(err) if err.status_code() == Some(404) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// `GET /session/{id}/message?limit=N`, oldest first.
    pub async fn messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageDescriptor>, ApiError> {
        let path = format!("/session/{session_id}/message");
        let limit = limit.to_string();
        let response = self.get_with_retries(&path, &[("limit", &limit)]).await?;
        Ok(response.json::<Vec<MessageDescriptor>>().await?)
    }

    /// `GET /session/status`: map of session id to status object.
    pub async fn session_status(&self) -> Result<Value, ApiError> {
        let response = self.get_with_retries("/session/status", &[]).await?;
        let value: Value = response.json().await?;
        if !value.is_object() {
            return Err(ApiError::InvalidResponse(
                "session status is not an object".to_string(),
            ));
        }
        Ok(value)
    }

    /// `GET /question`: every unanswered question across sessions.
    pub async fn questions(&self) -> Result<Vec<Value>, ApiError> {
        let response = self.get_with_retries("/question", &[]).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }

    /// `POST /session/{id}/prompt_async`. Sent once: a retried prompt could
    /// start a second turn.
    pub async fn prompt_async(&self, session_id: &str, text: &str) -> Result<(), ApiError> {
        let path = format!("/session/{session_id}/prompt_async");
        let body = json!({ "parts": [{ "type": "text", "text": text }] });
        let response = self
            .request(&self.http, Method::POST, &path)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// `GET /event`. The returned response body is the raw SSE stream.
    pub async fn subscribe(&self) -> Result<Response, ApiError> {
        let response = self
            .request(&self.stream_http, Method::GET, "/event")
            .header("accept", "text/event-stream")
            .send()
            .await?;
        check_status(response).await
    }

    fn request(&self, http: &reqwest::Client, method: Method, path: &str) -> RequestBuilder {
        let mut builder = http.request(method, format!("{}{path}", self.base_url));
        if let Some(directory) = &self.directory {
            builder = builder.query(&[("directory", directory.as_str())]);
        }
        builder
    }

    async fn get_with_retries(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match self
                .request(&self.http, Method::GET, path)
                .query(query)
                .send()
                .await
            {
                Ok(response) => check_status(response).await,
                Err(err) => Err(ApiError::from(err)),
            };
            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !self.retry_policy.should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = self.retry_policy.delay_for(attempt);
                    tracing::debug!(path, attempt, error = %err, "retrying request");
                    attempt = attempt.saturating_add(1);
                    sleep(delay).await;
                }
            }
        }
    }
}

fn build_http_client(timeout: Option<Duration>) -> reqwest::Client {
    let builder = reqwest::Client::builder().connect_timeout(STREAM_CONNECT_TIMEOUT);
    let builder = match timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    };
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = if status == StatusCode::NOT_FOUND {
        String::new()
    } else {
        response.text().await.unwrap_or_default()
    };
    Err(ApiError::status(status.as_u16(), body))
}
