//! Server-sent event framing and the live event subscription.

use super::client::OpencodeClient;
use super::retry::RetryPolicy;
use crate::error::ApiError;
use crate::reducer::{EventSource, StreamEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

/// Incremental SSE framer.
///
/// Bytes are buffered until a full line is available, so a chunk boundary
/// inside a multi-byte character never corrupts a payload. `data:` lines of
/// one event are joined with `\n`; a blank line ends the event; comment lines
/// starting with `:` are skipped.
#[derive(Debug, Default)]
pub struct SseFrameBuffer {
    partial: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseFrameBuffer {
    /// Feed one network chunk; returns the payloads it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(end) = self.partial.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw[..end]);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            self.feed_line(line, &mut payloads);
        }
        payloads
    }

    /// Flush whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        if !self.partial.is_empty() {
            let raw = std::mem::take(&mut self.partial);
            let text = String::from_utf8_lossy(&raw);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            self.feed_line(line, &mut payloads);
        }
        self.flush(&mut payloads);
        payloads
    }

    fn feed_line(&mut self, line: &str, payloads: &mut Vec<String>) {
        if line.is_empty() {
            self.flush(payloads);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
    }

    fn flush(&mut self, payloads: &mut Vec<String>) {
        if self.data_lines.is_empty() {
            return;
        }
        payloads.push(self.data_lines.join("\n"));
        self.data_lines.clear();
    }
}

/// Parse a complete SSE body into its data payloads.
pub fn parse_sse_event_payloads(stream: &str) -> Vec<String> {
    let mut buffer = SseFrameBuffer::default();
    let mut payloads = buffer.push(stream.as_bytes());
    payloads.extend(buffer.finish());
    payloads
}

/// Decode one SSE data payload into an event.
///
/// Accepts both bare `{type, properties}` envelopes and the global stream's
/// `{directory, payload: {...}}` wrapping. Non-JSON payloads yield `None`.
pub fn decode_event_payload(payload: &str) -> Option<StreamEvent> {
    let value: Value = serde_json::from_str(payload.trim()).ok()?;
    let envelope = match value.get("type") {
        Some(_) => &value,
        None => value.get("payload")?,
    };
    Some(StreamEvent::from_value(envelope))
}

/// Live `GET /event` subscription with bounded reconnects.
///
/// Returns `None` from [`EventSource::next_event`] once reconnects are
/// exhausted, which the engine treats as "stream closed".
pub struct SseEventSource {
    client: Arc<OpencodeClient>,
    response: Option<reqwest::Response>,
    buffer: SseFrameBuffer,
    pending: VecDeque<StreamEvent>,
    reconnect: RetryPolicy,
    failures: u32,
    closed: bool,
}

impl SseEventSource {
    /// Open the subscription now so no event emitted after this call is
    /// missed.
    pub async fn connect(client: Arc<OpencodeClient>) -> Result<Self, ApiError> {
        let response = client.subscribe().await?;
        Ok(Self {
            client,
            response: Some(response),
            buffer: SseFrameBuffer::default(),
            pending: VecDeque::new(),
            reconnect: RetryPolicy::reconnect(),
            failures: 0,
            closed: false,
        })
    }

    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    fn queue(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            match decode_event_payload(&payload) {
                Some(event) => self.pending.push_back(event),
                None => tracing::debug!(payload = %payload, "skipping undecodable event payload"),
            }
        }
    }

    async fn resubscribe(&mut self) {
        loop {
            if self.failures >= self.reconnect.max_attempts {
                tracing::warn!(failures = self.failures, "event stream reconnects exhausted");
                self.closed = true;
                return;
            }
            tokio::time::sleep(self.reconnect.delay_for(self.failures)).await;
            self.failures += 1;
            match self.client.subscribe().await {
                Ok(response) => {
                    tracing::debug!(attempt = self.failures, "event stream reconnected");
                    self.response = Some(response);
                    return;
                }
                Err(err) => tracing::debug!(error = %err, "event stream reconnect failed"),
            }
        }
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.closed {
                return None;
            }
            let Some(response) = self.response.as_mut() else {
                self.resubscribe().await;
                continue;
            };
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    self.failures = 0;
                    let payloads = self.buffer.push(&chunk);
                    self.queue(payloads);
                }
                Ok(None) => {
                    tracing::debug!("event stream ended");
                    let payloads = self.buffer.finish();
                    self.queue(payloads);
                    self.response = None;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "event stream read failed");
                    self.buffer = SseFrameBuffer::default();
                    self.response = None;
                }
            }
        }
    }
}
