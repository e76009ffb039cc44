//! HTTP access to the assistant server.
//!
//! - `client`: endpoint calls with retry on transient failures
//! - `query`: [`crate::finalizer::TurnQuery`] over those endpoints
//! - `sse`: incremental SSE framing and the live event subscription
//! - `retry`: backoff policy shared by requests and reconnects

mod client;
mod query;
mod retry;
mod sse;

pub use client::OpencodeClient;
pub use query::SessionQuery;
pub use retry::{is_transient, RetryPolicy};
pub use sse::{decode_event_payload, parse_sse_event_payloads, SseEventSource, SseFrameBuffer};
