//! Poll-based finalizer.
//!
//! A bounded loop over the request/response side of the server. It runs
//! either next to the stream consumer or as its fallback and decides, under
//! three time budgets, when the polled view of the turn is final.

use crate::cancel::wait_for_cancellation;
use crate::error::{ApiError, EngineError};
use crate::merge::{choose_richer, has_renderable, is_terminal, looks_in_progress};
use crate::parts::payload_from_descriptor;
use crate::reducer::CLOCK_SKEW_ALLOWANCE_MS;
use crate::signal::{classify_status, is_auth_failure_hint, SessionStatus};
use crate::types::{MessageDescriptor, Payload};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Pull-based view of one session.
#[async_trait]
pub trait TurnQuery: Send + Sync {
    /// Message descriptor by id; `None` when the server does not know it yet.
    async fn fetch_by_id(&self, message_id: &str) -> Result<Option<MessageDescriptor>, ApiError>;
    /// Most recent assistant message of the session, if any.
    async fn fetch_latest(&self) -> Result<Option<MessageDescriptor>, ApiError>;
    /// Raw status value of the session; `None` when the server reports none.
    async fn fetch_status(&self) -> Result<Option<Value>, ApiError>;
    /// Whether the session is blocked on an unanswered question.
    async fn fetch_question_pending(&self) -> Result<bool, ApiError>;
}

#[derive(Debug, Clone)]
pub struct FinalizeOptions {
    pub poll_interval: Duration,
    /// Reset whenever the polled payload changes.
    pub quiet_timeout: Duration,
    /// Absolute ceiling from loop start.
    pub max_total: Duration,
    /// Applies while no assistant message id is known.
    pub no_message_timeout: Option<Duration>,
    /// Fetch-latest cadence, in iterations.
    pub latest_every: u32,
    /// Fetch-status cadence, in iterations.
    pub status_every: u32,
    /// Turn start in unix ms; older assistant messages are ignored.
    pub started_at_ms: u64,
    pub message_id: Option<String>,
    /// Creation time of `message_id`, when the caller already knows it.
    pub message_created_ms: Option<u64>,
    /// Starting point, typically the stream consumer's last snapshot.
    pub seed: Option<Payload>,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            quiet_timeout: Duration::from_secs(20),
            max_total: Duration::from_secs(180),
            no_message_timeout: Some(Duration::from_secs(30)),
            latest_every: 3,
            status_every: 4,
            started_at_ms: 0,
            message_id: None,
            message_created_ms: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutcome {
    pub payload: Payload,
    pub timed_out: bool,
    /// A terminal session status was observed at some point.
    pub terminal_seen: bool,
    pub last_status: SessionStatus,
}

/// Poll until the turn is final, a budget runs out, or the caller cancels.
pub async fn finalize<Q>(
    query: &Q,
    options: FinalizeOptions,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<FinalizeOutcome, EngineError>
where
    Q: TurnQuery + ?Sized,
{
    let started = Instant::now();
    let mut last_progress = started;
    let latest_every = options.latest_every.max(1);
    let status_every = options.status_every.max(1);

    let mut payload = options.seed.clone().unwrap_or_default();
    let mut message_id = options.message_id.clone().or_else(|| payload.message_id.clone());
    let mut message_created_ms = options.message_created_ms.unwrap_or(0);
    let mut last_status = SessionStatus::default();
    let mut terminal_seen = false;
    let mut iteration = 0u32;

    let outcome = |payload: Payload, timed_out: bool, terminal_seen: bool, status: &SessionStatus| {
        FinalizeOutcome {
            payload,
            timed_out,
            terminal_seen,
            last_status: status.clone(),
        }
    };

    loop {
        let before = payload.clone();

        if let Some(id) = message_id.clone() {
            match cancellable(cancel_rx, query.fetch_by_id(&id)).await? {
                Ok(Some(descriptor)) => {
                    if let Some(candidate) = payload_from_descriptor(&descriptor) {
                        if message_created_ms == 0 {
                            message_created_ms = descriptor.created_ms();
                        }
                        payload = choose_richer(&payload, &candidate);
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::debug!(message = %id, error = %err, "fetch by id failed"),
            }
        }

        if iteration % latest_every == 0 {
            match cancellable(cancel_rx, query.fetch_latest()).await? {
                Ok(Some(descriptor)) => {
                    if let Some(candidate) = latest_candidate(&descriptor, options.started_at_ms) {
                        let created = descriptor.created_ms();
                        if message_id.as_deref() == descriptor.id() {
                            if message_created_ms == 0 {
                                message_created_ms = created;
                            }
                            payload = choose_richer(&payload, &candidate);
                        } else if message_id.is_none() {
                            tracing::debug!(message = ?descriptor.id(), "adopting latest assistant message");
                            message_id = descriptor.id().map(str::to_string);
                            message_created_ms = created;
                            payload = choose_richer(&payload, &candidate);
                        } else if message_created_ms > 0 && created > message_created_ms {
                            // Only a strictly newer message replaces the tracked one.
                            tracing::debug!(message = ?descriptor.id(), "superseding tracked assistant message");
                            message_id = descriptor.id().map(str::to_string);
                            message_created_ms = created;
                            payload = candidate;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::debug!(error = %err, "fetch latest failed"),
            }
        }

        if iteration % status_every == 0 {
            match cancellable(cancel_rx, query.fetch_status()).await? {
                Ok(value) => {
                    last_status = value
                        .as_ref()
                        .map(classify_status)
                        .unwrap_or_default();
                    terminal_seen |= last_status.is_terminal();
                    if is_auth_failure_hint(&last_status.hint) {
                        tracing::info!(hint = %last_status.hint, "session reported an auth failure");
                        let failed = auth_failure_payload(&payload, &last_status.hint);
                        return Ok(outcome(failed, false, terminal_seen, &last_status));
                    }
                }
                Err(err) => tracing::debug!(error = %err, "fetch status failed"),
            }
        }

        let now = Instant::now();
        if payload != before {
            last_progress = now;
        }

        let completion_observed =
            payload.completed || (last_status.is_terminal() && is_terminal(&payload));
        if has_renderable(&payload) && !looks_in_progress(&payload) && completion_observed {
            tracing::debug!(iteration, "finalizer observed completion");
            return Ok(outcome(payload, false, terminal_seen, &last_status));
        }

        if last_status.is_terminal() && !has_renderable(&payload) {
            if question_pending(query, cancel_rx).await? {
                last_progress = now;
            } else if message_id.is_some() || options.no_message_timeout.is_some() {
                tracing::debug!(status = %last_status.label(), "terminal status without content");
                return Ok(outcome(payload, false, terminal_seen, &last_status));
            }
        }

        let elapsed = now.duration_since(started);
        if elapsed >= options.max_total {
            tracing::debug!(?elapsed, "finalizer hit the absolute ceiling");
            return Ok(outcome(payload, true, terminal_seen, &last_status));
        }
        if message_id.is_none()
            && options
                .no_message_timeout
                .is_some_and(|limit| elapsed >= limit)
        {
            tracing::debug!(?elapsed, "no assistant message appeared");
            return Ok(outcome(payload, true, terminal_seen, &last_status));
        }
        if now.duration_since(last_progress) >= options.quiet_timeout {
            if question_pending(query, cancel_rx).await? {
                last_progress = now;
            } else {
                tracing::debug!(?elapsed, "finalizer quiet timeout");
                return Ok(outcome(payload, true, terminal_seen, &last_status));
            }
        }

        tokio::select! {
            biased;
            _ = wait_for_cancellation(cancel_rx) => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
        iteration = iteration.wrapping_add(1);
    }
}

/// Run one query call, failing fast when the caller cancels.
async fn cancellable<F>(cancel_rx: &mut watch::Receiver<bool>, call: F) -> Result<F::Output, EngineError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = wait_for_cancellation(cancel_rx) => Err(EngineError::Cancelled),
        output = call => Ok(output),
    }
}

async fn question_pending<Q>(query: &Q, cancel_rx: &mut watch::Receiver<bool>) -> Result<bool, EngineError>
where
    Q: TurnQuery + ?Sized,
{
    match cancellable(cancel_rx, query.fetch_question_pending()).await? {
        Ok(pending) => Ok(pending),
        Err(err) => {
            tracing::debug!(error = %err, "fetch question pending failed");
            Ok(false)
        }
    }
}

/// Assistant payload from fetch-latest, unless it predates the turn.
fn latest_candidate(descriptor: &MessageDescriptor, started_at_ms: u64) -> Option<Payload> {
    let created = descriptor.created_ms();
    if created > 0 && created + CLOCK_SKEW_ALLOWANCE_MS < started_at_ms {
        return None;
    }
    payload_from_descriptor(descriptor)
}

fn auth_failure_payload(current: &Payload, hint: &str) -> Payload {
    Payload {
        message_id: current.message_id.clone(),
        reasoning: current.reasoning.clone(),
        blocks: current.blocks.clone(),
        ..Payload::error(hint)
    }
}
