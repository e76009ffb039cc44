//! Turn orchestration.
//!
//! Runs the stream consumer and, optionally, a delayed poll finalizer for
//! one turn. The two units share nothing but immutable `Payload` values and
//! meet only at two join points: a quick reconcile once the stream reports
//! done, and a fallback handoff when the stream closes or stalls first.
//! `finalize.max_total` bounds the whole turn, both units included.

use crate::cancel::wait_for_cancellation;
use crate::config::Config;
use crate::error::EngineError;
use crate::finalizer::{finalize, FinalizeOptions, FinalizeOutcome, TurnQuery};
use crate::merge::{choose_richer, has_renderable, NO_RESPONSE_PREFIX};
use crate::parts::payload_from_descriptor;
use crate::reducer::{
    consume_stream, EventSource, StreamEnd, StreamOptions, StreamOutcome, TurnReducer, TurnUpdate,
};
use crate::signal::SessionStatus;
use crate::types::Payload;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Which unit produced the final view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnSource {
    Stream,
    Poll,
}

/// Final state of one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResult {
    pub payload: Payload,
    pub timed_out: bool,
    pub source: TurnSource,
}

/// Per-turn budgets. Nothing here is shared between turns.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub session_id: String,
    pub started_at_ms: u64,
    pub stream: StreamOptions,
    pub finalize: FinalizeOptions,
    /// Run the finalizer next to the stream instead of only as a fallback.
    pub concurrent_poll: bool,
    pub poll_start_delay: Duration,
    /// Budget for the single fetch made after the stream reports done.
    pub reconcile_timeout: Duration,
}

impl TurnOptions {
    pub fn new(session_id: impl Into<String>, started_at_ms: u64) -> Self {
        Self {
            session_id: session_id.into(),
            started_at_ms,
            stream: StreamOptions {
                stall_timeout: Some(Duration::from_secs(45)),
                max_duration: None,
            },
            finalize: FinalizeOptions {
                started_at_ms,
                ..FinalizeOptions::default()
            },
            concurrent_poll: false,
            poll_start_delay: Duration::from_secs(2),
            reconcile_timeout: Duration::from_secs(3),
        }
    }

    /// Budgets from the loaded configuration.
    pub fn from_config(config: &Config, session_id: impl Into<String>, started_at_ms: u64) -> Self {
        let finalizer = &config.finalizer;
        let stream = &config.stream;
        let millis = Duration::from_millis;
        Self {
            session_id: session_id.into(),
            started_at_ms,
            stream: StreamOptions {
                stall_timeout: (stream.stall_timeout_ms > 0).then(|| millis(stream.stall_timeout_ms)),
                max_duration: None,
            },
            finalize: FinalizeOptions {
                poll_interval: millis(finalizer.poll_interval_ms),
                quiet_timeout: millis(finalizer.quiet_timeout_ms),
                max_total: millis(finalizer.max_total_ms),
                no_message_timeout: (finalizer.no_message_timeout_ms > 0)
                    .then(|| millis(finalizer.no_message_timeout_ms)),
                latest_every: finalizer.latest_every,
                status_every: finalizer.status_every,
                started_at_ms,
                message_id: None,
                message_created_ms: None,
                seed: None,
            },
            concurrent_poll: stream.concurrent_poll,
            poll_start_delay: millis(stream.poll_start_delay_ms),
            reconcile_timeout: millis(stream.reconcile_timeout_ms),
        }
    }
}

/// Synthetic payload for callers that prefer text over a `NoResponse` error.
pub fn no_response_payload(last_status: &str) -> Payload {
    let text = if last_status.trim().is_empty() {
        NO_RESPONSE_PREFIX.to_string()
    } else {
        format!("{NO_RESPONSE_PREFIX} (last status: {})", last_status.trim())
    };
    Payload {
        meta: text.clone(),
        text,
        ..Payload::default()
    }
}

/// Internal join result before the no-response mapping.
struct Settled {
    payload: Payload,
    timed_out: bool,
    last_status: Option<SessionStatus>,
    source: TurnSource,
}

enum FirstDone {
    Stream(StreamOutcome),
    Poll(FinalizeOutcome),
}

/// Drive one turn to its final payload.
///
/// Cancellation fails with [`EngineError::Cancelled`] from whichever unit is
/// running; a turn that ends without renderable content fails with
/// [`EngineError::NoResponse`].
pub async fn run_turn<S, Q>(
    source: &mut S,
    query: &Q,
    options: TurnOptions,
    cancel_rx: &watch::Receiver<bool>,
    sink: Option<&mpsc::UnboundedSender<TurnUpdate>>,
) -> Result<TurnResult, EngineError>
where
    S: EventSource + ?Sized,
    Q: TurnQuery + ?Sized,
{
    let turn_started = Instant::now();
    let max_total = options.finalize.max_total;
    let turn_deadline = turn_started + max_total;
    let stream_options = StreamOptions {
        max_duration: Some(options.stream.max_duration.map_or(max_total, |limit| limit.min(max_total))),
        ..options.stream.clone()
    };

    let mut reducer = TurnReducer::new(options.session_id.clone(), options.started_at_ms);
    let (snapshot_tx, snapshot_rx) = watch::channel(Payload::default());
    let mut stream_cancel = cancel_rx.clone();
    let mut poll_cancel = cancel_rx.clone();
    let mut join_cancel = cancel_rx.clone();

    let concurrent = options.concurrent_poll;
    let poll_delay = options.poll_start_delay;
    let poll_options = FinalizeOptions {
        started_at_ms: options.started_at_ms,
        max_total: max_total.saturating_sub(poll_delay),
        ..options.finalize.clone()
    };

    let stream = consume_stream(
        &mut reducer,
        source,
        &mut stream_cancel,
        sink,
        Some(&snapshot_tx),
        &stream_options,
    );
    tokio::pin!(stream);
    let poll = async {
        if !concurrent {
            return std::future::pending::<Result<FinalizeOutcome, EngineError>>().await;
        }
        tokio::select! {
            biased;
            _ = wait_for_cancellation(&mut poll_cancel) => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(poll_delay) => {}
        }
        finalize(query, poll_options, &mut poll_cancel).await
    };
    tokio::pin!(poll);

    let first = tokio::select! {
        streamed = &mut stream => FirstDone::Stream(streamed?),
        polled = &mut poll => FirstDone::Poll(polled?),
    };

    let settled = match first {
        FirstDone::Stream(streamed) if streamed.end == StreamEnd::Done => {
            let payload = reconcile(query, streamed.payload, options.reconcile_timeout, &mut join_cancel).await?;
            Settled {
                payload,
                timed_out: false,
                last_status: None,
                source: TurnSource::Stream,
            }
        }
        FirstDone::Stream(streamed) => {
            tracing::debug!(end = ?streamed.end, "stream ended early; falling back to polling");
            let polled = if concurrent {
                poll.await?
            } else {
                let handoff = FinalizeOptions {
                    max_total: max_total.saturating_sub(turn_started.elapsed()),
                    message_id: streamed.payload.message_id.clone(),
                    message_created_ms: streamed.message_created_ms,
                    seed: Some(streamed.payload.clone()),
                    ..options.finalize.clone()
                };
                finalize(query, handoff, &mut join_cancel).await?
            };
            Settled {
                payload: choose_richer(&streamed.payload, &polled.payload),
                timed_out: polled.timed_out,
                last_status: Some(polled.last_status),
                source: TurnSource::Poll,
            }
        }
        FirstDone::Poll(polled) if !polled.timed_out => {
            let live = snapshot_rx.borrow().clone();
            Settled {
                payload: choose_richer(&polled.payload, &live),
                timed_out: false,
                last_status: Some(polled.last_status),
                source: TurnSource::Poll,
            }
        }
        FirstDone::Poll(polled) => {
            let streamed = match tokio::time::timeout_at(turn_deadline, &mut stream).await {
                Ok(streamed) => streamed?,
                Err(_) => {
                    tracing::debug!("stream still open at the turn deadline");
                    let live = snapshot_rx.borrow().clone();
                    return settle(Settled {
                        payload: choose_richer(&live, &polled.payload),
                        timed_out: true,
                        last_status: Some(polled.last_status),
                        source: TurnSource::Poll,
                    });
                }
            };
            let merged = choose_richer(&streamed.payload, &polled.payload);
            let stream_done = streamed.end == StreamEnd::Done;
            let payload = if stream_done {
                reconcile(query, merged, options.reconcile_timeout, &mut join_cancel).await?
            } else {
                merged
            };
            Settled {
                payload,
                timed_out: !stream_done,
                last_status: Some(polled.last_status),
                source: if stream_done {
                    TurnSource::Stream
                } else {
                    TurnSource::Poll
                },
            }
        }
    };

    settle(settled)
}

/// Quick reconcile after the stream reported done: one bounded fetch of the
/// tracked message, merged over the stream's view.
async fn reconcile<Q>(
    query: &Q,
    payload: Payload,
    timeout: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<Payload, EngineError>
where
    Q: TurnQuery + ?Sized,
{
    let Some(message_id) = payload.message_id.clone() else {
        return Ok(payload);
    };
    let fetched = tokio::select! {
        biased;
        _ = wait_for_cancellation(cancel_rx) => return Err(EngineError::Cancelled),
        fetched = tokio::time::timeout(timeout, query.fetch_by_id(&message_id)) => fetched,
    };
    let candidate = match fetched {
        Ok(Ok(Some(descriptor))) => payload_from_descriptor(&descriptor),
        Ok(Ok(None)) => None,
        Ok(Err(err)) => {
            tracing::debug!(message = %message_id, error = %err, "reconcile fetch failed");
            None
        }
        Err(_) => {
            tracing::debug!(message = %message_id, "reconcile fetch timed out");
            None
        }
    };
    Ok(match candidate {
        Some(candidate) => choose_richer(&payload, &candidate),
        None => payload,
    })
}

fn settle(settled: Settled) -> Result<TurnResult, EngineError> {
    let Settled {
        mut payload,
        timed_out,
        last_status,
        source,
    } = settled;
    if !has_renderable(&payload) {
        let last_status = last_status
            .filter(|status| status.is_terminal() || !status.hint.is_empty())
            .map(|status| status.label())
            .unwrap_or_default();
        tracing::info!(%last_status, timed_out, "turn ended without a response");
        return Err(EngineError::NoResponse { last_status });
    }
    if timed_out {
        payload.completed = false;
    }
    tracing::info!(
        ?source,
        timed_out,
        completed = payload.completed,
        "turn settled"
    );
    Ok(TurnResult {
        payload,
        timed_out,
        source,
    })
}
