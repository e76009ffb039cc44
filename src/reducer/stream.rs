//! Drive a [`TurnReducer`] from a live event source.

use super::{StreamEvent, TurnReducer, TurnUpdate};
use crate::cancel::wait_for_cancellation;
use crate::error::EngineError;
use crate::types::Payload;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Ordered, possibly infinite sequence of session events.
///
/// `None` means the subscription ended. Reconnection is the source's job.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<StreamEvent>;
}

#[async_trait]
impl EventSource for mpsc::Receiver<StreamEvent> {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.recv().await
    }
}

#[async_trait]
impl EventSource for mpsc::UnboundedReceiver<StreamEvent> {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.recv().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Give up when no event changes the reducer for this long.
    pub stall_timeout: Option<Duration>,
    /// Hard ceiling on the whole stream phase, measured from its start.
    pub max_duration: Option<Duration>,
}

/// Why the consumer stopped listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The reducer reached `done`.
    Done,
    /// The source ended before `done`.
    Closed,
    /// Nothing changed the reducer within the stall timeout.
    Stalled,
    /// The hard ceiling elapsed first.
    Expired,
}

#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub payload: Payload,
    pub end: StreamEnd,
    pub completed: bool,
    /// Creation time of the tracked message, if known.
    pub message_created_ms: Option<u64>,
}

/// Consume events until the reducer is done, the source ends, it stalls, the
/// ceiling passes, or the caller cancels.
///
/// Events that produce no update (heartbeats, foreign sessions) do not count
/// as progress for the stall timeout. Updates are forwarded to `sink` as they happen and every changed snapshot
/// is published on `snapshots`. A closed sink or watch is not an error.
pub async fn consume_stream<S>(
    reducer: &mut TurnReducer,
    source: &mut S,
    cancel_rx: &mut watch::Receiver<bool>,
    sink: Option<&mpsc::UnboundedSender<TurnUpdate>>,
    snapshots: Option<&watch::Sender<Payload>>,
    options: &StreamOptions,
) -> Result<StreamOutcome, EngineError>
where
    S: EventSource + ?Sized,
{
    let started = Instant::now();
    let ceiling = options.max_duration.map(|limit| started + limit);
    let mut last_change = started;
    let end = loop {
        if reducer.is_done() {
            break StreamEnd::Done;
        }
        let stall_at = options.stall_timeout.map(|limit| last_change + limit);
        let wake_at = match (stall_at, ceiling) {
            (Some(stall_at), Some(ceiling)) => Some(stall_at.min(ceiling)),
            (stall_at, ceiling) => stall_at.or(ceiling),
        };
        let next = tokio::select! {
            biased;
            _ = wait_for_cancellation(cancel_rx) => return Err(EngineError::Cancelled),
            next = next_before(source, wake_at) => next,
        };
        let event = match next {
            Some(Some(event)) => event,
            Some(None) => break StreamEnd::Closed,
            None if ceiling.is_some_and(|ceiling| Instant::now() >= ceiling) => {
                tracing::warn!(
                    session = reducer.session_id(),
                    "event stream ran past its ceiling; handing off"
                );
                break StreamEnd::Expired;
            }
            None => {
                tracing::warn!(
                    session = reducer.session_id(),
                    "event stream stalled; handing off"
                );
                break StreamEnd::Stalled;
            }
        };

        let updates = reducer.apply(&event);
        if updates.is_empty() {
            continue;
        }
        last_change = Instant::now();
        if let Some(snapshots) = snapshots {
            snapshots.send_replace(reducer.snapshot());
        }
        if let Some(sink) = sink {
            for update in updates {
                let _ = sink.send(update);
            }
        }
    };

    tracing::debug!(session = reducer.session_id(), ?end, "stream consumer finished");
    Ok(StreamOutcome {
        payload: reducer.snapshot(),
        end,
        completed: reducer.is_completed(),
        message_created_ms: reducer.message_created_ms(),
    })
}

/// `None` when `deadline` passed first.
async fn next_before<S>(source: &mut S, deadline: Option<Instant>) -> Option<Option<StreamEvent>>
where
    S: EventSource + ?Sized,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, source.next_event()).await.ok(),
        None => Some(source.next_event().await),
    }
}
