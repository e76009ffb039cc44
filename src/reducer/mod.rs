//! Streaming event reducer for one in-flight turn.
//!
//! The reducer is a plain state machine: it owns every per-part accumulator
//! for the turn, never touches the network, and reports what changed as a
//! list of [`TurnUpdate`]s. `collecting → done` is the only transition and
//! `done` is sticky. [`stream::consume_stream`] drives it from an
//! [`EventSource`].

mod events;
mod stream;

pub use events::StreamEvent;
pub use stream::{consume_stream, EventSource, StreamEnd, StreamOptions, StreamOutcome};

use crate::merge::{merge_blocks, merge_text};
use crate::parts::{
    block_from_part, compose_meta, format_message_error, is_hidden_text_part, join_fragments,
    part_id, part_message_id, part_type,
};
use crate::signal::{classify_status, message_is_completed, StatusClass};
use crate::types::{message_created_ms, Block, Payload};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Assistant messages created this long before the turn start still count.
pub const CLOCK_SKEW_ALLOWANCE_MS: u64 = 2_000;

/// Parts held back while their message descriptor has not arrived yet.
const MAX_DEFERRED_EVENTS: usize = 256;

/// Change notification produced by [`TurnReducer::apply`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnUpdate {
    /// Joined answer text changed. `delta` is set when the new text extends
    /// the previous one; `None` means the text was rewritten.
    Token { text: String, delta: Option<String> },
    Reasoning { text: String },
    Blocks { blocks: Vec<Block> },
    PermissionRequest { id: String, request: Value },
    QuestionRequest { id: String, request: Value },
    QuestionResolved { id: String },
    Toast { payload: Value },
    PromptAppend { text: String },
}

/// Where a part-scoped event goes relative to the tracked message.
enum Route {
    Apply,
    Defer,
    Drop,
}

#[derive(Debug)]
pub struct TurnReducer {
    session_id: String,
    started_at_ms: u64,

    message_id: Option<String>,
    message_created_ms: u64,
    /// User, stale and superseded message ids whose parts are discarded.
    foreign_messages: HashSet<String>,

    // Keyed by part id; remote part ids sort in creation order.
    text_parts: BTreeMap<String, String>,
    reasoning_parts: BTreeMap<String, String>,
    block_parts: BTreeMap<String, Value>,
    /// Last bare delta appended per part, for redelivery detection.
    last_deltas: HashMap<String, String>,
    loose_blocks: Vec<Block>,
    deferred: Vec<StreamEvent>,

    text: String,
    reasoning: String,
    blocks: Vec<Block>,
    meta: String,
    message_error: Option<String>,

    completed: bool,
    idle_observed: bool,
    done: bool,

    seen_permissions: HashSet<String>,
    seen_questions: HashSet<String>,
    pending_questions: BTreeSet<String>,
}

impl TurnReducer {
    pub fn new(session_id: impl Into<String>, started_at_ms: u64) -> Self {
        Self {
            session_id: session_id.into(),
            started_at_ms,
            message_id: None,
            message_created_ms: 0,
            foreign_messages: HashSet::new(),
            text_parts: BTreeMap::new(),
            reasoning_parts: BTreeMap::new(),
            block_parts: BTreeMap::new(),
            last_deltas: HashMap::new(),
            loose_blocks: Vec::new(),
            deferred: Vec::new(),
            text: String::new(),
            reasoning: String::new(),
            blocks: Vec::new(),
            meta: String::new(),
            message_error: None,
            completed: false,
            idle_observed: false,
            done: false,
            seen_permissions: HashSet::new(),
            seen_questions: HashSet::new(),
            pending_questions: BTreeSet::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Assistant message currently tracked for this turn.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Creation time of the tracked message, when the server reported one.
    pub fn message_created_ms(&self) -> Option<u64> {
        self.message_id
            .as_ref()
            .map(|_| self.message_created_ms)
            .filter(|created| *created > 0)
    }

    /// "Stop listening": completion confirmed, empty idle, or session error.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// A message-level completion signal was observed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn has_pending_questions(&self) -> bool {
        !self.pending_questions.is_empty()
    }

    /// Current view of the turn. Non-destructive.
    pub fn snapshot(&self) -> Payload {
        Payload {
            message_id: self.message_id.clone(),
            text: self.text.clone(),
            reasoning: self.reasoning.clone(),
            meta: self.meta.clone(),
            blocks: self.blocks.clone(),
            completed: self.completed,
        }
    }

    /// Fold one event into the turn; returns what changed.
    pub fn apply(&mut self, event: &StreamEvent) -> Vec<TurnUpdate> {
        let mut updates = Vec::new();
        if let Some(session_id) = event.session_id() {
            if session_id != self.session_id {
                return updates;
            }
        }

        match event {
            StreamEvent::MessageUpdated { info, .. } => self.on_message(info, &mut updates),
            StreamEvent::PartUpdated { part, delta, .. } => {
                match self.route(part_message_id(part)) {
                    Route::Apply => self.on_part(part, delta.as_deref(), &mut updates),
                    Route::Defer => self.defer(event),
                    Route::Drop => {}
                }
            }
            StreamEvent::PartDelta {
                message_id,
                part_id,
                field,
                delta,
                ..
            } => match self.route(Some(message_id.as_str())) {
                Route::Apply => self.on_part_delta(part_id, field, delta, &mut updates),
                Route::Defer => self.defer(event),
                Route::Drop => {}
            },
            StreamEvent::PartRemoved {
                message_id,
                part_id,
                ..
            } => match self.route(Some(message_id.as_str())) {
                Route::Apply => self.on_part_removed(part_id, &mut updates),
                Route::Defer => self.defer(event),
                Route::Drop => {}
            },
            StreamEvent::PermissionAsked { id, request, .. } => {
                if self.seen_permissions.insert(id.clone()) {
                    updates.push(TurnUpdate::PermissionRequest {
                        id: id.clone(),
                        request: request.clone(),
                    });
                }
            }
            StreamEvent::QuestionAsked { id, request, .. } => {
                if self.seen_questions.insert(id.clone()) {
                    self.pending_questions.insert(id.clone());
                    updates.push(TurnUpdate::QuestionRequest {
                        id: id.clone(),
                        request: request.clone(),
                    });
                }
            }
            StreamEvent::QuestionResolved { id, .. } => {
                if self.pending_questions.remove(id) {
                    updates.push(TurnUpdate::QuestionResolved { id: id.clone() });
                }
            }
            StreamEvent::Toast { payload } => updates.push(TurnUpdate::Toast {
                payload: payload.clone(),
            }),
            StreamEvent::PromptAppend { text } => {
                updates.push(TurnUpdate::PromptAppend { text: text.clone() })
            }
            StreamEvent::SessionError { session_id, error } => {
                // An unscoped error may belong to any session.
                if session_id.is_some() {
                    self.on_session_error(error, &mut updates);
                }
            }
            StreamEvent::SessionIdle { .. } => self.on_idle(),
            StreamEvent::SessionStatus { status, .. } => match classify_status(status).class {
                StatusClass::Terminal => self.on_idle(),
                StatusClass::Active => self.idle_observed = false,
                StatusClass::Unknown => {}
            },
            StreamEvent::Other { .. } => {}
        }
        updates
    }

    fn route(&self, message_id: Option<&str>) -> Route {
        let Some(message_id) = message_id else {
            return Route::Apply;
        };
        if self.message_id.as_deref() == Some(message_id) {
            Route::Apply
        } else if self.foreign_messages.contains(message_id) {
            Route::Drop
        } else {
            Route::Defer
        }
    }

    fn defer(&mut self, event: &StreamEvent) {
        if self.deferred.len() >= MAX_DEFERRED_EVENTS {
            tracing::debug!(session = %self.session_id, "deferred part buffer full; dropping oldest");
            self.deferred.remove(0);
        }
        self.deferred.push(event.clone());
    }

    fn on_message(&mut self, info: &Value, updates: &mut Vec<TurnUpdate>) {
        let Some(id) = info
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            return;
        };
        if info.get("role").and_then(Value::as_str) != Some("assistant") {
            self.forget_message(id);
            return;
        }
        let created = message_created_ms(info);
        if created > 0 && created + CLOCK_SKEW_ALLOWANCE_MS < self.started_at_ms {
            tracing::debug!(message = id, created, "ignoring assistant message from before the turn");
            self.forget_message(id);
            return;
        }

        match self.message_id.clone() {
            Some(tracked) if tracked == id => {}
            Some(tracked) if created < self.message_created_ms => {
                tracing::debug!(message = id, tracked = %tracked, "ignoring older assistant message");
                self.forget_message(id);
                return;
            }
            Some(tracked) => {
                tracing::debug!(message = id, previous = %tracked, "assistant message superseded");
                self.foreign_messages.insert(tracked);
                self.reset_accumulators();
                self.adopt(id, created, updates);
            }
            None => self.adopt(id, created, updates),
        }

        self.message_error = info.get("error").and_then(format_message_error);
        if message_is_completed(info) && !self.completed {
            self.completed = true;
            if self.idle_observed && self.pending_questions.is_empty() {
                self.done = true;
            }
        }
        self.refresh(updates);
    }

    fn forget_message(&mut self, id: &str) {
        self.foreign_messages.insert(id.to_string());
        self.deferred.retain(|event| deferred_message_id(event) != Some(id));
    }

    fn adopt(&mut self, id: &str, created: u64, updates: &mut Vec<TurnUpdate>) {
        self.message_id = Some(id.to_string());
        self.message_created_ms = created;
        self.completed = false;
        let (ready, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|event| deferred_message_id(event) == Some(id));
        self.deferred = rest;
        for event in ready {
            match &event {
                StreamEvent::PartUpdated { part, delta, .. } => {
                    self.on_part(part, delta.as_deref(), updates)
                }
                StreamEvent::PartDelta {
                    part_id,
                    field,
                    delta,
                    ..
                } => self.on_part_delta(part_id, field, delta, updates),
                StreamEvent::PartRemoved { part_id, .. } => self.on_part_removed(part_id, updates),
                _ => {}
            }
        }
    }

    fn reset_accumulators(&mut self) {
        self.text_parts.clear();
        self.reasoning_parts.clear();
        self.block_parts.clear();
        self.last_deltas.clear();
        self.loose_blocks.clear();
        self.blocks.clear();
        self.message_error = None;
        self.idle_observed = false;
    }

    fn on_part(&mut self, part: &Value, delta: Option<&str>, updates: &mut Vec<TurnUpdate>) {
        let id = part_id(part).unwrap_or_default().to_string();
        match part_type(part) {
            "text" => {
                if is_hidden_text_part(part) {
                    return;
                }
                accumulate(&mut self.text_parts, &mut self.last_deltas, id, part, delta);
            }
            "reasoning" => {
                accumulate(&mut self.reasoning_parts, &mut self.last_deltas, id.clone(), part, delta);
                self.store_block_part(id, part);
            }
            _ => self.store_block_part(id, part),
        }
        self.refresh(updates);
    }

    fn store_block_part(&mut self, id: String, part: &Value) {
        if id.is_empty() {
            if let Some(block) = block_from_part(part) {
                self.loose_blocks = merge_blocks(&self.loose_blocks, &[block]);
            }
        } else if block_from_part(part).is_some() {
            self.block_parts.insert(id, part.clone());
        }
    }

    fn on_part_delta(
        &mut self,
        part_id: &str,
        field: &str,
        delta: &str,
        updates: &mut Vec<TurnUpdate>,
    ) {
        if field != "text" {
            return;
        }
        let text = match self.text_parts.get_mut(part_id) {
            Some(text) => text,
            None => match self.reasoning_parts.get_mut(part_id) {
                Some(text) => text,
                None => {
                    tracing::debug!(part = part_id, "delta for unknown part ignored");
                    return;
                }
            },
        };
        if append_delta(text, &mut self.last_deltas, part_id, delta) {
            self.refresh(updates);
        }
    }

    fn on_part_removed(&mut self, part_id: &str, updates: &mut Vec<TurnUpdate>) {
        // Reasoning and blocks stay visible until superseded.
        if self.text_parts.remove(part_id).is_some() {
            self.refresh(updates);
        }
    }

    fn on_session_error(&mut self, error: &Value, updates: &mut Vec<TurnUpdate>) {
        if let Some(message) = format_message_error(error) {
            self.message_error = Some(message);
            self.refresh(updates);
        }
        self.done = true;
    }

    fn on_idle(&mut self) {
        if self.done || !self.pending_questions.is_empty() {
            return;
        }
        let nothing_started = self.message_id.is_none() && !self.has_content();
        if self.completed || nothing_started {
            self.done = true;
        } else {
            self.idle_observed = true;
        }
    }

    fn has_content(&self) -> bool {
        !self.text.is_empty() || !self.reasoning.is_empty() || !self.blocks.is_empty()
    }

    /// Recompute derived views and push an update for each that changed.
    fn refresh(&mut self, updates: &mut Vec<TurnUpdate>) {
        let mut changed = false;

        let joined = join_fragments(self.text_parts.values().map(String::as_str));
        let text = match (&self.message_error, joined.trim().is_empty()) {
            (Some(error), true) => format!("Error: {error}"),
            _ => joined,
        };
        if text != self.text {
            let delta = text
                .strip_prefix(self.text.as_str())
                .filter(|_| !self.text.is_empty())
                .map(str::to_string);
            self.text = text;
            updates.push(TurnUpdate::Token {
                text: self.text.clone(),
                delta,
            });
            changed = true;
        }

        let reasoning = join_fragments(self.reasoning_parts.values().map(String::as_str));
        if reasoning != self.reasoning {
            self.reasoning = reasoning;
            updates.push(TurnUpdate::Reasoning {
                text: self.reasoning.clone(),
            });
            changed = true;
        }

        let derived: Vec<Block> = self
            .block_parts
            .values()
            .filter_map(block_from_part)
            .chain(self.loose_blocks.iter().cloned())
            .collect();
        let blocks = merge_blocks(&self.blocks, &derived);
        if blocks != self.blocks {
            self.blocks = blocks;
            updates.push(TurnUpdate::Blocks {
                blocks: self.blocks.clone(),
            });
            changed = true;
        }

        self.meta = compose_meta(self.message_error.as_deref(), &self.blocks);
        if changed {
            self.idle_observed = false;
        }
    }
}

/// Merge one text/reasoning part update into its accumulator.
///
/// A carried snapshot goes through the snapshot-safe merge; a bare delta is
/// appended unless it re-delivers the previous one.
fn accumulate(
    parts: &mut BTreeMap<String, String>,
    last_deltas: &mut HashMap<String, String>,
    id: String,
    part: &Value,
    delta: Option<&str>,
) {
    match (part.get("text").and_then(Value::as_str), delta) {
        (Some(snapshot), _) => {
            let existing = parts.entry(id).or_default();
            *existing = merge_text(existing, snapshot);
        }
        (None, Some(delta)) => {
            let existing = parts.entry(id.clone()).or_default();
            append_delta(existing, last_deltas, &id, delta);
        }
        (None, None) => {}
    }
}

/// Append `delta` to a part's text. A delta equal to the last one applied to
/// the same part, and already at the tail, is a redelivery and is skipped.
fn append_delta(
    text: &mut String,
    last_deltas: &mut HashMap<String, String>,
    part_id: &str,
    delta: &str,
) -> bool {
    if delta.is_empty() {
        return false;
    }
    let redelivered = last_deltas
        .get(part_id)
        .is_some_and(|previous| previous == delta && text.ends_with(delta));
    if redelivered {
        tracing::debug!(part = part_id, "skipping redelivered delta");
        return false;
    }
    text.push_str(delta);
    last_deltas.insert(part_id.to_string(), delta.to_string());
    true
}

fn deferred_message_id(event: &StreamEvent) -> Option<&str> {
    match event {
        StreamEvent::PartUpdated { part, .. } => part_message_id(part),
        StreamEvent::PartDelta { message_id, .. } | StreamEvent::PartRemoved { message_id, .. } => {
            Some(message_id.as_str())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::events;
    use crate::types::{BlockKind, BlockStatus};

    const SESSION: &str = "ses_1";
    const T: u64 = 1_700_000_000_000;

    fn reducer() -> TurnReducer {
        TurnReducer::new(SESSION, T)
    }

    #[test]
    fn idle_before_completion_is_not_done_until_confirmed() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "partial reply"));
        reducer.apply(&events::status(SESSION, serde_json::json!({"type": "idle"})));
        assert!(!reducer.is_done());
        assert_eq!(reducer.snapshot().text, "partial reply");

        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, Some(T + 50)));
        reducer.apply(&events::idle(SESSION));
        assert!(reducer.is_done());
        assert!(reducer.snapshot().completed);
    }

    #[test]
    fn completion_after_unconfirmed_idle_finishes_turn() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "answer"));
        reducer.apply(&events::idle(SESSION));
        assert!(!reducer.is_done());
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, Some(T + 10)));
        assert!(reducer.is_done());
    }

    #[test]
    fn new_content_or_active_status_cancels_pending_idle() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "one"));
        reducer.apply(&events::idle(SESSION));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "one two"));
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, Some(T + 10)));
        assert!(!reducer.is_done(), "idle was cancelled by new content");

        let mut reducer = TurnReducer::new(SESSION, T);
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "one"));
        reducer.apply(&events::idle(SESSION));
        reducer.apply(&events::status(SESSION, serde_json::json!({"type": "busy"})));
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, Some(T + 10)));
        assert!(!reducer.is_done(), "idle was cancelled by busy status");
    }

    #[test]
    fn empty_idle_is_trivially_done() {
        let mut reducer = reducer();
        reducer.apply(&events::idle(SESSION));
        assert!(reducer.is_done());
        assert!(!reducer.is_completed());
    }

    #[test]
    fn done_is_sticky() {
        let mut reducer = reducer();
        reducer.apply(&events::idle(SESSION));
        reducer.apply(&events::status(SESSION, serde_json::json!({"type": "busy"})));
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        assert!(reducer.is_done());
    }

    #[test]
    fn reasoning_snapshots_do_not_duplicate() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        for snapshot in [
            "I need to ",
            "I need to analyze the request.",
            "I need to analyze the request.\nThen implement the fix.",
        ] {
            reducer.apply(&events::reasoning_part(SESSION, "msg_1", "prt_r", snapshot));
        }
        assert_eq!(
            reducer.snapshot().reasoning,
            "I need to analyze the request.\nThen implement the fix."
        );
    }

    #[test]
    fn redelivered_part_updates_are_idempotent() {
        let sequence = [
            events::text_part(SESSION, "msg_1", "prt_1", "Hello"),
            events::text_part(SESSION, "msg_1", "prt_1", "Hello, wor"),
            events::text_part(SESSION, "msg_1", "prt_1", "Hello, world"),
            events::text_part(SESSION, "msg_1", "prt_2", "Second part"),
        ];
        let mut clean = reducer();
        clean.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        for event in &sequence {
            clean.apply(event);
        }

        let mut noisy = reducer();
        noisy.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        for event in &sequence {
            noisy.apply(event);
            noisy.apply(event);
        }
        noisy.apply(&sequence[1]);

        assert_eq!(noisy.snapshot().text, clean.snapshot().text);
        assert_eq!(clean.snapshot().text, "Hello, world\n\nSecond part");
    }

    #[test]
    fn emits_only_on_change() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        let first = reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "abc"));
        assert_eq!(
            first,
            vec![TurnUpdate::Token {
                text: "abc".into(),
                delta: None
            }]
        );
        let grown = reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "abcdef"));
        assert_eq!(
            grown,
            vec![TurnUpdate::Token {
                text: "abcdef".into(),
                delta: Some("def".into())
            }]
        );
        assert!(reducer
            .apply(&events::text_part(SESSION, "msg_1", "prt_1", "abcdef"))
            .is_empty());
    }

    #[test]
    fn raw_deltas_append_to_known_parts() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", ""));
        reducer.apply(&events::part_delta(SESSION, "msg_1", "prt_1", "Hel"));
        reducer.apply(&events::part_delta(SESSION, "msg_1", "prt_1", "lo"));
        assert_eq!(reducer.snapshot().text, "Hello");
        assert!(reducer
            .apply(&events::part_delta(SESSION, "msg_1", "prt_unknown", "x"))
            .is_empty());
    }

    #[test]
    fn tool_blocks_only_upgrade() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::tool_part(SESSION, "msg_1", "prt_t", "bash", "running"));
        reducer.apply(&events::tool_part(SESSION, "msg_1", "prt_t", "bash", "completed"));
        let stale = reducer.apply(&events::tool_part(SESSION, "msg_1", "prt_t", "bash", "running"));
        assert!(stale.is_empty());
        let blocks = reducer.snapshot().blocks;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Tool);
        assert_eq!(blocks[0].status, BlockStatus::Completed);
    }

    #[test]
    fn removal_drops_text_but_keeps_blocks() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "keep"));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_2", "drop me"));
        reducer.apply(&events::tool_part(SESSION, "msg_1", "prt_t", "bash", "completed"));

        reducer.apply(&events::part_removed(SESSION, "msg_1", "prt_2"));
        reducer.apply(&events::part_removed(SESSION, "msg_1", "prt_t"));
        let snapshot = reducer.snapshot();
        assert_eq!(snapshot.text, "keep");
        assert_eq!(snapshot.blocks.len(), 1);
    }

    #[test]
    fn newer_message_discards_previous_accumulators() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "calling tools"));
        reducer.apply(&events::assistant_message(SESSION, "msg_2", T + 100, None));
        reducer.apply(&events::text_part(SESSION, "msg_2", "prt_9", "final answer"));
        // Late part of the superseded message.
        reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", "calling tools again"));

        let snapshot = reducer.snapshot();
        assert_eq!(snapshot.message_id.as_deref(), Some("msg_2"));
        assert_eq!(snapshot.text, "final answer");
    }

    #[test]
    fn older_or_stale_messages_are_ignored() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_old", T - 60_000, Some(T - 59_000)));
        assert_eq!(reducer.message_id(), None);

        reducer.apply(&events::assistant_message(SESSION, "msg_2", T + 100, None));
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T + 10, None));
        assert_eq!(reducer.message_id(), Some("msg_2"));
    }

    #[test]
    fn parts_before_descriptor_replay_on_adoption() {
        let mut reducer = reducer();
        assert!(reducer
            .apply(&events::text_part(SESSION, "msg_1", "prt_1", "early"))
            .is_empty());
        let updates = reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        assert!(updates
            .iter()
            .any(|update| matches!(update, TurnUpdate::Token { text, .. } if text == "early")));
    }

    #[test]
    fn user_message_parts_are_dropped() {
        let mut reducer = reducer();
        reducer.apply(&events::text_part(SESSION, "msg_u", "prt_u", "the prompt"));
        reducer.apply(&events::user_message(SESSION, "msg_u", T));
        reducer.apply(&events::text_part(SESSION, "msg_u", "prt_u", "the prompt again"));
        reducer.apply(&events::assistant_message(SESSION, "msg_a", T + 5, None));
        assert_eq!(reducer.snapshot().text, "");
    }

    #[test]
    fn other_sessions_are_ignored() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message("ses_other", "msg_x", T, None));
        reducer.apply(&events::idle("ses_other"));
        assert_eq!(reducer.message_id(), None);
        assert!(!reducer.is_done());
    }

    #[test]
    fn message_error_surfaces_into_text_and_meta() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message_with_error(
            SESSION,
            "msg_1",
            T,
            serde_json::json!({"name": "APIError", "data": {"message": "overloaded"}}),
        ));
        let snapshot = reducer.snapshot();
        assert_eq!(snapshot.text, "Error: APIError: overloaded");
        assert_eq!(snapshot.meta, "APIError: overloaded");
    }

    #[test]
    fn session_error_finishes_immediately() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::session_error(Some(SESSION), "boom"));
        assert!(reducer.is_done());
        assert_eq!(reducer.snapshot().text, "Error: boom");

        let mut unscoped = TurnReducer::new(SESSION, T);
        unscoped.apply(&events::session_error(None, "elsewhere"));
        assert!(!unscoped.is_done());
    }

    #[test]
    fn side_channel_events_forward_once() {
        let mut reducer = reducer();
        let asked = events::permission(SESSION, "per_1");
        assert_eq!(reducer.apply(&asked).len(), 1);
        assert!(reducer.apply(&asked).is_empty());

        let question = events::question(SESSION, "que_1");
        assert_eq!(reducer.apply(&question).len(), 1);
        assert!(reducer.apply(&question).is_empty());
        assert!(reducer.has_pending_questions());

        let resolved = events::question_replied(SESSION, "que_1");
        assert_eq!(
            reducer.apply(&resolved),
            vec![TurnUpdate::QuestionResolved { id: "que_1".into() }]
        );
        assert!(reducer.apply(&resolved).is_empty());
    }

    #[test]
    fn pending_question_blocks_idle() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, Some(T + 5)));
        reducer.apply(&events::question(SESSION, "que_1"));
        reducer.apply(&events::idle(SESSION));
        assert!(!reducer.is_done());

        reducer.apply(&events::question_replied(SESSION, "que_1"));
        reducer.apply(&events::idle(SESSION));
        assert!(reducer.is_done());
    }

    #[test]
    fn redelivered_deltas_are_applied_once() {
        let feed = |reducer: &mut TurnReducer, deltas: &[&str]| {
            reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
            reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", ""));
            for delta in deltas {
                reducer.apply(&events::part_delta(SESSION, "msg_1", "prt_1", delta));
            }
        };
        let mut clean = reducer();
        feed(&mut clean, &["Hel", "lo"]);
        let mut noisy = reducer();
        feed(&mut noisy, &["Hel", "Hel", "lo", "lo"]);
        assert_eq!(clean.snapshot().text, "Hello");
        assert_eq!(noisy.snapshot().text, "Hello");

        let updates = noisy.apply(&events::part_delta(SESSION, "msg_1", "prt_1", "lo"));
        assert!(updates.is_empty());
        noisy.apply(&events::part_delta(SESSION, "msg_1", "prt_1", "!"));
        assert_eq!(noisy.snapshot().text, "Hello!");
    }

    #[test]
    fn redelivered_reasoning_deltas_are_applied_once() {
        let mut reducer = reducer();
        reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
        reducer.apply(&events::reasoning_part(SESSION, "msg_1", "prt_r", ""));
        for delta in ["Think", "Think", "ing", "ing"] {
            reducer.apply(&events::part_delta(SESSION, "msg_1", "prt_r", delta));
        }
        assert_eq!(reducer.snapshot().reasoning, "Thinking");
    }

    #[cfg(feature = "fuzz-tests")]
    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn duplicated_snapshot_deliveries_match_deduplicated(
                words in proptest::collection::vec("[a-z]{1,6}", 1..12),
                dupes in proptest::collection::vec(0usize..3, 12),
            ) {
                let mut snapshots = Vec::new();
                let mut acc = String::new();
                for word in &words {
                    if !acc.is_empty() {
                        acc.push(' ');
                    }
                    acc.push_str(word);
                    snapshots.push(acc.clone());
                }

                let mut clean = TurnReducer::new(SESSION, T);
                let mut noisy = TurnReducer::new(SESSION, T);
                let start = events::assistant_message(SESSION, "msg_1", T, None);
                clean.apply(&start);
                noisy.apply(&start);
                for (index, snapshot) in snapshots.iter().enumerate() {
                    let event = events::text_part(SESSION, "msg_1", "prt_1", snapshot);
                    clean.apply(&event);
                    for _ in 0..=dupes[index % dupes.len()] {
                        noisy.apply(&event);
                    }
                }
                prop_assert_eq!(noisy.snapshot().text, clean.snapshot().text);
            }

            #[test]
            fn duplicated_delta_deliveries_match_deduplicated(
                mut deltas in proptest::collection::vec("[a-z ]{1,5}", 1..16),
                dupes in proptest::collection::vec(0usize..3, 16),
            ) {
                deltas.dedup();
                let mut clean = TurnReducer::new(SESSION, T);
                let mut noisy = TurnReducer::new(SESSION, T);
                for reducer in [&mut clean, &mut noisy] {
                    reducer.apply(&events::assistant_message(SESSION, "msg_1", T, None));
                    reducer.apply(&events::text_part(SESSION, "msg_1", "prt_1", ""));
                }
                for (index, delta) in deltas.iter().enumerate() {
                    let event = events::part_delta(SESSION, "msg_1", "prt_1", delta);
                    clean.apply(&event);
                    for _ in 0..=dupes[index % dupes.len()] {
                        noisy.apply(&event);
                    }
                }
                prop_assert_eq!(noisy.snapshot().text, clean.snapshot().text);
                prop_assert_eq!(clean.snapshot().text, deltas.concat());
            }
        }
    }
}
