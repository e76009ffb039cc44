//! Payload merge and richness heuristics.
//!
//! Pure functions shared by the stream reducer and the poll finalizer. The
//! two units run independently and reconcile only through
//! [`choose_richer`], so it must be commutative and idempotent: the same
//! pair in either order, or the same payload twice, yields the same content.

mod blocks;
mod text;

pub use blocks::merge_blocks;
pub use text::{merge_text, MIN_SPLICE_OVERLAP};

use crate::textutil::{has_visible_text, visible_trim};
use crate::types::{BlockKind, BlockStatus, Payload};
use std::cmp::Ordering;

/// Step-finish reason that means "the model is about to call tools".
pub const TOOL_CALLS_REASON: &str = "tool-calls";

/// Prefix of the synthetic text substituted when a turn produced nothing.
pub const NO_RESPONSE_PREFIX: &str = "No response from assistant";

/// Text patterns known to be placeholders rather than real answers.
const PLACEHOLDER_PATTERNS: &[&str] = &[NO_RESPONSE_PREFIX, "(no content)", "(empty response)"];

const TERMINAL_BONUS: i64 = 500;
const IN_PROGRESS_PENALTY: i64 = 400;
const PLACEHOLDER_PENALTY: i64 = 1_000;

/// True when the payload has anything worth showing.
pub fn has_renderable(payload: &Payload) -> bool {
    has_visible_text(&payload.text)
        || has_visible_text(&payload.reasoning)
        || !payload.blocks.is_empty()
}

/// Structural signals that more content is still coming.
pub fn looks_in_progress(payload: &Payload) -> bool {
    let has_text = has_visible_text(&payload.text);
    let has_reasoning = has_visible_text(&payload.reasoning);

    let unfinished_tool = payload
        .blocks
        .iter()
        .any(|block| block.kind == BlockKind::Tool && !block.status.is_finished());
    if unfinished_tool {
        return true;
    }

    let started = payload
        .blocks
        .iter()
        .any(|block| block.kind == BlockKind::StepStart);
    if started && !has_text && !has_reasoning && !is_terminal(payload) {
        return true;
    }

    let tool_calls_finish = payload.blocks.iter().any(|block| {
        block.kind == BlockKind::StepFinish && block.summary.trim() == TOOL_CALLS_REASON
    });
    tool_calls_finish && !has_text
}

/// True when the last step-finish block carries a non-transient reason.
pub fn is_terminal(payload: &Payload) -> bool {
    payload
        .blocks
        .iter()
        .rev()
        .find(|block| block.kind == BlockKind::StepFinish)
        .is_some_and(|block| block.summary.trim() != TOOL_CALLS_REASON)
}

/// True when the payload text is a known fallback placeholder.
pub fn is_placeholder_text(text: &str) -> bool {
    let trimmed = visible_trim(text);
    PLACEHOLDER_PATTERNS
        .iter()
        .any(|pattern| trimmed.starts_with(pattern))
}

/// Weighted tiebreak score. Only meaningful relative to another payload.
pub fn richness_score(payload: &Payload) -> i64 {
    let text_len = visible_trim(&payload.text).chars().count() as i64;
    let reasoning_len = visible_trim(&payload.reasoning).chars().count() as i64;
    let mut score = text_len * 8
        + reasoning_len * 2
        + payload.blocks.len() as i64 * 40
        + payload.meta.chars().count() as i64;
    score += payload
        .blocks
        .iter()
        .filter(|block| block.status == BlockStatus::Completed)
        .count() as i64
        * 5;
    if is_terminal(payload) {
        score += TERMINAL_BONUS;
    }
    if looks_in_progress(payload) {
        score -= IN_PROGRESS_PENALTY;
    }
    if is_placeholder_text(&payload.text) {
        score -= PLACEHOLDER_PENALTY;
    }
    score
}

/// Pick the better of two candidate views of the same turn.
///
/// The winner's text is kept as-is; the loser's blocks are merged in and its
/// reasoning/meta fill gaps the winner leaves empty.
pub fn choose_richer(a: &Payload, b: &Payload) -> Payload {
    let (winner, loser) = match compare_payloads(a, b) {
        Ordering::Less => (b, a),
        _ => (a, b),
    };

    let mut merged = winner.clone();
    merged.blocks = merge_blocks(&winner.blocks, &loser.blocks);
    if !has_visible_text(&merged.reasoning) && has_visible_text(&loser.reasoning) {
        merged.reasoning = loser.reasoning.clone();
    }
    if merged.meta.trim().is_empty() && !loser.meta.trim().is_empty() {
        merged.meta = loser.meta.clone();
    }
    if merged.message_id.is_none() {
        merged.message_id = loser.message_id.clone();
    }
    let same_message = winner.message_id.is_none()
        || loser.message_id.is_none()
        || winner.message_id == loser.message_id;
    if same_message {
        merged.completed = winner.completed || loser.completed;
    }
    merged
}

/// Total order used by [`choose_richer`]; `Greater` means `a` wins.
fn compare_payloads(a: &Payload, b: &Payload) -> Ordering {
    is_terminal(a)
        .cmp(&is_terminal(b))
        .then_with(|| a.has_visible_text().cmp(&b.has_visible_text()))
        .then_with(|| richness_score(a).cmp(&richness_score(b)))
        .then_with(|| a.completed.cmp(&b.completed))
        .then_with(|| a.text.cmp(&b.text))
        .then_with(|| a.reasoning.cmp(&b.reasoning))
        .then_with(|| a.meta.cmp(&b.meta))
        .then_with(|| a.message_id.cmp(&b.message_id))
        .then_with(|| compare_block_lists(&a.blocks, &b.blocks))
}

fn compare_block_lists(a: &[crate::types::Block], b: &[crate::types::Block]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| {
        a.iter()
            .zip(b.iter())
            .map(|(left, right)| {
                left.id
                    .cmp(&right.id)
                    .then_with(|| blocks::compare_blocks(left, right))
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    })
}
