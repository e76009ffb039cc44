//! Raw part and message-descriptor normalization.
//!
//! Both the stream reducer and the poll finalizer see the same remote part
//! objects; this module turns them into `Block`s and `Payload`s so the two
//! sides agree on identity and status.

use crate::signal::message_is_completed;
use crate::textutil::{first_line_preview, truncate_with_suffix_by_chars};
use crate::types::{Block, BlockKind, BlockStatus, MessageDescriptor, Payload};
use serde_json::Value;

const SUMMARY_MAX_CHARS: usize = 120;
const DETAIL_MAX_CHARS: usize = 4_000;
/// Joiner between separate text parts of one message.
pub const PART_SEPARATOR: &str = "\n\n";

/// Part id, when present and non-empty.
pub fn part_id(part: &Value) -> Option<&str> {
    part.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Owning message id of a part.
pub fn part_message_id(part: &Value) -> Option<&str> {
    part.get("messageID")
        .or_else(|| part.get("messageId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

pub fn part_type(part: &Value) -> &str {
    part.get("type").and_then(Value::as_str).unwrap_or_default()
}

/// Text parts flagged as synthetic or ignored are prompt plumbing, not output.
pub fn is_hidden_text_part(part: &Value) -> bool {
    ["synthetic", "ignored"]
        .iter()
        .any(|flag| part.get(*flag).and_then(Value::as_bool) == Some(true))
}

pub fn part_text(part: &Value) -> Option<&str> {
    part.get("text").and_then(Value::as_str)
}

/// Join non-empty fragments in order.
pub fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    fragments
        .into_iter()
        .filter(|fragment| !fragment.trim().is_empty())
        .collect::<Vec<_>>()
        .join(PART_SEPARATOR)
}

/// Build the UI block for a non-text part. Text parts yield `None`.
pub fn block_from_part(part: &Value) -> Option<Block> {
    let kind = BlockKind::from_part_type(part_type(part))?;
    let id = part_id(part).unwrap_or_default().to_string();
    let block = match kind {
        BlockKind::Tool => tool_block(id, part),
        BlockKind::StepStart => Block {
            id,
            kind,
            status: BlockStatus::Completed,
            title: "Step started".to_string(),
            summary: String::new(),
            detail: str_field(part, "snapshot").to_string(),
        },
        BlockKind::StepFinish => Block {
            id,
            kind,
            status: BlockStatus::Completed,
            title: "Step finished".to_string(),
            summary: str_field(part, "reason").to_string(),
            detail: token_usage_line(part),
        },
        BlockKind::Patch => {
            let files: Vec<&str> = part
                .get("files")
                .and_then(Value::as_array)
                .map(|files| files.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            Block {
                id,
                kind,
                status: BlockStatus::Completed,
                title: format!("Patch ({} files)", files.len()),
                summary: truncate_with_suffix_by_chars(
                    &files.join(", "),
                    SUMMARY_MAX_CHARS,
                    "…",
                ),
                detail: str_field(part, "hash").to_string(),
            }
        }
        BlockKind::File => Block {
            id,
            kind,
            status: BlockStatus::Completed,
            title: non_empty_or(str_field(part, "filename"), "File"),
            summary: str_field(part, "mime").to_string(),
            detail: str_field(part, "url").to_string(),
        },
        BlockKind::Reasoning => {
            let finished = part
                .get("time")
                .and_then(|time| time.get("end"))
                .and_then(Value::as_u64)
                .is_some_and(|end| end > 0);
            Block {
                id,
                kind,
                status: if finished {
                    BlockStatus::Completed
                } else {
                    BlockStatus::Running
                },
                title: "Thinking".to_string(),
                summary: first_line_preview(
                    part_text(part).unwrap_or_default(),
                    SUMMARY_MAX_CHARS,
                ),
                detail: String::new(),
            }
        }
        BlockKind::Agent => Block {
            id,
            kind,
            status: BlockStatus::Completed,
            title: non_empty_or(str_field(part, "name"), "Agent"),
            summary: String::new(),
            detail: String::new(),
        },
        BlockKind::Subtask => Block {
            id,
            kind,
            status: part_status(part).unwrap_or(BlockStatus::Running),
            title: non_empty_or(str_field(part, "description"), "Subtask"),
            summary: str_field(part, "agent").to_string(),
            detail: truncate_with_suffix_by_chars(
                str_field(part, "prompt"),
                DETAIL_MAX_CHARS,
                "…",
            ),
        },
        BlockKind::Snapshot => Block {
            id,
            kind,
            status: BlockStatus::Completed,
            title: "Snapshot".to_string(),
            summary: String::new(),
            detail: str_field(part, "snapshot").to_string(),
        },
        BlockKind::Retry => {
            let attempt = part.get("attempt").and_then(Value::as_u64).unwrap_or(0);
            Block {
                id,
                kind,
                status: BlockStatus::Error,
                title: format!("Retry #{attempt}"),
                summary: String::new(),
                detail: part
                    .get("error")
                    .and_then(format_message_error)
                    .unwrap_or_default(),
            }
        }
    };
    Some(block)
}

fn tool_block(id: String, part: &Value) -> Block {
    let tool = non_empty_or(str_field(part, "tool"), "tool");
    let state = part.get("state").cloned().unwrap_or(Value::Null);
    let status = part_status(part).unwrap_or(BlockStatus::Pending);
    let title = non_empty_or(str_field(&state, "title"), &tool);
    let input = state
        .get("input")
        .filter(|input| {
            !input.is_null() && input.as_object().is_none_or(|map| !map.is_empty())
        })
        .map(compact_json)
        .unwrap_or_default();
    let detail = if status == BlockStatus::Error {
        let error = state.get("error").or_else(|| part.get("error"));
        error
            .and_then(|error| match error {
                Value::String(text) => Some(text.clone()),
                other => format_message_error(other),
            })
            .unwrap_or_default()
    } else {
        str_field(&state, "output").to_string()
    };
    let summary = format!("{tool} {input}");
    Block {
        id,
        kind: BlockKind::Tool,
        status,
        title,
        summary: truncate_with_suffix_by_chars(summary.trim(), SUMMARY_MAX_CHARS, "…"),
        detail: truncate_with_suffix_by_chars(&detail, DETAIL_MAX_CHARS, "…"),
    }
}

/// Status from `state` (a token or `{status}`), else a top-level `status`.
fn part_status(part: &Value) -> Option<BlockStatus> {
    let token = match part.get("state") {
        Some(Value::String(token)) => Some(token.as_str()),
        Some(state @ Value::Object(_)) => state.get("status").and_then(Value::as_str),
        _ => None,
    }
    .or_else(|| part.get("status").and_then(Value::as_str))?;
    Some(BlockStatus::from_token(token))
}

fn token_usage_line(part: &Value) -> String {
    let Some(tokens) = part.get("tokens") else {
        return String::new();
    };
    let read = |key: &str| tokens.get(key).and_then(Value::as_u64).unwrap_or(0);
    format!(
        "tokens in={} out={} reasoning={}",
        read("input"),
        read("output"),
        read("reasoning")
    )
}

fn compact_json(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

/// Render a remote error object (`{name, data: {message}}`, `{message}`, or a
/// string) as one line.
pub fn format_message_error(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Object(_) => {
            let name = str_field(error, "name").trim();
            let message = error
                .get("data")
                .and_then(|data| data.get("message"))
                .or_else(|| error.get("message"))
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            match (name.is_empty(), message.is_empty()) {
                (true, true) => Some(error.to_string()),
                (false, true) => Some(name.to_string()),
                (true, false) => Some(message.to_string()),
                (false, false) => Some(format!("{name}: {message}")),
            }
        }
        other => Some(other.to_string()),
    }
}

/// Compose the diagnostic `meta` line from a message-level error plus any
/// retry blocks.
pub fn compose_meta(message_error: Option<&str>, blocks: &[Block]) -> String {
    let mut lines = Vec::<String>::new();
    if let Some(error) = message_error.filter(|error| !error.trim().is_empty()) {
        lines.push(error.trim().to_string());
    }
    for block in blocks.iter().filter(|block| block.kind == BlockKind::Retry) {
        let line = if block.detail.is_empty() {
            block.title.clone()
        } else {
            format!("{}: {}", block.title, block.detail)
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Build a payload from a fetched message descriptor.
///
/// Returns `None` for non-assistant messages.
pub fn payload_from_descriptor(descriptor: &MessageDescriptor) -> Option<Payload> {
    if !descriptor.is_assistant() {
        return None;
    }
    let visible_text = descriptor
        .parts
        .iter()
        .filter(|part| part_type(part) == "text" && !is_hidden_text_part(part))
        .filter_map(part_text);
    let text = join_fragments(visible_text);
    let reasoning = join_fragments(
        descriptor
            .parts
            .iter()
            .filter(|part| part_type(part) == "reasoning")
            .filter_map(part_text),
    );
    let blocks: Vec<Block> = descriptor.parts.iter().filter_map(block_from_part).collect();
    let error = descriptor.info.get("error").and_then(format_message_error);
    let meta = compose_meta(error.as_deref(), &blocks);
    let text = match (text.trim().is_empty(), &error) {
        (true, Some(error)) => format!("Error: {error}"),
        _ => text,
    };
    Some(Payload {
        message_id: descriptor.id().map(str::to_string),
        text,
        reasoning,
        meta,
        blocks,
        completed: message_is_completed(&descriptor.info),
    })
}
