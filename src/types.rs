//! Turn payload data model.
//!
//! `Payload` is the single shape both the stream reducer and the poll
//! finalizer produce, so the merge heuristics can reconcile either side
//! without knowing where a candidate came from.

use crate::textutil::has_visible_text;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed category of a non-text fragment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    Tool,
    StepStart,
    StepFinish,
    Patch,
    File,
    Reasoning,
    Agent,
    Subtask,
    Snapshot,
    Retry,
}

impl BlockKind {
    /// Map a remote part `type` string onto a block kind.
    pub fn from_part_type(part_type: &str) -> Option<Self> {
        match part_type {
            "tool" => Some(Self::Tool),
            "step-start" => Some(Self::StepStart),
            "step-finish" => Some(Self::StepFinish),
            "patch" => Some(Self::Patch),
            "file" => Some(Self::File),
            "reasoning" => Some(Self::Reasoning),
            "agent" => Some(Self::Agent),
            "subtask" => Some(Self::Subtask),
            "snapshot" => Some(Self::Snapshot),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::StepStart => "step-start",
            Self::StepFinish => "step-finish",
            Self::Patch => "patch",
            Self::File => "file",
            Self::Reasoning => "reasoning",
            Self::Agent => "agent",
            Self::Subtask => "subtask",
            Self::Snapshot => "snapshot",
            Self::Retry => "retry",
        }
    }
}

/// Lifecycle status of a block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl BlockStatus {
    /// Upgrade order: a block may only move to a higher rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Error => 3,
        }
    }

    /// Parse a remote status token; unknown tokens map to `Pending`.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "running" | "in-progress" | "in_progress" | "busy" => Self::Running,
            "completed" | "complete" | "done" | "success" => Self::Completed,
            "error" | "failed" | "aborted" | "cancelled" | "canceled" => Self::Error,
            _ => Self::Pending,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// UI-facing normalized representation of a non-text part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub status: BlockStatus,
    pub title: String,
    pub summary: String,
    pub detail: String,
}

impl Block {
    /// Stable identity used for dedupe/upgrade.
    ///
    /// `position` is the block's index in the list it came from and only
    /// participates when the block has no explicit id.
    pub fn identity_key(&self, position: usize) -> String {
        if !self.id.trim().is_empty() {
            return format!("id:{}", self.id.trim());
        }
        format!(
            "fallback:{}|{}|{}|{}",
            self.kind.as_str(),
            self.title,
            self.summary,
            position
        )
    }
}

/// Reconstructed assistant turn content at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload {
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub text: String,
    pub reasoning: String,
    pub meta: String,
    pub blocks: Vec<Block>,
    pub completed: bool,
}

impl Payload {
    /// Error-shaped payload used for failures detected without any content.
    pub fn error(message: &str) -> Self {
        Self {
            text: format!("Error: {message}"),
            meta: message.to_string(),
            ..Self::default()
        }
    }

    pub fn has_visible_text(&self) -> bool {
        has_visible_text(&self.text)
    }
}

/// Message descriptor as returned by fetch-by-id / fetch-latest.
///
/// `info` and `parts` stay untyped: the remote shape varies across server
/// versions and only a handful of fields are ever read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageDescriptor {
    #[serde(default)]
    pub info: Value,
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl MessageDescriptor {
    pub fn id(&self) -> Option<&str> {
        self.info
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn role(&self) -> Option<&str> {
        self.info.get("role").and_then(Value::as_str)
    }

    pub fn is_assistant(&self) -> bool {
        self.role() == Some("assistant")
    }

    /// Creation time in unix milliseconds, 0 when absent.
    pub fn created_ms(&self) -> u64 {
        message_created_ms(&self.info)
    }
}

/// Creation time of a message `info` object in unix milliseconds.
pub fn message_created_ms(info: &Value) -> u64 {
    info.get("time")
        .and_then(|time| time.get("created"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
