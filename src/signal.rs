//! Completion signal interpretation.
//!
//! The server reports session status in several shapes: a bare string, an
//! object with `type`/`status`/`state`, or one of those nested one level
//! deeper. Everything funnels through [`classify_status`] so call sites never
//! sniff fields on their own.
//!
//! Keyword matching over free-text hints is best-effort. The remote
//! vocabulary is not versioned and can drift; an unrecognized shape must
//! classify as `Unknown`, never as `Terminal`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const ACTIVE_TOKENS: &[&str] = &[
    "busy",
    "retry",
    "retrying",
    "running",
    "queued",
    "in-progress",
    "processing",
];

const TERMINAL_TOKENS: &[&str] = &[
    "idle",
    "done",
    "completed",
    "complete",
    "failed",
    "error",
    "aborted",
    "cancelled",
    "canceled",
    "timeout",
    "stopped",
];

const STRUCTURED_FIELDS: &[&str] = &["type", "status", "state"];
const HINT_FIELDS: &[&str] = &["message", "error", "reason"];

const AUTH_FAILURE_PATTERNS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "unauthorised",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "incorrect api key",
    "authentication failed",
    "authentication_error",
    "not authenticated",
    "providerautherror",
];

/// Tri-state classification of a remote status value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Active,
    Terminal,
    #[default]
    Unknown,
}

/// Normalized session status plus the free-text hint it was derived from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub class: StatusClass,
    /// Structured token (when present) followed by any message text.
    pub hint: String,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        self.class == StatusClass::Terminal
    }

    pub fn is_active(&self) -> bool {
        self.class == StatusClass::Active
    }

    /// Short human label used in "no response" diagnostics.
    pub fn label(&self) -> String {
        let class = match self.class {
            StatusClass::Active => "active",
            StatusClass::Terminal => "terminal",
            StatusClass::Unknown => "unknown",
        };
        if self.hint.is_empty() {
            class.to_string()
        } else {
            format!("{class}: {}", self.hint)
        }
    }
}

/// Classify an arbitrary status-shaped value.
pub fn classify_status(value: &Value) -> SessionStatus {
    if let Some(token) = value.as_str() {
        return SessionStatus {
            class: classify_token(token)
                .or_else(|| classify_hint(token))
                .unwrap_or_default(),
            hint: token.trim().to_string(),
        };
    }

    let structured = structured_token(value);
    let message = hint_text(value);
    let hint = match (&structured, message.is_empty()) {
        (Some(token), true) => token.clone(),
        (Some(token), false) => format!("{token}: {message}"),
        (None, _) => message.clone(),
    };

    let class = structured
        .as_deref()
        .and_then(classify_token)
        .or_else(|| classify_hint(&message))
        .unwrap_or_default();
    SessionStatus { class, hint }
}

/// True when an assistant message descriptor reports completion.
///
/// Requires an explicit signal: a `time.completed` timestamp greater than 0
/// or a non-empty `finish` reason. Non-assistant roles never complete here.
pub fn message_is_completed(info: &Value) -> bool {
    if info.get("role").and_then(Value::as_str) != Some("assistant") {
        return false;
    }
    let completed_at = info
        .get("time")
        .and_then(|time| time.get("completed"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if completed_at > 0.0 {
        return true;
    }
    ["finish", "finishReason", "finish_reason"]
        .iter()
        .filter_map(|key| info.get(*key).and_then(Value::as_str))
        .any(|reason| !reason.trim().is_empty())
}

/// True when a status hint looks like an authentication/authorization failure.
pub fn is_auth_failure_hint(hint: &str) -> bool {
    let lowered = hint.to_ascii_lowercase();
    AUTH_FAILURE_PATTERNS
        .iter()
        .any(|pattern| contains_pattern(&lowered, pattern))
}

/// Numeric patterns must not match inside longer numbers (`14011`).
fn contains_pattern(haystack: &str, pattern: &str) -> bool {
    if !pattern.bytes().all(|b| b.is_ascii_digit()) {
        return haystack.contains(pattern);
    }
    haystack.match_indices(pattern).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + pattern.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
    })
}

fn structured_token(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    for field in STRUCTURED_FIELDS {
        match object.get(*field) {
            Some(Value::String(token)) if !token.trim().is_empty() => {
                return Some(token.trim().to_string());
            }
            Some(nested @ Value::Object(_)) => {
                let inner = STRUCTURED_FIELDS.iter().find_map(|inner| {
                    nested
                        .get(*inner)
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|token| !token.is_empty())
                });
                if let Some(token) = inner {
                    return Some(token.to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn hint_text(value: &Value) -> String {
    let mut fragments = Vec::<String>::new();
    collect_hint_fragments(value, &mut fragments);
    for field in STRUCTURED_FIELDS {
        if let Some(nested @ Value::Object(_)) = value.get(*field) {
            collect_hint_fragments(nested, &mut fragments);
        }
    }
    fragments.dedup();
    fragments.join(" ")
}

fn collect_hint_fragments(value: &Value, fragments: &mut Vec<String>) {
    for field in HINT_FIELDS {
        match value.get(*field) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                fragments.push(text.trim().to_string());
            }
            Some(Value::Object(inner)) => {
                let nested = inner
                    .get("message")
                    .or_else(|| inner.get("data").and_then(|data| data.get("message")))
                    .and_then(Value::as_str);
                if let Some(text) = nested.filter(|text| !text.trim().is_empty()) {
                    fragments.push(text.trim().to_string());
                }
            }
            _ => {}
        }
    }
}

fn normalize_token(token: &str) -> String {
    token
        .trim()
        .to_ascii_lowercase()
        .replace(['_', ' '], "-")
}

fn classify_token(token: &str) -> Option<StatusClass> {
    let normalized = normalize_token(token);
    if ACTIVE_TOKENS.contains(&normalized.as_str()) {
        Some(StatusClass::Active)
    } else if TERMINAL_TOKENS.contains(&normalized.as_str()) {
        Some(StatusClass::Terminal)
    } else {
        None
    }
}

fn classify_hint(hint: &str) -> Option<StatusClass> {
    let lowered = hint.to_ascii_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '-')
        .filter(|word| !word.is_empty())
        .collect();
    let in_progress = words
        .windows(2)
        .any(|pair| pair[0] == "in" && pair[1] == "progress");
    if in_progress || words.iter().any(|word| ACTIVE_TOKENS.contains(word)) {
        return Some(StatusClass::Active);
    }
    if words.iter().any(|word| TERMINAL_TOKENS.contains(word)) {
        return Some(StatusClass::Terminal);
    }
    None
}
