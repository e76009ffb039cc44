//! Error taxonomy for turn tracking.
//!
//! Transport failures are transient inside the poll loop and never abort a
//! turn on their own; only cancellation, configuration problems, and the
//! "no response at all" condition reach callers as `EngineError`.

use std::fmt;

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors from the HTTP query/event layer.
#[derive(Debug)]
pub enum ApiError {
    /// Network / reqwest-level error.
    Http(reqwest::Error),
    /// Non-2xx status from the server.
    Status { code: u16, body: String },
    /// Body parsed but did not have the expected shape.
    InvalidResponse(String),
}

impl ApiError {
    /// Build a status error, trimming oversized bodies.
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::Status {
            code,
            body: crate::textutil::truncate_with_suffix_by_chars(body.trim(), 400, "..."),
        }
    }

    /// HTTP status code when this error came from a non-2xx response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "http: {e}"),
            Self::Status { code, body } if body.is_empty() => write!(f, "status {code}"),
            Self::Status { code, body } => write!(f, "status {code}: {body}"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

// ---------------------------------------------------------------------------
// EngineError — top-level
// ---------------------------------------------------------------------------

/// Terminal failure of one turn.
#[derive(Debug)]
pub enum EngineError {
    /// The caller fired the cancellation signal. No partial payload is
    /// promoted to a result.
    Cancelled,
    /// Every budget ran out (or the session went terminal) without any
    /// renderable content. Carries the last classified status hint.
    NoResponse { last_status: String },
    Config(ConfigError),
    Api(ApiError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "turn cancelled"),
            Self::NoResponse { last_status } if last_status.is_empty() => {
                write!(f, "no response from assistant")
            }
            Self::NoResponse { last_status } => {
                write!(f, "no response from assistant (last status: {last_status})")
            }
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Api(e) => write!(f, "api: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ApiError> for EngineError {
    fn from(e: ApiError) -> Self {
        Self::Api(e)
    }
}
