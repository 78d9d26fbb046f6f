//! Structured error events and the generic cause-chain error type.
//!
//! `LadderError` is the crate's catch-all for wrapping opaque downstream
//! errors (`reqwest::Error`, `std::io::Error`, `serde_json::Error`, and
//! `sqlx::Error` where the `sql` store backend is compiled in) without
//! flattening them to a string — every wrap keeps a `cause` link so the
//! full chain survives to the event bus and to `ExecutionError::details`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{FormatterMode, PlainFormatter, TelemetryFormatter};

/// An error event scoped to where in a mission run it happened, carrying
/// the causal chain plus free-form tags/context for the event bus and
/// `ExecutionResult::errors` (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorEvent {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: LadderError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    #[must_use]
    pub fn step<S: Into<String>>(action: S, step: usize, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Step {
                action: action.into(),
                step,
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn action<S: Into<String>>(action: S, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Action {
                action: action.into(),
            },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn stage(stage_index: usize, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Stage { stage_index },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn mission(error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Mission,
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    Step { action: String, step: usize },
    Action { action: String },
    Stage { stage_index: usize },
    #[default]
    Mission,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LadderError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<LadderError>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for LadderError {
    fn default() -> Self {
        LadderError {
            message: String::new(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for LadderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LadderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl LadderError {
    #[must_use]
    pub fn msg<M: Into<String>>(m: M) -> Self {
        LadderError {
            message: m.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    /// Wrap any standard error, preserving its `Display` text as the cause.
    #[must_use]
    pub fn wrap<M: Into<String>>(m: M, source: &(dyn std::error::Error + 'static)) -> Self {
        LadderError::msg(m).with_cause(LadderError::msg(source.to_string()))
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl From<reqwest::Error> for LadderError {
    fn from(e: reqwest::Error) -> Self {
        LadderError::msg(format!("http transport error: {e}"))
    }
}

impl From<serde_json::Error> for LadderError {
    fn from(e: serde_json::Error) -> Self {
        LadderError::msg(format!("json error: {e}"))
    }
}

impl From<std::io::Error> for LadderError {
    fn from(e: std::io::Error) -> Self {
        LadderError::msg(format!("io error: {e}"))
    }
}

/// Format error events with explicit color mode control.
pub fn pretty_print_with_mode(events: &[ErrorEvent], mode: FormatterMode) -> String {
    let formatter = PlainFormatter::with_mode(mode);
    let renders = formatter.render_errors(events);
    let mut out = String::new();
    for (idx, render) in renders.into_iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        for line in render.lines {
            out.push_str(&line);
        }
    }
    out
}

/// Format error events as human-readable text, auto-detecting color support.
#[must_use]
pub fn pretty_print(events: &[ErrorEvent]) -> String {
    pretty_print_with_mode(events, FormatterMode::Auto)
}
