//! Loop events streamed to the caller while a request runs.
//!
//! - `progress`: advisory status (model call starting, tool dispatch)
//! - `warning`: a recoverable condition the loop handled itself
//! - `answer`: the terminal answer text (markdown)
//! - `failure`: the terminal structured failure
//!
//! Every request ends with exactly one `answer` or `failure`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// Informational progress.
    Progress { message: String },

    /// Non-fatal condition, e.g. a malformed reply that will be retried.
    Warning { message: String },

    /// The final answer.
    Answer { content: String },

    /// The request failed.
    Failure { message: String },
}

impl LoopEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Warning { .. } => "warning",
            Self::Answer { .. } => "answer",
            Self::Failure { .. } => "failure",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Answer { .. } | Self::Failure { .. })
    }
}
