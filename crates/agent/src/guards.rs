//! Guard policies that keep the loop from degenerating.
//!
//! - [`RepeatGuard`]: blocks the third and later consecutive identical tool call.
//! - [`ParseFailureGuard`]: gives up after two consecutive unparsable replies.
//! - [`RefusalGuard`]: one corrective retry when the model claims it lacks a
//!   capability it actually has.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Verdict of the repeat guard for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCheck {
    Allowed,
    /// Same call as the previous `consecutive - 1` calls
    Blocked { consecutive: u32 },
}

/// Tracks consecutive identical tool calls.
///
/// Only the immediately preceding signature is remembered, so alternating
/// calls (A, B, A, B, ...) never trip the guard.
#[derive(Debug, Default)]
pub struct RepeatGuard {
    previous_signature: Option<String>,
    repeated_count: u32,
}

impl RepeatGuard {
    /// Calls beyond this many identical ones in a row are blocked.
    pub const MAX_CONSECUTIVE: u32 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool call and decide whether it may run.
    pub fn check(&mut self, signature: &str) -> RepeatCheck {
        if self.previous_signature.as_deref() == Some(signature) {
            self.repeated_count += 1;
        } else {
            self.previous_signature = Some(signature.to_string());
            self.repeated_count = 1;
        }

        if self.repeated_count > Self::MAX_CONSECUTIVE {
            RepeatCheck::Blocked {
                consecutive: self.repeated_count,
            }
        } else {
            RepeatCheck::Allowed
        }
    }

    pub fn repeated_count(&self) -> u32 {
        self.repeated_count
    }
}

/// Counts consecutive unparsable model replies.
#[derive(Debug, Default)]
pub struct ParseFailureGuard {
    consecutive: u32,
}

impl ParseFailureGuard {
    /// Consecutive failures that end the loop.
    pub const LIMIT: u32 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Returns `true` when the loop should give up.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= Self::LIMIT
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Budgeted retry for false capability refusals.
#[derive(Debug, Default)]
pub struct RefusalGuard {
    retries: u32,
}

impl RefusalGuard {
    /// Corrective retries allowed per request.
    pub const BUDGET: u32 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` (and spends the budget) when `answer` looks like a
    /// false refusal and a retry is still available.
    pub fn should_retry(&mut self, answer: &str) -> bool {
        if self.retries >= Self::BUDGET || !looks_like_capability_refusal(answer) {
            return false;
        }
        self.retries += 1;
        debug!(retries = self.retries, "Capability refusal detected");
        true
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

const NEGATION: &str = r"(?:i|we)\s+(?:do\s+not|don'?t|cannot|can'?t|can\s+not)|i(?:\s+am|'m)\s+(?:unable|not\s+able)\s+to|we(?:\s+are|'re)\s+(?:unable|not\s+able)\s+to";
const CAPABILITY: &str = r"files?|file\s*system|search(?:es|ing)?|repositor(?:y|ies)|codebase|workspace|project|code|director(?:y|ies)|folders?|terminal|shell|commands?|internet|web";

/// "I don't have access to the files", "I do not have the ability to search"
static MISSING_ACCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:{NEGATION})\s+have\s+(?:any\s+|direct\s+)*(?:access|the\s+ability|the\s+capability|tools?|a\s+way)\b[^.\n]{{0,60}}?\b(?:{CAPABILITY})\b"
    ))
    .expect("failed to compile missing-access regex")
});

/// "I can't read files", "I'm unable to run commands"
static CANNOT_ACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:{NEGATION})\s+(?:directly\s+)?(?:access|search|browse|read|open|view|list|run|execute|inspect|look\s+through)\b[^.\n]{{0,60}}?\b(?:{CAPABILITY})\b"
    ))
    .expect("failed to compile cannot-act regex")
});

/// Lexical check for an answer that falsely claims a capability is missing.
pub fn looks_like_capability_refusal(answer: &str) -> bool {
    let normalized = answer.replace('\u{2019}', "'");
    MISSING_ACCESS_RE.is_match(&normalized) || CANNOT_ACT_RE.is_match(&normalized)
}
