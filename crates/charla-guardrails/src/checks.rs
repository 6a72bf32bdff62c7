//! Deterministic reply checks.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replies longer than this fail `excessive_length` (logged, still sent).
pub const MAX_REPLY_CHARS: usize = 8000;

/// One check's verdict. `value` mirrors `passed` as 0/1 for the score sink.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub details: String,
    pub value: f64,
}

impl CheckResult {
    pub fn pass(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            details: String::new(),
            value: 1.0,
        }
    }

    pub fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            details: details.into(),
            value: 0.0,
        }
    }

    /// Fail-open result for a check that itself errored.
    pub fn errored(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            details: "check error".to_string(),
            value: 1.0,
        }
    }
}

pub fn not_empty(reply: &str) -> CheckResult {
    if reply.trim().is_empty() {
        CheckResult::fail("not_empty", "reply has no content")
    } else {
        CheckResult::pass("not_empty")
    }
}

pub fn excessive_length(reply: &str) -> CheckResult {
    let len = reply.chars().count();
    if len > MAX_REPLY_CHARS {
        CheckResult::fail("excessive_length", format!("{len} chars"))
    } else {
        CheckResult::pass("excessive_length")
    }
}

static TOOL_JSON_RE: Lazy<Regex> = Lazy::new(|| {
    // Raw tool-call fragments that occasionally leak from the model:
    // {"name": "...", "arguments": {...}} or a "tool_calls" array.
    Regex::new(r#""tool_calls"\s*:|\{\s*"name"\s*:\s*"[a-z_]+"\s*,\s*"arguments"\s*:"#).unwrap()
});

pub fn no_raw_tool_json(reply: &str) -> CheckResult {
    if TOOL_JSON_RE.is_match(reply) {
        CheckResult::fail("no_raw_tool_json", "raw tool-call JSON in reply")
    } else {
        CheckResult::pass("no_raw_tool_json")
    }
}
