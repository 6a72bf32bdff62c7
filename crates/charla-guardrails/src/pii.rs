//! PII detection and in-place redaction.
//!
//! A fragment only counts as a leak when it appears in the reply but NOT in
//! the user's own message - echoing back what the user just typed is fine.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::checks::CheckResult;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

// International or local phone numbers, 9+ digits with optional separators.
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").unwrap());

// Spanish DNI: eight digits followed by a control letter.
static DNI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{8}[A-HJ-NP-TV-Z]\b").unwrap());

/// Scan `reply` for PII fragments absent from `user_input`.
/// Returns the check result plus the redacted reply when anything leaked.
pub fn check_and_redact(reply: &str, user_input: &str) -> (CheckResult, Option<String>) {
    let mut leaked: Vec<(usize, usize)> = Vec::new();
    let mut kinds: Vec<&str> = Vec::new();

    for (re, kind) in [
        (&*EMAIL_RE, "email"),
        (&*DNI_RE, "dni"),
        (&*PHONE_RE, "phone"),
    ] {
        for m in re.find_iter(reply) {
            if user_input.contains(m.as_str()) {
                continue;
            }
            // Skip fragments already covered by an earlier pattern (a DNI
            // inside a longer phone match, etc.).
            if leaked.iter().any(|&(s, e)| m.start() >= s && m.end() <= e) {
                continue;
            }
            leaked.push((m.start(), m.end()));
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }

    if leaked.is_empty() {
        return (CheckResult::pass("no_pii"), None);
    }

    // Redact right-to-left so earlier offsets stay valid.
    leaked.sort_by(|a, b| b.0.cmp(&a.0));
    let mut redacted = reply.to_string();
    for (start, end) in &leaked {
        redacted.replace_range(start..end, "[redacted]");
    }

    (
        CheckResult::fail("no_pii", kinds.join(",")),
        Some(redacted),
    )
}
