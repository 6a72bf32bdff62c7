//! Shell command sub-policy for the generic `run_command` tool.
//!
//! Pure function over the command string - same input, same decision, no I/O.
//! Decision order:
//!   1. First token (or leading phrase) on the hard denylist → Deny.
//!   2. Any chaining/redirect metacharacter → Ask (human confirms).
//!   3. Allowlist prefix match → Allow.
//!   4. Anything else → Ask.
//!
//! The executor that acts on an Allow runs the command with `shell=false`,
//! stdin from /dev/null, cwd pinned to the project root, a bounded timeout,
//! and output truncated to the last 4K characters.

/// Outcome of validating one command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellDecision {
    Allow,
    Deny { reason: String },
    /// Needs human confirmation before it may run.
    Ask { reason: String },
}

/// Commands that are never run, regardless of arguments.
///
/// Matching is against the lowercased first token, plus the two-token
/// `kill -9` phrase which is only dangerous with that flag.
const HARD_DENYLIST: &[&str] = &[
    "rm", "sudo", "chmod", "chown", "dd", "mkfs", "shutdown", "reboot", "halt", "poweroff",
];

/// Validate `command` against the sub-policy.
///
/// `allowlist` entries are lowercase prefixes ("git status", "ls"); a command
/// is allowlisted when it starts with one of them at a token boundary.
pub fn validate_command(command: &str, allowlist: &[String]) -> ShellDecision {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return ShellDecision::Deny {
            reason: "empty command".to_string(),
        };
    }
    let lower = trimmed.to_lowercase();

    let first_token = lower.split_whitespace().next().unwrap_or_default();
    if HARD_DENYLIST.contains(&first_token) {
        return ShellDecision::Deny {
            reason: format!("`{first_token}` is on the hard denylist"),
        };
    }
    if lower.starts_with("kill -9") || lower.contains(" kill -9") {
        return ShellDecision::Deny {
            reason: "`kill -9` is on the hard denylist".to_string(),
        };
    }

    if let Some(op) = find_shell_operator(&lower) {
        return ShellDecision::Ask {
            reason: format!("command contains shell operator `{op}`"),
        };
    }

    if allowlist
        .iter()
        .any(|prefix| is_prefix_at_boundary(&lower, &prefix.to_lowercase()))
    {
        return ShellDecision::Allow;
    }

    ShellDecision::Ask {
        reason: "command is not on the allowlist".to_string(),
    }
}

/// Scan for operators that could chain or redirect execution. A substring scan
/// is enough here: we only need to route the command to a human, not parse it.
fn find_shell_operator(lower: &str) -> Option<&'static str> {
    const OPERATORS: &[&str] = &["&&", "||", "$(", "`", "|", ">", ";"];
    OPERATORS.iter().copied().find(|op| lower.contains(op))
}

/// `"git status"` matches `"git status"` and `"git status --short"`, but not
/// `"git statusx"`.
fn is_prefix_at_boundary(command: &str, prefix: &str) -> bool {
    if !command.starts_with(prefix) {
        return false;
    }
    match command.as_bytes().get(prefix.len()) {
        None => true,
        Some(b' ') => true,
        Some(_) => false,
    }
}

/// Keep the last `max_chars` characters of tool output for the model.
pub fn truncate_output_tail(output: &str, max_chars: usize) -> String {
    let count = output.chars().count();
    if count <= max_chars {
        return output.to_string();
    }
    let tail: String = output
        .chars()
        .skip(count - max_chars)
        .collect();
    format!("…[truncated {} chars]\n{tail}", count - max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> Vec<String> {
        ["ls", "cat", "grep", "git status", "git log", "echo"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    // --- Denylist ---

    #[test]
    fn deny_rm() {
        let d = validate_command("rm -rf /tmp/x", &allowlist());
        assert!(matches!(d, ShellDecision::Deny { .. }));
    }

    #[test]
    fn deny_sudo() {
        let d = validate_command("sudo apt install vim", &allowlist());
        assert!(matches!(d, ShellDecision::Deny { .. }));
    }

    #[test]
    fn deny_kill_dash_nine() {
        let d = validate_command("kill -9 1234", &allowlist());
        assert!(matches!(d, ShellDecision::Deny { .. }));
    }

    #[test]
    fn deny_is_case_insensitive() {
        let d = validate_command("SUDO whoami", &allowlist());
        assert!(matches!(d, ShellDecision::Deny { .. }));
    }

    #[test]
    fn denylist_beats_metacharacters() {
        // `rm` with a pipe must still be a Deny, not an Ask.
        let d = validate_command("rm -rf / | true", &allowlist());
        assert!(matches!(d, ShellDecision::Deny { .. }));
    }

    // --- Metacharacters → Ask ---

    #[test]
    fn pipe_asks() {
        let d = validate_command("cat notes.txt | head", &allowlist());
        assert!(matches!(d, ShellDecision::Ask { .. }));
    }

    #[test]
    fn redirect_asks_even_for_allowlisted_prefix() {
        let d = validate_command("echo hi > /etc/passwd", &allowlist());
        assert!(matches!(d, ShellDecision::Ask { .. }));
    }

    #[test]
    fn command_substitution_asks() {
        let d = validate_command("echo $(whoami)", &allowlist());
        assert!(matches!(d, ShellDecision::Ask { .. }));
    }

    #[test]
    fn backticks_ask() {
        let d = validate_command("echo `date`", &allowlist());
        assert!(matches!(d, ShellDecision::Ask { .. }));
    }

    #[test]
    fn double_ampersand_asks() {
        let d = validate_command("ls && whoami", &allowlist());
        assert!(matches!(d, ShellDecision::Ask { .. }));
    }

    // --- Allowlist ---

    #[test]
    fn allowlisted_plain_command_passes() {
        assert_eq!(validate_command("ls -la", &allowlist()), ShellDecision::Allow);
    }

    #[test]
    fn multiword_allowlist_prefix_passes() {
        assert_eq!(
            validate_command("git status --short", &allowlist()),
            ShellDecision::Allow
        );
    }

    #[test]
    fn prefix_must_end_at_token_boundary() {
        // "lsblk" starts with "ls" but is not the allowlisted command.
        let d = validate_command("lsblk", &allowlist());
        assert!(matches!(d, ShellDecision::Ask { .. }));
    }

    // --- Default ---

    #[test]
    fn unknown_command_asks() {
        let d = validate_command("cargo build", &allowlist());
        assert!(matches!(d, ShellDecision::Ask { .. }));
    }

    #[test]
    fn decision_is_deterministic() {
        let a = validate_command("cat notes.txt | head", &allowlist());
        let b = validate_command("cat notes.txt | head", &allowlist());
        assert_eq!(a, b);
    }

    // --- Output truncation ---

    #[test]
    fn long_output_keeps_tail() {
        let out = "a".repeat(5000) + "END";
        let truncated = truncate_output_tail(&out, 4096);
        assert!(truncated.ends_with("END"));
        assert!(truncated.starts_with("…[truncated"));
    }

    #[test]
    fn short_output_is_unchanged() {
        assert_eq!(truncate_output_tail("ok", 4096), "ok");
    }
}
