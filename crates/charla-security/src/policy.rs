//! Policy engine for agentic tool calls.
//!
//! Rules come from a YAML file:
//!
//! ```yaml
//! default_action: flag
//! rules:
//!   - tool_pattern: "read_*"
//!     action: allow
//!   - tool_pattern: "write_file"
//!     arg_regex: "\\.ssh|\\.env"
//!     action: deny
//!   - tool_pattern: "run_command"
//!     action: flag
//! ```
//!
//! Evaluation walks the rules in file order; the first rule whose tool pattern
//! matches (and whose arg regex, if any, matches the serialized arguments)
//! wins. No rule matching falls through to `default_action`.

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Result, SecurityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Deny,
    Flag,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "allow",
            PolicyAction::Deny => "deny",
            PolicyAction::Flag => "flag",
        }
    }
}

/// The engine's verdict for one tool call.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    /// Which rule fired, for the audit record ("default" when none matched).
    pub matched_rule: String,
}

#[derive(Debug, Deserialize)]
struct RawPolicyFile {
    #[serde(default = "default_action")]
    default_action: PolicyAction,
    #[serde(default)]
    rules: Vec<RawRule>,
}

fn default_action() -> PolicyAction {
    PolicyAction::Flag
}

#[derive(Debug, Deserialize)]
struct RawRule {
    tool_pattern: String,
    #[serde(default)]
    arg_regex: Option<String>,
    action: PolicyAction,
}

struct CompiledRule {
    tool_pattern: String,
    arg_regex: Option<Regex>,
    action: PolicyAction,
}

pub struct PolicyEngine {
    rules: Vec<CompiledRule>,
    default_action: PolicyAction,
}

impl PolicyEngine {
    /// Parse a YAML ruleset.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawPolicyFile =
            serde_yaml::from_str(yaml).map_err(|e| SecurityError::PolicyFile(e.to_string()))?;

        let mut rules = Vec::with_capacity(raw.rules.len());
        for r in raw.rules {
            let arg_regex = match &r.arg_regex {
                Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                    SecurityError::InvalidRule {
                        rule: r.tool_pattern.clone(),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            };
            rules.push(CompiledRule {
                tool_pattern: r.tool_pattern,
                arg_regex,
                action: r.action,
            });
        }

        Ok(Self {
            rules,
            default_action: raw.default_action,
        })
    }

    /// Load from a file. A missing file is not an error - the engine then
    /// consists of the default action only.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(yaml) => Self::from_yaml(&yaml).unwrap_or_else(|e| {
                warn!(path, error = %e, "policy file invalid, using default-only engine");
                Self::default_only()
            }),
            Err(_) => Self::default_only(),
        }
    }

    fn default_only() -> Self {
        Self {
            rules: Vec::new(),
            default_action: PolicyAction::Flag,
        }
    }

    /// Evaluate one tool call. First matching rule wins.
    pub fn evaluate(&self, tool: &str, args: &serde_json::Value) -> PolicyDecision {
        let args_str = args.to_string();
        for rule in &self.rules {
            if !pattern_matches(&rule.tool_pattern, tool) {
                continue;
            }
            if let Some(re) = &rule.arg_regex {
                if !re.is_match(&args_str) {
                    continue;
                }
            }
            return PolicyDecision {
                action: rule.action,
                matched_rule: rule.tool_pattern.clone(),
            };
        }
        PolicyDecision {
            action: self.default_action,
            matched_rule: "default".to_string(),
        }
    }
}

/// Tool patterns support a single trailing `*` wildcard; everything else is an
/// exact match.
fn pattern_matches(pattern: &str, tool: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => tool.starts_with(prefix),
        None => pattern == tool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
default_action: flag
rules:
  - tool_pattern: "read_*"
    action: allow
  - tool_pattern: "write_file"
    arg_regex: "\\.ssh|\\.env"
    action: deny
  - tool_pattern: "write_file"
    action: flag
  - tool_pattern: "search_memories"
    action: allow
"#;

    #[test]
    fn wildcard_prefix_allows_readers() {
        let engine = PolicyEngine::from_yaml(POLICY).unwrap();
        let d = engine.evaluate("read_file", &serde_json::json!({"path": "notes.txt"}));
        assert_eq!(d.action, PolicyAction::Allow);
        assert_eq!(d.matched_rule, "read_*");
    }

    #[test]
    fn arg_regex_narrows_the_rule() {
        let engine = PolicyEngine::from_yaml(POLICY).unwrap();
        let sensitive = engine.evaluate(
            "write_file",
            &serde_json::json!({"path": "/home/u/.ssh/config"}),
        );
        assert_eq!(sensitive.action, PolicyAction::Deny);

        let plain = engine.evaluate("write_file", &serde_json::json!({"path": "notes/x.txt"}));
        assert_eq!(plain.action, PolicyAction::Flag);
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        let yaml = r#"
default_action: deny
rules:
  - tool_pattern: "run_command"
    action: flag
  - tool_pattern: "run_*"
    action: allow
"#;
        let engine = PolicyEngine::from_yaml(yaml).unwrap();
        let d = engine.evaluate("run_command", &serde_json::json!({}));
        assert_eq!(d.action, PolicyAction::Flag);
    }

    #[test]
    fn unmatched_tool_falls_to_default() {
        let engine = PolicyEngine::from_yaml(POLICY).unwrap();
        let d = engine.evaluate("launch_rockets", &serde_json::json!({}));
        assert_eq!(d.action, PolicyAction::Flag);
        assert_eq!(d.matched_rule, "default");
    }

    #[test]
    fn missing_file_yields_default_only_engine() {
        let engine = PolicyEngine::load("/nonexistent/policy.yaml");
        let d = engine.evaluate("anything", &serde_json::json!({}));
        assert_eq!(d.action, PolicyAction::Flag);
    }

    #[test]
    fn bad_regex_is_a_policy_error() {
        let yaml = r#"
rules:
  - tool_pattern: "x"
    arg_regex: "["
    action: allow
"#;
        assert!(PolicyEngine::from_yaml(yaml).is_err());
    }
}
