//! Security gates wired into the tool executor.
//!
//! Chat mode uses [`ShellGuardGate`]: only `run_command` is screened, and
//! anything needing confirmation is denied (the chat path has no approval
//! channel). Agent mode uses [`PolicyGate`]: the YAML policy engine decides
//! ALLOW/DENY/FLAG, flagged calls pause for human approval over WhatsApp, and
//! every decision lands in the hash-chained audit log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use charla_security::{validate_command, AuditLog, PolicyAction, PolicyEngine, ShellDecision};
use charla_store::types::SessionStatus;
use charla_store::Store;
use tracing::{info, warn};

use crate::executor::{GateDecision, ToolGate};
use crate::session::hitl::HitlMailbox;
use crate::Outbound;

/// Chat-mode gate: shell sub-policy only, no approval channel.
pub struct ShellGuardGate {
    pub allowlist: Vec<String>,
}

#[async_trait]
impl ToolGate for ShellGuardGate {
    async fn check(&self, tool: &str, args: &serde_json::Value) -> GateDecision {
        if tool != "run_command" {
            return GateDecision::Allow;
        }
        let command = args.get("command").and_then(|v| v.as_str()).unwrap_or("");
        match validate_command(command, &self.allowlist) {
            ShellDecision::Allow => GateDecision::Allow,
            ShellDecision::Deny { reason } => {
                GateDecision::Deny(format!("Command blocked: {reason}"))
            }
            ShellDecision::Ask { reason } => GateDecision::Deny(format!(
                "Command blocked: {reason}. Start an agent session (/agent) to run \
                 commands that need approval."
            )),
        }
    }
}

/// Agent-mode gate: policy evaluation + HITL + audit trail.
pub struct PolicyGate {
    pub policy: Arc<PolicyEngine>,
    pub audit: Arc<AuditLog>,
    pub hitl: Arc<HitlMailbox>,
    pub outbound: Arc<dyn Outbound>,
    pub store: Arc<Store>,
    pub session_id: String,
    pub principal: String,
    pub hitl_timeout: Duration,
    pub shell_allowlist: Vec<String>,
}

impl PolicyGate {
    fn record(&self, tool: &str, args: &serde_json::Value, decision: &str, outcome: &str) {
        if let Err(e) = self.audit.append(tool, args, decision, outcome) {
            warn!(error = %e, "audit append failed");
        }
    }

    /// Pause the session and ask the human. Expiry or a dropped slot means
    /// deny.
    async fn await_approval(&self, tool: &str, args: &serde_json::Value) -> bool {
        let prompt = format!(
            "⚠️ The agent wants to run `{tool}` with arguments:\n{}\n\nReply yes/sí to \
             approve or no to deny.",
            serde_json::to_string_pretty(args).unwrap_or_default()
        );
        if let Err(e) = self.outbound.send_message(&self.principal, &prompt).await {
            warn!(error = %e, "approval prompt send failed, denying");
            return false;
        }

        let _ = self
            .store
            .set_session_status(&self.session_id, SessionStatus::AwaitingHuman);
        let rx = self.hitl.request(&self.principal);
        let approved = match tokio::time::timeout(self.hitl_timeout, rx).await {
            Ok(Ok(approved)) => approved,
            Ok(Err(_)) => false,
            Err(_) => {
                info!(tool, "approval timed out, denying");
                self.hitl.clear(&self.principal);
                false
            }
        };
        let _ = self
            .store
            .set_session_status(&self.session_id, SessionStatus::Running);
        approved
    }
}

#[async_trait]
impl ToolGate for PolicyGate {
    async fn check(&self, tool: &str, args: &serde_json::Value) -> GateDecision {
        // The shell sub-policy narrows run_command before the general ruleset:
        // hard denylist wins outright, operators force a FLAG.
        let mut action = self.policy.evaluate(tool, args).action;
        if tool == "run_command" {
            let command = args.get("command").and_then(|v| v.as_str()).unwrap_or("");
            match validate_command(command, &self.shell_allowlist) {
                ShellDecision::Deny { reason } => {
                    self.record(tool, args, "deny", "blocked");
                    return GateDecision::Deny(format!("Command blocked: {reason}"));
                }
                ShellDecision::Ask { .. } => action = PolicyAction::Flag,
                ShellDecision::Allow => {}
            }
        }

        match action {
            PolicyAction::Allow => {
                self.record(tool, args, "allow", "executed");
                GateDecision::Allow
            }
            PolicyAction::Deny => {
                self.record(tool, args, "deny", "blocked");
                GateDecision::Deny(format!("Command blocked: policy denies `{tool}`"))
            }
            PolicyAction::Flag => {
                if self.await_approval(tool, args).await {
                    self.record(tool, args, "flag", "approved");
                    GateDecision::Allow
                } else {
                    self.record(tool, args, "flag", "denied_by_human");
                    GateDecision::Deny(format!(
                        "Command blocked: `{tool}` was not approved"
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charla_core::CharlaError;

    struct NullOutbound;

    #[async_trait]
    impl Outbound for NullOutbound {
        async fn send_message(
            &self,
            _principal: &str,
            _text: &str,
        ) -> Result<Option<String>, CharlaError> {
            Ok(Some("wamid.mock".to_string()))
        }
        async fn send_reaction(
            &self,
            _provider_message_id: &str,
            _emoji: &str,
        ) -> Result<(), CharlaError> {
            Ok(())
        }
        async fn mark_as_read(&self, _provider_message_id: &str) -> Result<(), CharlaError> {
            Ok(())
        }
    }

    fn policy_gate(dir: &std::path::Path, yaml: &str, timeout_ms: u64) -> PolicyGate {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create_agent_session("s1", "+34", "test").unwrap();
        PolicyGate {
            policy: Arc::new(PolicyEngine::from_yaml(yaml).unwrap()),
            audit: Arc::new(AuditLog::open(dir.join("audit.jsonl")).unwrap()),
            hitl: Arc::new(HitlMailbox::new()),
            outbound: Arc::new(NullOutbound),
            store,
            session_id: "s1".to_string(),
            principal: "+34".to_string(),
            hitl_timeout: Duration::from_millis(timeout_ms),
            shell_allowlist: vec!["ls".to_string()],
        }
    }

    #[tokio::test]
    async fn chat_gate_denies_ask_level_commands() {
        let gate = ShellGuardGate {
            allowlist: vec!["ls".to_string()],
        };
        let decision = gate
            .check(
                "run_command",
                &serde_json::json!({"command": "cat x | head"}),
            )
            .await;
        assert!(matches!(decision, GateDecision::Deny(_)));

        let decision = gate
            .check("run_command", &serde_json::json!({"command": "ls -la"}))
            .await;
        assert!(matches!(decision, GateDecision::Allow));
    }

    #[tokio::test]
    async fn chat_gate_ignores_non_shell_tools() {
        let gate = ShellGuardGate { allowlist: vec![] };
        let decision = gate.check("search_memories", &serde_json::json!({})).await;
        assert!(matches!(decision, GateDecision::Allow));
    }

    #[tokio::test]
    async fn policy_allow_is_audited_as_executed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = policy_gate(
            dir.path(),
            "default_action: deny\nrules:\n  - tool_pattern: \"read_*\"\n    action: allow\n",
            100,
        );
        let decision = gate.check("read_file", &serde_json::json!({"path": "x"})).await;
        assert!(matches!(decision, GateDecision::Allow));
        assert_eq!(gate.audit.verify().unwrap(), 1);
    }

    #[tokio::test]
    async fn flagged_call_times_out_to_deny() {
        let dir = tempfile::tempdir().unwrap();
        let gate = policy_gate(dir.path(), "default_action: flag\n", 30);
        let decision = gate.check("write_file", &serde_json::json!({})).await;
        assert!(matches!(decision, GateDecision::Deny(_)));
    }

    #[tokio::test]
    async fn flagged_call_approved_by_human_runs() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(policy_gate(dir.path(), "default_action: flag\n", 2000));
        let hitl = Arc::clone(&gate.hitl);

        let approver = tokio::spawn(async move {
            // Wait until the request is parked, then approve like the webhook would.
            for _ in 0..100 {
                if hitl.try_resolve("+34", "yes").is_some() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let decision = gate.check("write_file", &serde_json::json!({})).await;
        approver.await.unwrap();
        assert!(matches!(decision, GateDecision::Allow));
    }

    #[tokio::test]
    async fn shell_denylist_wins_inside_policy_gate() {
        let dir = tempfile::tempdir().unwrap();
        let gate = policy_gate(dir.path(), "default_action: allow\n", 100);
        let decision = gate
            .check("run_command", &serde_json::json!({"command": "sudo reboot"}))
            .await;
        match decision {
            GateDecision::Deny(msg) => assert!(msg.starts_with("Command blocked:")),
            GateDecision::Allow => panic!("denylisted command passed"),
        }
    }
}
