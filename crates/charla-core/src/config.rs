use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (charla.toml + CHARLA_* env overrides).
///
/// Every field maps to exactly one behaviour; nothing here is read twice for
/// different purposes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CharlaConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub eval: EvalConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Principals allowed to talk to the assistant. Empty = reject everyone;
    /// this is a single-user system, the list normally has one entry.
    #[serde(default)]
    pub allowed_principals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds the shutdown sequence waits for in-flight background work.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Messaging-provider REST client settings (WhatsApp Cloud API shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_wa_base")]
    pub api_base: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base: default_wa_base(),
            access_token: String::new(),
            phone_number_id: String::new(),
        }
    }
}

/// Local LLM endpoint and per-role models/timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Small fast model for intent classification (think disabled).
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    /// Model used by guardrail judges.
    #[serde(default = "default_classifier_model")]
    pub judge_model: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_main_timeout")]
    pub main_timeout_secs: u64,
    #[serde(default = "default_classifier_timeout")]
    pub classifier_timeout_secs: u64,
    #[serde(default = "default_judge_timeout")]
    pub judge_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base(),
            chat_model: default_chat_model(),
            classifier_model: default_classifier_model(),
            judge_model: default_classifier_model(),
            embed_model: default_embed_model(),
            main_timeout_secs: default_main_timeout(),
            classifier_timeout_secs: default_classifier_timeout(),
            judge_timeout_secs: default_judge_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Hard cap on messages kept per conversation before oldest are summarised.
    #[serde(default = "default_conv_max")]
    pub conversation_max_messages: usize,
    /// Unsummarised-message count that triggers a background summary.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,
    /// Messages included verbatim in the history window.
    #[serde(default = "default_verbatim")]
    pub history_verbatim_count: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            conversation_max_messages: default_conv_max(),
            summary_threshold: default_summary_threshold(),
            history_verbatim_count: default_verbatim(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_top_k")]
    pub semantic_search_top_k: usize,
    /// Cosine-distance cutoff; memories above it are dropped from context.
    #[serde(default = "default_similarity_threshold")]
    pub memory_similarity_threshold: f32,
    /// When false the markdown mirror is never written.
    #[serde(default = "bool_true")]
    pub memory_flush_enabled: bool,
    /// When false edits to the mirror file are not synced back to the store.
    #[serde(default = "bool_true")]
    pub memory_file_watch_enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            semantic_search_top_k: default_top_k(),
            memory_similarity_threshold: default_similarity_threshold(),
            memory_flush_enabled: true,
            memory_file_watch_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "bool_true")]
    pub language_check: bool,
    #[serde(default = "bool_true")]
    pub pii_check: bool,
    /// Opt-in LLM judges (tool coherence, hallucination).
    #[serde(default)]
    pub llm_checks: bool,
    #[serde(default = "default_guardrail_timeout")]
    pub llm_timeout_secs: u64,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language_check: true,
            pii_check: true,
            llm_checks: false,
            llm_timeout_secs: default_guardrail_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Uniform sampling in [0,1]. 1.0 = trace every message.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Optional remote span sink; unset means store-only.
    #[serde(default)]
    pub remote_endpoint: Option<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: default_sample_rate(),
            retention_days: default_retention_days(),
            remote_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvalConfig {
    /// Automatically file failure/golden/correction dataset entries.
    #[serde(default)]
    pub auto_curate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
    #[serde(default = "default_rate_max")]
    pub max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_window(),
            max: default_rate_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_max_iterations")]
    pub max_tool_iterations: usize,
    /// Global tool budget B for category-proportional selection.
    #[serde(default = "default_tools_per_call")]
    pub tools_per_call: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_iterations(),
            tools_per_call: default_tools_per_call(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tools_per_call")]
    pub tools_per_round: usize,
    #[serde(default = "default_max_replans")]
    pub max_replans: usize,
    /// When false the write_file tool is withheld from agent sessions.
    #[serde(default)]
    pub write_enabled: bool,
    /// Command prefixes the shell sub-policy treats as safe.
    #[serde(default = "default_shell_allowlist")]
    pub shell_allowlist: Vec<String>,
    /// Seconds an agent session may sit in awaiting_human before auto-DENY.
    #[serde(default = "default_hitl_timeout")]
    pub hitl_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_agent_iterations(),
            tools_per_round: default_tools_per_call(),
            max_replans: default_max_replans(),
            write_enabled: false,
            shell_allowlist: default_shell_allowlist(),
            hitl_timeout_secs: default_hitl_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for the store, journals, mirror, daily logs, snapshots, audit log.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_projects_root")]
    pub projects_root: String,
    /// Security policy ruleset (YAML). Missing file = default_action only.
    #[serde(default = "default_policy_file")]
    pub policy_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            projects_root: default_projects_root(),
            policy_file: default_policy_file(),
        }
    }
}

impl CharlaConfig {
    /// Load config from a TOML file with CHARLA_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CharlaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHARLA_").split("_"))
            .extract()
            .map_err(|e| crate::error::CharlaError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn db_path(&self) -> String {
        format!("{}/charla.db", self.paths.data_dir)
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    18920
}
fn default_shutdown_timeout() -> u64 {
    20
}
fn default_wa_base() -> String {
    "https://graph.facebook.com/v21.0".to_string()
}
fn default_llm_base() -> String {
    "http://localhost:11434".to_string()
}
fn default_chat_model() -> String {
    "qwen3:14b".to_string()
}
fn default_classifier_model() -> String {
    "qwen3:4b".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_main_timeout() -> u64 {
    120
}
fn default_classifier_timeout() -> u64 {
    10
}
fn default_judge_timeout() -> u64 {
    15
}
fn default_conv_max() -> usize {
    200
}
fn default_summary_threshold() -> usize {
    30
}
fn default_verbatim() -> usize {
    12
}
fn default_top_k() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.55
}
fn default_guardrail_timeout() -> u64 {
    3
}
fn default_sample_rate() -> f64 {
    1.0
}
fn default_retention_days() -> u32 {
    30
}
fn default_rate_window() -> u64 {
    60
}
fn default_rate_max() -> u32 {
    20
}
fn default_max_iterations() -> usize {
    5
}
fn default_tools_per_call() -> usize {
    8
}
fn default_agent_iterations() -> usize {
    15
}
fn default_max_replans() -> usize {
    3
}
fn default_hitl_timeout() -> u64 {
    900
}
fn default_shell_allowlist() -> Vec<String> {
    [
        "ls", "pwd", "cat", "head", "tail", "wc", "grep", "rg", "find", "date", "whoami",
        "git status", "git log", "git diff", "git branch",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.charla", home)
}
fn default_projects_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/projects", home)
}
fn default_policy_file() -> String {
    format!("{}/policy.yaml", default_data_dir())
}
fn default_config_path() -> String {
    format!("{}/charla.toml", default_data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CharlaConfig::default();
        assert_eq!(cfg.tools.max_tool_iterations, 5);
        assert_eq!(cfg.tools.tools_per_call, 8);
        assert_eq!(cfg.agent.max_iterations, 15);
        assert_eq!(cfg.guardrails.llm_timeout_secs, 3);
        assert!(cfg.trace.enabled);
        assert_eq!(cfg.trace.sample_rate, 1.0);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = CharlaConfig::load(Some("/nonexistent/charla.toml")).unwrap();
        assert_eq!(cfg.conversation.history_verbatim_count, 12);
    }
}
