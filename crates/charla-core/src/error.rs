use thiserror::Error;

/// Top-level error taxonomy. Every collaborator maps its failures into one of
/// these kinds so the orchestrator can apply the per-kind policy (retry, drop,
/// swallow, abort) without inspecting message strings.
#[derive(Debug, Error)]
pub enum CharlaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error ({tool}): {reason}")]
    Tool { tool: String, reason: String },

    #[error("Command blocked: {0}")]
    PolicyDeny(String),

    #[error("Guardrail error ({check}): {reason}")]
    Guardrail { check: String, reason: String },

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Duplicate provider message: {0}")]
    DedupConflict(String),

    #[error("Rate limited: {principal}")]
    RateLimited { principal: String },

    #[error("Timeout after {ms}ms in {what}")]
    Timeout { what: String, ms: u64 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl CharlaError {
    /// Stable short code for logs and trace metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            CharlaError::Config(_) => "CONFIG_ERROR",
            CharlaError::Transport(_) => "TRANSPORT_ERROR",
            CharlaError::Llm(_) => "LLM_ERROR",
            CharlaError::Tool { .. } => "TOOL_ERROR",
            CharlaError::PolicyDeny(_) => "POLICY_DENY",
            CharlaError::Guardrail { .. } => "GUARDRAIL_ERROR",
            CharlaError::Recorder(_) => "RECORDER_ERROR",
            CharlaError::Embedding(_) => "EMBEDDING_ERROR",
            CharlaError::DedupConflict(_) => "DEDUP_CONFLICT",
            CharlaError::RateLimited { .. } => "RATE_LIMITED",
            CharlaError::Timeout { .. } => "TIMEOUT",
            CharlaError::Store(_) => "STORE_ERROR",
            CharlaError::Serialization(_) => "SERIALIZATION_ERROR",
            CharlaError::Io(_) => "IO_ERROR",
            CharlaError::Fatal(_) => "FATAL",
        }
    }

    /// Background paths swallow these kinds; the reply path never does.
    pub fn is_best_effort(&self) -> bool {
        matches!(
            self,
            CharlaError::Recorder(_) | CharlaError::Embedding(_) | CharlaError::Guardrail { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CharlaError>;
