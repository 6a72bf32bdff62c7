use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Policy file error: {0}")]
    PolicyFile(String),

    #[error("Invalid rule ({rule}): {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Audit I/O error: {0}")]
    AuditIo(#[from] std::io::Error),

    #[error("Audit chain broken at record {index}: {reason}")]
    ChainBroken { index: usize, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SecurityError>;
