use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: i64,
    pub principal: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub text: String,
    pub provider_message_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub id: i64,
    pub conversation_id: i64,
    pub text: String,
    pub covered_message_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Memory {
    pub id: i64,
    pub text: String,
    pub category: Option<String>,
    pub active: bool,
    pub expires_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

/// What an embedding vector is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Memory,
    Note,
    ProjectNote,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Memory => "memory",
            EmbeddingKind::Note => "note",
            EmbeddingKind::ProjectNote => "project_note",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceRow {
    pub id: String,
    pub principal: String,
    pub message_type: String,
    pub status: String,
    pub provider_message_id: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpanRow {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: String,
    pub status: String,
    pub started_at: String,
    pub latency_ms: i64,
    pub input_payload: Option<String>,
    pub output_payload: Option<String>,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub id: i64,
    pub trace_id: String,
    pub name: String,
    pub value: f64,
    pub source: String,
    pub comment: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetTier {
    Failure,
    Golden,
    Correction,
}

impl DatasetTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetTier::Failure => "failure",
            DatasetTier::Golden => "golden",
            DatasetTier::Correction => "correction",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub id: i64,
    pub trace_id: Option<String>,
    pub entry_type: String,
    pub input: String,
    pub output: String,
    pub expected_output: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub tags: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PromptVersion {
    pub id: i64,
    pub prompt_name: String,
    pub version: i64,
    pub content: String,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CronRow {
    pub id: String,
    pub principal: String,
    pub expression: String,
    pub message: String,
    pub timezone: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    AwaitingHuman,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::AwaitingHuman => "awaiting_human",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "awaiting_human" => Ok(SessionStatus::AwaitingHuman),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentSessionRow {
    pub id: String,
    pub principal: String,
    pub objective: String,
    pub status: SessionStatus,
    pub round_count: i64,
    pub created_at: String,
    pub updated_at: String,
}
