use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When a job fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire once at an absolute instant.
    Once { at: DateTime<Utc> },
    /// Recur on a 5-field cron expression evaluated in an IANA timezone.
    Cron { expression: String, timezone: String },
}

/// Per-job state machine: `Scheduled → Firing → Scheduled` for cron jobs,
/// `Scheduled → Firing → Exhausted` for one-shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Scheduled,
    Firing,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub principal: String,
    /// Reminder text delivered to the principal when the job fires.
    pub message: String,
    pub schedule: Schedule,
    pub state: JobState,
    pub next_run: Option<DateTime<Utc>>,
    pub fired_count: u32,
}
