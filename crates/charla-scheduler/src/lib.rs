//! In-process time-based dispatcher for one-shot reminders and recurring
//! cron jobs.
//!
//! Firing side-effects (delivering the reminder text to the principal) happen
//! outside the engine: fired jobs are forwarded over an mpsc channel and the
//! gateway routes them through the same egress path and rate limit as normal
//! replies. Missed firings while the process was down are not retried - on
//! startup each durable cron is re-registered and its next run is computed
//! from "now" forward.

pub mod engine;
pub mod error;
pub mod schedule;
pub mod types;

pub use engine::{FiredJob, SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use types::{Job, JobState, Schedule};
