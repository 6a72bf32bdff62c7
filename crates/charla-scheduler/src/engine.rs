use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::error::{Result, SchedulerError};
use crate::schedule::{compute_next_run, parse_cron};
use crate::types::{Job, JobState, Schedule};

/// A job that just fired, forwarded to the delivery router.
#[derive(Debug, Clone)]
pub struct FiredJob {
    pub id: String,
    pub principal: String,
    pub message: String,
}

/// Shared registry handle - job management while the engine loop runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    registry: Arc<Mutex<HashMap<String, Job>>>,
}

impl SchedulerHandle {
    /// Register a one-shot or cron job. Cron expressions and timezones are
    /// validated here; a `Once` instant already in the past is registered as
    /// exhausted (missed firings are not retried).
    pub fn register(
        &self,
        id: &str,
        principal: &str,
        message: &str,
        schedule: Schedule,
    ) -> Result<Job> {
        if let Schedule::Cron {
            expression,
            timezone,
        } = &schedule
        {
            parse_cron(expression, timezone)?;
        }

        let now = Utc::now();
        let next = compute_next_run(&schedule, now);
        let job = Job {
            id: id.to_string(),
            principal: principal.to_string(),
            message: message.to_string(),
            schedule,
            state: if next.is_some() {
                JobState::Scheduled
            } else {
                JobState::Exhausted
            },
            next_run: next,
            fired_count: 0,
        };

        info!(job_id = %id, next = ?job.next_run, "job registered");
        self.registry
            .lock()
            .unwrap()
            .insert(id.to_string(), job.clone());
        Ok(job)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        match self.registry.lock().unwrap().remove(id) {
            Some(_) => {
                info!(job_id = %id, "job removed");
                Ok(())
            }
            None => Err(SchedulerError::JobNotFound { id: id.to_string() }),
        }
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.registry.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }
}

/// The tick loop. Owns the same registry as the handle it hands out.
pub struct SchedulerEngine {
    registry: Arc<Mutex<HashMap<String, Job>>>,
    fired_tx: mpsc::Sender<FiredJob>,
}

impl SchedulerEngine {
    pub fn new(fired_tx: mpsc::Sender<FiredJob>) -> (Self, SchedulerHandle) {
        let registry = Arc::new(Mutex::new(HashMap::new()));
        let handle = SchedulerHandle {
            registry: Arc::clone(&registry),
        };
        (
            Self {
                registry,
                fired_tx,
            },
            handle,
        )
    }

    /// Main loop. Ticks every second until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fire every job whose next_run has arrived, then reschedule or exhaust.
    /// At most one firing per instant per job: the next run is computed
    /// strictly after `now` before the job returns to Scheduled.
    fn tick(&self, now: chrono::DateTime<chrono::Utc>) {
        let due: Vec<FiredJob> = {
            let mut registry = self.registry.lock().unwrap();
            let mut fired = Vec::new();
            let mut exhausted: Vec<String> = Vec::new();

            for job in registry.values_mut() {
                let Some(next) = job.next_run else { continue };
                if job.state != JobState::Scheduled || next > now {
                    continue;
                }

                job.state = JobState::Firing;
                job.fired_count += 1;
                fired.push(FiredJob {
                    id: job.id.clone(),
                    principal: job.principal.clone(),
                    message: job.message.clone(),
                });

                job.next_run = compute_next_run(&job.schedule, now);
                if job.next_run.is_some() {
                    job.state = JobState::Scheduled;
                } else {
                    job.state = JobState::Exhausted;
                    exhausted.push(job.id.clone());
                }
            }

            for id in exhausted {
                registry.remove(&id);
            }
            fired
        };

        for job in due {
            // try_send keeps the tick loop from ever blocking on delivery.
            if self.fired_tx.try_send(job.clone()).is_err() {
                warn!(job_id = %job.id, "delivery channel full or closed, firing dropped");
            }
        }
    }
}
