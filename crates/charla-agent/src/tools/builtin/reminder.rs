//! Reminder tools - one-shot and recurring delivery through the scheduler.
//!
//! Recurring jobs are also written to the durable cron registry so a restart
//! re-registers them; one-shots live only in the in-process engine.

use std::sync::Arc;

use async_trait::async_trait;
use charla_scheduler::{Schedule, SchedulerHandle};
use charla_store::Store;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::tools::{CurrentPrincipal, Tool, ToolResult};

pub struct ScheduleReminderTool {
    pub scheduler: SchedulerHandle,
    pub store: Arc<Store>,
    pub principal: Arc<CurrentPrincipal>,
}

#[async_trait]
impl Tool for ScheduleReminderTool {
    fn name(&self) -> &str {
        "schedule_reminder"
    }

    fn description(&self) -> &str {
        "Schedule a reminder message. One of: 'fire_in_seconds' (relative), \
         'fire_at' (RFC3339 instant), or 'cron' (5-field expression, with \
         optional 'timezone', default UTC) for recurring reminders."
    }

    fn category(&self) -> &str {
        "schedule"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "What to remind about." },
                "fire_in_seconds": { "type": "integer" },
                "fire_at": { "type": "string", "description": "RFC3339 datetime." },
                "cron": { "type": "string", "description": "5-field cron expression." },
                "timezone": { "type": "string", "description": "IANA timezone for cron." }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let message = match input.get("message").and_then(|v| v.as_str()) {
            Some(m) if !m.trim().is_empty() => m.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: message"),
        };
        let Some(principal) = self.principal.get() else {
            return ToolResult::error("no active principal for reminder delivery");
        };

        let id = Uuid::new_v4().to_string();

        if let Some(expr) = input.get("cron").and_then(|v| v.as_str()) {
            let timezone = input
                .get("timezone")
                .and_then(|v| v.as_str())
                .unwrap_or("UTC")
                .to_string();
            let schedule = Schedule::Cron {
                expression: expr.to_string(),
                timezone: timezone.clone(),
            };
            let job = match self.scheduler.register(&id, &principal, &message, schedule) {
                Ok(j) => j,
                Err(e) => return ToolResult::error(format!("invalid schedule: {e}")),
            };
            if let Err(e) = self.store.save_cron(&id, &principal, expr, &message, &timezone) {
                return ToolResult::error(format!("scheduled but not persisted: {e}"));
            }
            return ToolResult::success(format!(
                "Recurring reminder {id} registered ({expr} {timezone}), next run {:?}.",
                job.next_run
            ));
        }

        let at = if let Some(secs) = input.get("fire_in_seconds").and_then(|v| v.as_i64()) {
            if secs <= 0 {
                return ToolResult::error("fire_in_seconds must be positive");
            }
            Utc::now() + Duration::seconds(secs)
        } else if let Some(raw) = input.get("fire_at").and_then(|v| v.as_str()) {
            match chrono::DateTime::parse_from_rfc3339(raw) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => return ToolResult::error(format!("invalid fire_at datetime: {e}")),
            }
        } else {
            return ToolResult::error(
                "one of 'fire_in_seconds', 'fire_at', or 'cron' is required",
            );
        };

        match self
            .scheduler
            .register(&id, &principal, &message, Schedule::Once { at })
        {
            Ok(_) => ToolResult::success(format!("Reminder {id} set for {at}.")),
            Err(e) => ToolResult::error(format!("failed to schedule: {e}")),
        }
    }
}

pub struct ListRemindersTool {
    pub scheduler: SchedulerHandle,
}

#[async_trait]
impl Tool for ListRemindersTool {
    fn name(&self) -> &str {
        "list_reminders"
    }

    fn description(&self) -> &str {
        "List all scheduled reminders."
    }

    fn category(&self) -> &str {
        "schedule"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        let jobs = self.scheduler.list();
        if jobs.is_empty() {
            return ToolResult::success("No reminders scheduled.");
        }
        let lines: Vec<String> = jobs
            .iter()
            .map(|j| {
                format!(
                    "- {} — \"{}\" next {}",
                    j.id,
                    j.message,
                    j.next_run
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                )
            })
            .collect();
        ToolResult::success(lines.join("\n"))
    }
}

pub struct CancelReminderTool {
    pub scheduler: SchedulerHandle,
    pub store: Arc<Store>,
}

#[async_trait]
impl Tool for CancelReminderTool {
    fn name(&self) -> &str {
        "cancel_reminder"
    }

    fn description(&self) -> &str {
        "Cancel a scheduled reminder by its id."
    }

    fn category(&self) -> &str {
        "schedule"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let id = match input.get("id").and_then(|v| v.as_str()) {
            Some(i) => i,
            None => return ToolResult::error("missing required parameter: id"),
        };
        match self.scheduler.remove(id) {
            Ok(()) => {
                // Durable row (if this was a cron) goes inactive too.
                let _ = self.store.deactivate_cron(id);
                ToolResult::success(format!("Reminder {id} cancelled."))
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}
