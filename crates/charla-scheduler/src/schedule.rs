use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

/// Compute the next UTC execution time for `schedule` strictly after `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` whose instant has
/// passed) or when a cron expression yields no future occurrence.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }
        Schedule::Cron {
            expression,
            timezone,
        } => {
            let (parsed, tz) = parse_cron(expression, timezone).ok()?;
            let local = from.with_timezone(&tz);
            parsed
                .after(&local)
                .next()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}

/// Validate a 5-field cron expression and IANA timezone.
///
/// The cron parser wants a seconds field; "fire at second 0" is prepended so
/// users write the conventional `min hour dom month dow` form.
pub fn parse_cron(expression: &str, timezone: &str) -> Result<(cron::Schedule, Tz)> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "expected 5 cron fields, got {fields}"
        )));
    }
    let with_seconds = format!("0 {expression}");
    let parsed = cron::Schedule::from_str(&with_seconds)
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
    let tz = Tz::from_str(timezone)
        .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))?;
    Ok((parsed, tz))
}

/// Convenience for relative one-shots ("remind me in 10 minutes").
pub fn once_after(from: DateTime<Utc>, delay: chrono::Duration) -> Schedule {
    Schedule::Once { at: from + delay }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_in_the_future_fires_once() {
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let schedule = Schedule::Once { at };
        assert_eq!(compute_next_run(&schedule, from), Some(at));
        // Past instant ⇒ exhausted, not retried.
        assert_eq!(compute_next_run(&schedule, at), None);
    }

    #[test]
    fn cron_respects_timezone() {
        // 09:00 every day in Madrid; March 1st Madrid is UTC+1, so 08:00 UTC.
        let schedule = Schedule::Cron {
            expression: "0 9 * * *".to_string(),
            timezone: "Europe/Madrid".to_string(),
        };
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let next = compute_next_run(&schedule, from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn next_run_is_strictly_after_from() {
        let schedule = Schedule::Cron {
            expression: "0 9 * * *".to_string(),
            timezone: "UTC".to_string(),
        };
        let exactly_nine = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let next = compute_next_run(&schedule, exactly_nine).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekday_field_is_honoured() {
        let schedule = Schedule::Cron {
            // 08:30 Monday to Friday.
            expression: "30 8 * * 1-5".to_string(),
            timezone: "UTC".to_string(),
        };
        // 2026-02-28 is a Saturday; next run must be Monday 2026-03-02.
        let from = Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap();
        let next = compute_next_run(&schedule, from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap());
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(parse_cron("* * * *", "UTC").is_err());
        assert!(parse_cron("0 9 * * * *", "UTC").is_err());
    }

    #[test]
    fn bad_timezone_is_rejected() {
        assert!(matches!(
            parse_cron("0 9 * * *", "Mars/Olympus"),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }
}
