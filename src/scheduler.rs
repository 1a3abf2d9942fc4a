//! Scheduler for the deployment indicators pass
//!
//! Supports:
//! - `@every <duration>` intervals (`20m`, `1h30m`, `500ms`)
//! - Cron macros (`@hourly`, `@daily`, ...)
//! - 5-field cron expressions, and 6/7-field ones with seconds
//! - Timezone-aware cron evaluation

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::watch;

use crate::error::{JobError, ScheduleError};
use crate::state::{AppState, PassTrigger};
use crate::types::ScheduleEntry;

/// When the pass runs.
#[derive(Debug, Clone)]
pub enum Recurrence {
    Every(Duration),
    Cron(Schedule),
}

impl Recurrence {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let expr = expr.trim();
        let invalid = |reason: String| ScheduleError::Recurrence {
            expr: expr.to_string(),
            reason,
        };

        if let Some(interval) = expr.strip_prefix("@every") {
            return parse_duration(interval.trim())
                .map(Recurrence::Every)
                .map_err(invalid);
        }

        let cron_expr = match expr {
            "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
            "@monthly" => "0 0 0 1 * *".to_string(),
            "@weekly" => "0 0 0 * * Sun".to_string(),
            "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
            "@hourly" => "0 0 * * * *".to_string(),
            _ if expr.starts_with('@') => return Err(invalid("unknown macro".to_string())),
            _ => match expr.split_whitespace().count() {
                5 => format!("0 {}", expr),
                6 | 7 => expr.to_string(),
                n => return Err(invalid(format!("expected 5 to 7 fields, got {}", n))),
            },
        };

        Schedule::from_str(&cron_expr)
            .map(Recurrence::Cron)
            .map_err(|e| invalid(e.to_string()))
    }

    /// First run strictly after `after`. Cron fields are read in `tz`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Every(interval) => chrono::Duration::from_std(*interval)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
            Recurrence::Cron(schedule) => schedule
                .after(&after.with_timezone(&tz))
                .next()
                .map(|next| next.with_timezone(&Utc)),
        }
    }
}

/// Parse `1h30m`, `20m`, `45s` or `500ms`. Zero is refused.
fn parse_duration(input: &str) -> Result<Duration, String> {
    if input.is_empty() {
        return Err("missing duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number at '{}'", rest));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("bad number '{}': {}", &rest[..digits], e))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "s" => Some(Duration::from_secs(value)),
            "ms" => Some(Duration::from_millis(value)),
            "" => return Err(format!("missing unit after {}", value)),
            unit => return Err(format!("unknown unit '{}'", unit)),
        };
        total = part
            .and_then(|part| total.checked_add(part))
            .ok_or_else(|| format!("duration '{}' is too large", input))?;
        rest = &rest[unit_len..];
    }

    if total.is_zero() {
        return Err("duration must be positive".to_string());
    }
    Ok(total)
}

pub struct Scheduler {
    state: Arc<AppState>,
    recurrence: Recurrence,
    timezone: Tz,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    /// Validate the schedule. An error here means the scheduler must not start.
    pub fn new(
        entry: &ScheduleEntry,
        state: Arc<AppState>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ScheduleError> {
        let recurrence = Recurrence::parse(&entry.recurrence)?;
        let timezone: Tz = entry
            .timezone
            .parse()
            .map_err(|_| ScheduleError::Timezone(entry.timezone.clone()))?;
        Ok(Self {
            state,
            recurrence,
            timezone,
            shutdown,
        })
    }

    pub fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.recurrence.next_after(now, self.timezone)
    }

    /// Start the scheduler loop
    ///
    /// Runs until shutdown. A failed or overlapping pass is logged and the
    /// loop waits for the next tick.
    pub async fn run(mut self) {
        loop {
            let now = Utc::now();
            let Some(next) = self.next_run(now) else {
                log::warn!("No upcoming run for deployment indicators, scheduler stopped");
                return;
            };
            log::info!(
                "Deployment indicators will be computed next at {}",
                next.with_timezone(&self.timezone)
            );

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        log::info!("Scheduler stopped");
                        return;
                    }
                    continue;
                }
            }

            match self.state.run_deployment_pass(PassTrigger::Scheduled).await {
                Ok(summary) => log::info!("Scheduled deployment pass: {}", summary),
                Err(JobError::AlreadyRunning) => {
                    log::info!("Scheduled deployment pass skipped: a pass is already running")
                }
                Err(e) => log::error!("Could not execute deployment status analytics: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_every() {
        match Recurrence::parse("@every 20m").unwrap() {
            Recurrence::Every(d) => assert_eq!(d, Duration::from_secs(1200)),
            other => panic!("unexpected {:?}", other),
        }
        match Recurrence::parse("@every 1h30m").unwrap() {
            Recurrence::Every(d) => assert_eq!(d, Duration::from_secs(5400)),
            other => panic!("unexpected {:?}", other),
        }
        match Recurrence::parse("@every 1s500ms").unwrap() {
            Recurrence::Every(d) => assert_eq!(d, Duration::from_millis(1500)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_every_invalid() {
        for expr in [
            "@every",
            "@every 0s",
            "@every 10",
            "@every 5d",
            "@every m",
            "@every 10000000000000000h",
            "@every 18446744073709551615s1s",
            "@every 99999999999999999999s",
        ] {
            assert!(Recurrence::parse(expr).is_err(), "{} should fail", expr);
        }
    }

    #[test]
    fn test_parse_cron_forms() {
        assert!(Recurrence::parse("0 8 * * *").is_ok());
        assert!(Recurrence::parse("30 0 8 * * *").is_ok());
        assert!(Recurrence::parse("@daily").is_ok());
        assert!(Recurrence::parse("@hourly").is_ok());
        assert!(Recurrence::parse("@fortnightly").is_err());
        assert!(Recurrence::parse("not a cron").is_err());
        assert!(Recurrence::parse("* *").is_err());
    }

    #[test]
    fn test_next_after_every() {
        let rec = Recurrence::parse("@every 20m").unwrap();
        let now = at(2026, 3, 2, 10, 5);
        assert_eq!(rec.next_after(now, Tz::UTC), Some(at(2026, 3, 2, 10, 25)));
    }

    #[test]
    fn test_next_after_cron_in_timezone() {
        let rec = Recurrence::parse("0 8 * * *").unwrap();
        let now = at(2026, 1, 15, 12, 0);
        // 08:00 in Paris is 07:00 UTC in winter.
        assert_eq!(
            rec.next_after(now, chrono_tz::Europe::Paris),
            Some(at(2026, 1, 16, 7, 0))
        );
        assert_eq!(rec.next_after(now, Tz::UTC), Some(at(2026, 1, 16, 8, 0)));
    }

    #[test]
    fn test_next_after_macro() {
        let rec = Recurrence::parse("@hourly").unwrap();
        assert_eq!(
            rec.next_after(at(2026, 1, 15, 12, 30), Tz::UTC),
            Some(at(2026, 1, 15, 13, 0))
        );
    }
}
