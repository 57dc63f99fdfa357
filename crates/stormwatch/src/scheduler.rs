//! Cron-driven trigger for monitoring passes.
//!
//! The `watch` command computes the next cron occurrence in the configured
//! timezone, sleeps until then, runs one pass, and repeats until the
//! shutdown signal fires. A pass that is still running when the next
//! occurrence comes due delays that occurrence; ticks are never queued.

use chrono::{DateTime, FixedOffset, Local, NaiveTime, Timelike, Utc};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tokio::sync::watch;

/// Errors from schedule parsing.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression: {0}")]
    CronParse(String),
    #[error("Invalid time of day: {0} (expected HH:MM)")]
    TimeParse(String),
    #[error("Invalid timezone: {0} (expected \"local\", \"UTC\" or an offset like \"+02:00\")")]
    Timezone(String),
}

type Result<T> = std::result::Result<T, SchedulerError>;

/// Timezone a schedule is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleTimezone {
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl FromStr for ScheduleTimezone {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "local" => return Ok(Self::Local),
            "utc" | "z" | "gmt" => return Ok(Self::Utc),
            _ => {}
        }
        trimmed
            .parse::<FixedOffset>()
            .map(Self::Fixed)
            .map_err(|_| SchedulerError::Timezone(s.to_string()))
    }
}

impl fmt::Display for ScheduleTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Utc => f.write_str("UTC"),
            Self::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

/// A parsed cron schedule bound to a timezone.
#[derive(Debug, Clone)]
pub struct Schedule {
    expr: String,
    schedule: cron::Schedule,
    timezone: ScheduleTimezone,
}

impl Schedule {
    pub fn new(cron_expr: &str, timezone: ScheduleTimezone) -> Result<Self> {
        let expr = normalize_cron_expr(cron_expr);
        let schedule = cron::Schedule::from_str(&expr)
            .map_err(|e| SchedulerError::CronParse(format!("{}: {}", cron_expr, e)))?;
        Ok(Self {
            expr,
            schedule,
            timezone,
        })
    }

    /// The normalized 6-field expression.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn timezone(&self) -> ScheduleTimezone {
        self.timezone
    }

    /// Next occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.timezone {
            ScheduleTimezone::Utc => self.schedule.after(&after).next(),
            ScheduleTimezone::Local => self
                .schedule
                .after(&after.with_timezone(&Local))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            ScheduleTimezone::Fixed(offset) => self
                .schedule
                .after(&after.with_timezone(&offset))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Convert a daily "HH:MM" time into a 5-field cron expression.
pub fn time_to_cron(time: &str) -> Result<String> {
    let parsed = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|_| SchedulerError::TimeParse(time.to_string()))?;
    Ok(format!("{} {} * * *", parsed.minute(), parsed.hour()))
}

/// Normalise a cron expression to 6-field format.
///
/// The `cron` crate expects 6 fields (sec min hr dom month dow). Standard
/// 5-field expressions get "0 " prepended to pin the seconds to zero.
fn normalize_cron_expr(expr: &str) -> String {
    let trimmed = expr.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Run `job` at every occurrence of `schedule` until shutdown.
///
/// The job receives no arguments; it is expected to hold its own clone of
/// the shutdown receiver if it needs to abort mid-pass.
pub async fn run_scheduler<F, Fut>(schedule: Schedule, mut job: F, mut shutdown: watch::Receiver<()>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    log::info!(
        "[Scheduler] starting ({} in {} time)",
        schedule.expression(),
        schedule.timezone()
    );

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            log::warn!("[Scheduler] schedule has no further occurrences, exiting");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        log::info!(
            "[Scheduler] next pass at {} (in {}s)",
            next.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            wait.as_secs()
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                log::info!("[Scheduler] running scheduled pass");
                job().await;
            }
            _ = shutdown.changed() => {
                log::info!("[Scheduler] shutdown signal received, exiting");
                break;
            }
        }

        if shutdown.has_changed().unwrap_or(true) {
            log::info!("[Scheduler] shutdown signal received, exiting");
            break;
        }
    }
}
