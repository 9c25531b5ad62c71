//! Render scheduling.
//!
//! The service runs in one of three modes, fixed at startup:
//!
//! - **Scheduled**: render every page at startup, then on every tick of a
//!   cron expression. Requests are served from the output store.
//! - **Eager**: no schedule. Stored images are deleted at startup and every
//!   request renders its page.
//! - **Once** (debug): render every page a single time and leave the tabs
//!   open for inspection.
//!
//! # Cron expressions
//!
//! Both the classic five-field form (`*/5 * * * *`) and the six/seven-field
//! form with seconds (`0 */5 * * * *`) are accepted. Day-of-week numbers use
//! the classic numbering, 0 to 6 starting on Sunday with 7 also meaning
//! Sunday; names (`Mon-Fri`) work as usual.
//!
//! ```rust,ignore
//! use hass_eink::schedule::{start, Mode};
//!
//! let mode = Mode::from_config(&config)?;
//! let ticker = start(service.clone(), mode).await;
//! ```

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Error;
use crate::service::Service;

/// A cron schedule evaluated in a fixed timezone.
#[derive(Debug, Clone)]
pub struct RenderSchedule {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl RenderSchedule {
    /// Parse a cron expression and an IANA timezone name.
    ///
    /// # Example
    ///
    /// ```
    /// use hass_eink::schedule::RenderSchedule;
    ///
    /// let schedule = RenderSchedule::parse("*/5 * * * *", "Europe/Berlin").unwrap();
    /// assert_eq!(schedule.expression(), "0 */5 * * * *");
    /// ```
    pub fn parse(expression: &str, timezone: &str) -> Result<Self, Error> {
        let expression = normalize(expression);
        let schedule = Schedule::from_str(&expression).map_err(|e| {
            Error::Config(format!("Invalid cron expression '{}': {}", expression, e))
        })?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|e| Error::Config(format!("Invalid timezone '{}': {}", timezone, e)))?;

        Ok(Self {
            expression,
            schedule,
            timezone,
        })
    }

    /// Normalized expression (always with a seconds field).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|tick| tick.with_timezone(&Utc))
    }
}

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite an expression into the `cron` crate's dialect.
///
/// Five-field expressions get a zero seconds field. Numeric day-of-week
/// values are spelled out as names, since the crate counts Sunday as 1.
fn normalize(expression: &str) -> String {
    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    if fields.len() == 5 {
        fields.insert(0, "0".to_string());
    }
    if let Some(days) = fields.get_mut(5) {
        *days = days
            .split(',')
            .map(weekday_item)
            .collect::<Vec<_>>()
            .join(",");
    }
    fields.join(" ")
}

/// Translate one day-of-week list item (`1`, `1-5`, `0-6/2`, `2/3`).
///
/// Names, `*` and out-of-range numbers are passed through to the parser.
fn weekday_item(item: &str) -> String {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => match step.parse::<usize>() {
            Ok(step) if step > 0 => (base, Some(step)),
            _ => return item.to_string(),
        },
        None => (item, None),
    };

    let bounds = match base.split_once('-') {
        Some((start, end)) => start.parse::<usize>().ok().zip(end.parse::<usize>().ok()),
        None => base
            .parse::<usize>()
            .ok()
            .map(|day| (day, if step.is_some() { day.max(6) } else { day })),
    };
    let Some((start, end)) = bounds.filter(|(start, end)| start <= end && *end <= 7) else {
        return item.to_string();
    };

    let mut days: Vec<usize> = (start..=end)
        .step_by(step.unwrap_or(1))
        .map(|day| day % 7)
        .collect();
    days.sort_unstable();
    days.dedup();
    days.iter()
        .map(|day| WEEKDAYS[*day])
        .collect::<Vec<_>>()
        .join(",")
}

/// How renders are triggered.
#[derive(Debug, Clone)]
pub enum Mode {
    /// Render on every request; no stored images
    Eager,
    /// Render at startup and on every tick
    Scheduled(RenderSchedule),
    /// Render once at startup (debug)
    Once,
}

impl Mode {
    /// Pick the mode: debug wins over eager, eager over the schedule.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        if config.debug {
            Ok(Mode::Once)
        } else if config.eager_render {
            Ok(Mode::Eager)
        } else {
            RenderSchedule::parse(&config.cron_job, &config.cron_timezone).map(Mode::Scheduled)
        }
    }
}

/// Prepare the service for `mode` and start the schedule, if any.
///
/// Returns once the startup work (first render or cache clearing) is done.
/// The returned task runs the recurring renders.
pub async fn start(service: Arc<Service>, mode: Mode) -> Option<JoinHandle<()>> {
    match mode {
        Mode::Once => {
            tracing::info!(
                "Debug mode active, will only render once in non-headless mode and keep pages open"
            );
            service.render_batch().await;
            None
        }
        Mode::Eager => {
            tracing::info!(
                "Eager render configured, so skipping initial render and disabling schedule..."
            );
            service.clear_outputs().await;
            None
        }
        Mode::Scheduled(schedule) => {
            tracing::info!("Starting first render...");
            service.render_batch().await;

            tracing::info!("Starting rendering schedule '{}'...", schedule.expression());
            Some(tokio::spawn(run(service, schedule)))
        }
    }
}

async fn run(service: Arc<Service>, schedule: RenderSchedule) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            tracing::warn!("Schedule '{}' has no upcoming runs", schedule.expression());
            return;
        };

        tracing::debug!("Next render at {}", next);
        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;
        service.render_batch().await;
    }
}
