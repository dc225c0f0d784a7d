//! Schedule parsing and next occurrence calculation.
//!
//! A raw schedule is either a recurring cron expression or an absolute
//! timestamp. Recurring expressions support the standard 5-field form
//! (`minute hour day-of-month month day-of-week`), the 6-field form with a
//! leading seconds field, and the `@daily`-style shortcuts. Evaluation is a
//! pure function of the parsed fields and a reference instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or evaluating schedules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Neither a cron expression nor a timestamp.
    #[error("invalid schedule format: {0}")]
    InvalidSchedule(String),

    /// The expression is valid but never fires again.
    #[error("schedule has no future occurrences: {0}")]
    NoMoreOccurrences(String),
}

/// Whether a schedule fires once or repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fires exactly once at a fixed instant.
    OneShot,
    /// Fires on every instant matching the cron fields.
    Recurring,
}

/// Day names understood by the `cron` crate, indexed by POSIX ordinal.
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed schedule.
///
/// Serializes as its normalized string, so a persisted job round-trips
/// through [`Schedule::parse`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    /// Normalized form of the raw input.
    normalized: String,
    /// Parsed representation.
    schedule_type: ScheduleType,
}

#[derive(Clone)]
enum ScheduleType {
    Recurring(Box<CronSchedule>),
    OneShot(DateTime<Utc>),
}

impl Schedule {
    /// Parse a raw schedule.
    ///
    /// Recurring syntax is tried first, then absolute timestamps:
    /// - RFC 3339 (`2024-12-31T23:59:59Z`, with or without offset)
    /// - RFC 2822
    /// - naive `YYYY-MM-DD HH:MM[:SS[.fff]]` (with `T` or space), read as UTC
    /// - bare `YYYY-MM-DD`, read as midnight UTC
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::InvalidSchedule("schedule is empty".into()));
        }

        let cron_error = match Self::parse_recurring(trimmed) {
            Ok((normalized, schedule)) => {
                return Ok(Self {
                    normalized,
                    schedule_type: ScheduleType::Recurring(Box::new(schedule)),
                });
            }
            Err(e) => e,
        };

        match parse_timestamp(trimmed) {
            Some(at) => Ok(Self {
                normalized: at.to_rfc3339_opts(SecondsFormat::Millis, true),
                schedule_type: ScheduleType::OneShot(at),
            }),
            None => Err(ScheduleError::InvalidSchedule(format!(
                "'{}' is neither a cron expression nor a timestamp ({})",
                trimmed, cron_error
            ))),
        }
    }

    /// Parse a recurring expression into its normalized form and cron schedule.
    fn parse_recurring(expression: &str) -> Result<(String, CronSchedule), String> {
        if expression.starts_with('@') {
            let lowered = expression.to_lowercase();
            let expanded = match lowered.as_str() {
                "@yearly" | "@annually" => "0 0 1 1 *",
                "@monthly" => "0 0 1 * *",
                "@weekly" => "0 0 * * 0",
                "@daily" | "@midnight" => "0 0 * * *",
                "@hourly" => "0 * * * *",
                _ => return Err(format!("unknown shortcut: {}", expression)),
            };
            let (_, schedule) = Self::parse_recurring(expanded)?;
            return Ok((lowered, schedule));
        }

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (seconds, rest) = match fields.len() {
            5 => ("0", &fields[..]),
            6 => (fields[0], &fields[1..]),
            n => return Err(format!("expected 5 or 6 fields, got {}", n)),
        };

        let day_of_week = translate_day_of_week(rest[4])?;
        let cron_expr = format!(
            "{} {} {} {} {} {}",
            seconds, rest[0], rest[1], rest[2], rest[3], day_of_week
        );

        let schedule = CronSchedule::from_str(&cron_expr).map_err(|e| e.to_string())?;
        Ok((fields.join(" "), schedule))
    }

    /// Next eligible run time relative to `now`.
    ///
    /// Recurring schedules return the smallest matching instant strictly after
    /// `now`. One-shot schedules return their timestamp verbatim, even when it
    /// lies in the past, so a past one-shot is immediately eligible.
    pub fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.schedule_type {
            ScheduleType::Recurring(schedule) => schedule.after(&now).next(),
            ScheduleType::OneShot(at) => Some(*at),
        }
    }

    /// Next run time after a successful execution finishing at `now`.
    ///
    /// One-shot schedules are exhausted after they run once.
    pub fn next_after_completion(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.schedule_type {
            ScheduleType::Recurring(schedule) => schedule.after(&now).next(),
            ScheduleType::OneShot(_) => None,
        }
    }

    /// Up to `n` upcoming run times after `now`.
    pub fn upcoming(&self, now: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        match &self.schedule_type {
            ScheduleType::Recurring(schedule) => schedule.after(&now).take(n).collect(),
            ScheduleType::OneShot(at) => std::iter::once(*at).take(n).collect(),
        }
    }

    /// The kind of this schedule.
    pub fn kind(&self) -> ScheduleKind {
        match self.schedule_type {
            ScheduleType::Recurring(_) => ScheduleKind::Recurring,
            ScheduleType::OneShot(_) => ScheduleKind::OneShot,
        }
    }

    /// The normalized expression or timestamp.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Schedule {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.normalized
    }
}

impl PartialEq for Schedule {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Schedule {}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("kind", &self.kind())
            .field("normalized", &self.normalized)
            .finish()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Parse an absolute timestamp in any of the accepted layouts.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Rewrite a POSIX day-of-week field (0-7, Sunday = 0 or 7) into day names.
///
/// The `cron` crate numbers days 1-7 from Sunday, so numeric fields cannot be
/// passed through. Expanding to an explicit name list keeps lists, ranges and
/// steps exact.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok("*".to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step: {}", item))?;
                if step == 0 {
                    return Err(format!("invalid day-of-week step: {}", item));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (day_ordinal(a)?, day_ordinal(b)?)
        } else {
            let day = day_ordinal(range)?;
            // `n/step` runs from n to the end of the week
            if step.is_some() { (day, 6) } else { (day, day) }
        };

        if start > end {
            return Err(format!("invalid day-of-week range: {}", item));
        }

        let step = step.unwrap_or(1) as usize;
        for day in (start..=end).step_by(step) {
            days[day as usize % 7] = true;
        }
    }

    if days.iter().all(|d| *d) {
        return Ok("*".to_string());
    }

    let names: Vec<&str> = DAY_NAMES
        .iter()
        .zip(days.iter())
        .filter(|(_, selected)| **selected)
        .map(|(name, _)| *name)
        .collect();
    Ok(names.join(","))
}

/// Ordinal 0-7 for a day-of-week token (number or three-letter name).
fn day_ordinal(token: &str) -> Result<u32, String> {
    if let Ok(n) = token.parse::<u32>() {
        return if n <= 7 {
            Ok(n)
        } else {
            Err(format!("day-of-week out of range: {}", token))
        };
    }
    let upper = token.to_uppercase();
    DAY_NAMES
        .iter()
        .position(|name| *name == upper)
        .map(|idx| idx as u32)
        .ok_or_else(|| format!("invalid day-of-week: {}", token))
}
