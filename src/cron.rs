//! # Cron Expressions
//!
//! Pure parsing and fire-time computation for 5-field crontab expressions
//! (`minute hour day-of-month month day-of-week`). Parsing is separated from
//! wall-clock scheduling so fire times can be computed against any reference
//! instant, which keeps the scheduler testable with an injected clock.
//!
//! Invalid expressions are rejected when a repo config is written, never at
//! fire time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

/// Upper bound on the forward search, in days. Covers every reachable
/// 5-field expression including `0 0 29 2 *`.
const MAX_SEARCH_DAYS: i64 = 366 * 5;

/// Errors produced while parsing a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    #[error("expected 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("{field} value {value} out of range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("invalid step in {field} field '{value}'")]
    InvalidStep { field: &'static str, value: String },
}

/// A parsed 5-field crontab expression.
///
/// Each field is kept as a bitmask over its value range. Day-of-month and
/// day-of-week follow the classic crontab rule: when both are restricted, a
/// day matches if either field matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
    source: String,
}

impl CronExpr {
    /// Parse a standard 5-field crontab expression.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::WrongFieldCount(fields.len()));
        }

        let (minutes, _) = parse_field(fields[0], "minute", 0, 59)?;
        let (hours, _) = parse_field(fields[1], "hour", 0, 23)?;
        let (days_of_month, dom_restricted) = parse_field(fields[2], "day-of-month", 1, 31)?;
        let (months, _) = parse_field(fields[3], "month", 1, 12)?;
        let (days_of_week, dow_restricted) = parse_dow_field(fields[4])?;

        Ok(Self {
            minutes,
            hours: hours as u32,
            days_of_month: days_of_month as u32,
            months: months as u16,
            days_of_week,
            dom_restricted,
            dow_restricted,
            source: expr.to_string(),
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compute the first fire time strictly after `after`.
    ///
    /// Pure function of the expression and the reference instant; returns
    /// `None` only for expressions that never fire within the search horizon.
    pub fn next_fire_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(Duration::minutes(1))?;
        let start_date = start.date_naive();

        for day_offset in 0..MAX_SEARCH_DAYS {
            let date = start_date.checked_add_signed(Duration::days(day_offset))?;
            if !self.month_matches(date) || !self.day_matches(date) {
                continue;
            }

            let same_day = day_offset == 0;
            for hour in 0..24u32 {
                if self.hours & (1 << hour) == 0 {
                    continue;
                }
                if same_day && hour < start.hour() {
                    continue;
                }
                for minute in 0..60u32 {
                    if self.minutes & (1u64 << minute) == 0 {
                        continue;
                    }
                    if same_day && hour == start.hour() && minute < start.minute() {
                        continue;
                    }
                    let fire = date.and_hms_opt(hour, minute, 0)?.and_utc();
                    if fire >= start {
                        return Some(fire);
                    }
                }
            }
        }

        None
    }

    fn month_matches(&self, date: NaiveDate) -> bool {
        self.months & (1 << date.month()) != 0
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse one field into a bitmask, reporting whether it restricts the range.
fn parse_field(
    spec: &str,
    field: &'static str,
    min: u32,
    max: u32,
) -> Result<(u64, bool), CronParseError> {
    let mut mask: u64 = 0;
    let mut restricted = false;

    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| CronParseError::InvalidStep {
                    field,
                    value: part.to_string(),
                })?;
                if step == 0 {
                    return Err(CronParseError::InvalidStep {
                        field,
                        value: part.to_string(),
                    });
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            if step != 1 {
                restricted = true;
            }
            (min, max)
        } else {
            restricted = true;
            match range.split_once('-') {
                Some((lo, hi)) => {
                    let lo = parse_value(lo, field, min, max)?;
                    let hi = parse_value(hi, field, min, max)?;
                    if lo > hi {
                        return Err(CronParseError::InvalidField {
                            field,
                            value: part.to_string(),
                        });
                    }
                    (lo, hi)
                }
                None => {
                    let value = parse_value(range, field, min, max)?;
                    (value, value)
                }
            }
        };

        let mut value = lo;
        while value <= hi {
            mask |= 1u64 << value;
            value += step;
        }
    }

    if mask == 0 {
        return Err(CronParseError::InvalidField {
            field,
            value: spec.to_string(),
        });
    }

    Ok((mask, restricted))
}

/// Day-of-week accepts 0..=7 where both 0 and 7 mean Sunday.
fn parse_dow_field(spec: &str) -> Result<(u8, bool), CronParseError> {
    let (mask, restricted) = parse_field(spec, "day-of-week", 0, 7)?;
    let mut folded = (mask & 0x7f) as u8;
    if mask & (1 << 7) != 0 {
        folded |= 1;
    }
    Ok((folded, restricted))
}

fn parse_value(
    text: &str,
    field: &'static str,
    min: u32,
    max: u32,
) -> Result<u32, CronParseError> {
    let value: u32 = text.parse().map_err(|_| CronParseError::InvalidField {
        field,
        value: text.to_string(),
    })?;
    if value < min || value > max {
        return Err(CronParseError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}
