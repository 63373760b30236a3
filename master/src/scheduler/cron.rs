//! Standard 5-field cron (`minute hour day month weekday`) evaluated
//! against UTC. `next_fire` scans forward minute-by-minute from
//! `last_exec_time`, bounded by a configurable horizon so a malformed
//! expression can't spin forever — malformed expressions are rejected at
//! validation time instead (see [`CronSchedule::parse`]).

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{MasterError, MasterResult};

#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: FieldMatch,
    hour: FieldMatch,
    day_of_month: FieldMatch,
    month: FieldMatch,
    day_of_week: FieldMatch,
}

#[derive(Debug, Clone)]
enum FieldMatch {
    Any,
    Values(Vec<u32>),
}

impl FieldMatch {
    fn matches(&self, value: u32) -> bool {
        match self {
            FieldMatch::Any => true,
            FieldMatch::Values(values) => values.contains(&value),
        }
    }

    fn parse(field: &str, min: u32, max: u32) -> MasterResult<Self> {
        if field == "*" {
            return Ok(FieldMatch::Any);
        }
        let mut values = Vec::new();
        for part in field.split(',') {
            if let Some((range, step)) = part.split_once('/') {
                let step: u32 = step
                    .parse()
                    .map_err(|_| MasterError::InvalidCron(field.to_string()))?;
                let (start, end) = if range == "*" {
                    (min, max)
                } else if let Some((a, b)) = range.split_once('-') {
                    (
                        a.parse().map_err(|_| MasterError::InvalidCron(field.to_string()))?,
                        b.parse().map_err(|_| MasterError::InvalidCron(field.to_string()))?,
                    )
                } else {
                    (
                        range.parse().map_err(|_| MasterError::InvalidCron(field.to_string()))?,
                        max,
                    )
                };
                let mut v = start;
                while v <= end {
                    values.push(v);
                    v += step;
                }
            } else if let Some((a, b)) = part.split_once('-') {
                let a: u32 = a.parse().map_err(|_| MasterError::InvalidCron(field.to_string()))?;
                let b: u32 = b.parse().map_err(|_| MasterError::InvalidCron(field.to_string()))?;
                if a > b || b > max {
                    return Err(MasterError::InvalidCron(field.to_string()));
                }
                values.extend(a..=b);
            } else {
                let v: u32 = part.parse().map_err(|_| MasterError::InvalidCron(field.to_string()))?;
                if v < min || v > max {
                    return Err(MasterError::InvalidCron(field.to_string()));
                }
                values.push(v);
            }
        }
        if values.is_empty() {
            return Err(MasterError::InvalidCron(field.to_string()));
        }
        Ok(FieldMatch::Values(values))
    }
}

impl CronSchedule {
    pub fn parse(expression: &str) -> MasterResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(MasterError::InvalidCron(expression.to_string()));
        }
        Ok(Self {
            minute: FieldMatch::parse(fields[0], 0, 59)?,
            hour: FieldMatch::parse(fields[1], 0, 23)?,
            day_of_month: FieldMatch::parse(fields[2], 1, 31)?,
            month: FieldMatch::parse(fields[3], 1, 12)?,
            day_of_week: FieldMatch::parse(fields[4], 0, 6)?,
        })
    }

    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day_of_month.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }

    /// Scans forward minute-by-minute from `after`, giving up after
    /// `horizon_minutes` to bound the search.
    pub fn next_fire(&self, after: DateTime<Utc>, horizon_minutes: u32) -> Option<DateTime<Utc>> {
        let start = after
            .with_second(0)
            .unwrap_or(after)
            .with_nanosecond(0)
            .unwrap_or(after)
            + Duration::minutes(1);
        let mut cursor = start;
        for _ in 0..horizon_minutes {
            if self.matches(cursor) {
                return Some(cursor);
            }
            cursor += Duration::minutes(1);
        }
        None
    }
}
