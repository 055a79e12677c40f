//! Task schedules: five-field cron expressions and simple intervals.
//!
//! The cron grammar is `minute hour day month weekday` with `*`, lists
//! (`a,b`), ranges (`a-b`), and steps (`*/n`, `a-b/n`). Weekday 0 is
//! Monday, matching `chrono::Weekday::num_days_from_monday`.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use stockpile_config::ScheduleSpec;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minute: Vec<u8>,
    hour: Vec<u8>,
    day: Vec<u8>,
    month: Vec<u8>,
    weekday: Vec<u8>,
}

impl CronSpec {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CoreError::bad_request(format!(
                "cron expression must have 5 fields: {expr}"
            )));
        }
        Ok(Self {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            weekday: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Whether the wall-clock minute of `at` matches.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.contains(&(at.minute() as u8))
            && self.hour.contains(&(at.hour() as u8))
            && self.day.contains(&(at.day() as u8))
            && self.month.contains(&(at.month() as u8))
            && self
                .weekday
                .contains(&(at.weekday().num_days_from_monday() as u8))
    }

    /// The next matching minute strictly after `after`. Bounded to a year
    /// of lookahead; anything sparser is a configuration error.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + chrono::Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

fn parse_field(field: &str, min: u8, max: u8) -> Result<Vec<u8>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| CoreError::bad_request(format!("bad cron step: {part}")))?;
                if step == 0 {
                    return Err(CoreError::bad_request(format!("zero cron step: {part}")));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let expanded: Vec<u8> = if range == "*" || range.is_empty() {
            (min..=max).collect()
        } else if let Some((start, end)) = range.split_once('-') {
            let start: u8 = start
                .parse()
                .map_err(|_| CoreError::bad_request(format!("bad cron range: {part}")))?;
            let end: u8 = end
                .parse()
                .map_err(|_| CoreError::bad_request(format!("bad cron range: {part}")))?;
            if start > end || start < min || end > max {
                return Err(CoreError::bad_request(format!("cron range out of bounds: {part}")));
            }
            (start..=end).collect()
        } else {
            let value: u8 = range
                .parse()
                .map_err(|_| CoreError::bad_request(format!("bad cron value: {part}")))?;
            if value < min || value > max {
                return Err(CoreError::bad_request(format!("cron value out of bounds: {part}")));
            }
            vec![value]
        };

        values.extend(expanded.into_iter().step_by(step));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

/// A runnable schedule: cron or fixed interval.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    Cron(CronSpec),
    Interval(Duration),
}

impl Schedule {
    pub fn from_spec(spec: &ScheduleSpec) -> Result<Self> {
        match spec.kind.as_str() {
            "cron" => {
                let expr = spec
                    .cron
                    .as_deref()
                    .ok_or_else(|| CoreError::bad_request("cron schedule without expression"))?;
                Ok(Schedule::Cron(CronSpec::parse(expr)?))
            }
            "interval" => {
                let secs = spec.interval.total_seconds();
                // An unset interval falls back to hourly rather than spinning.
                let secs = if secs == 0 { 3600 } else { secs };
                Ok(Schedule::Interval(Duration::from_secs(secs)))
            }
            other => Err(CoreError::bad_request(format!("unknown schedule kind: {other}"))),
        }
    }

    /// Whether a task with this schedule is due at `now`, given its last
    /// completed run.
    pub fn is_due(&self, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
        match self {
            Schedule::Cron(spec) => {
                if !spec.matches(now) {
                    return false;
                }
                // One firing per matching minute.
                !last_run.is_some_and(|last| {
                    last.timestamp() / 60 == now.timestamp() / 60
                })
            }
            Schedule::Interval(interval) => match last_run {
                None => true,
                Some(last) => (now - last).num_seconds() >= interval.as_secs() as i64,
            },
        }
    }

    pub fn next_run(&self, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(spec) => spec.next_after(now),
            Schedule::Interval(interval) => {
                let base = last_run.unwrap_or(now);
                Some(base + chrono::Duration::seconds(interval.as_secs() as i64))
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
    fn wildcard_fields_match_everything() {
        let spec = CronSpec::parse("* * * * *").unwrap();
        assert!(spec.matches(at(2026, 3, 14, 1, 59)));
    }

    #[test]
    fn fixed_time_matches_only_that_minute() {
        // 03:00 every day.
        let spec = CronSpec::parse("0 3 * * *").unwrap();
        assert!(spec.matches(at(2026, 1, 10, 3, 0)));
        assert!(!spec.matches(at(2026, 1, 10, 3, 1)));
        assert!(!spec.matches(at(2026, 1, 10, 4, 0)));
    }

    #[test]
    fn lists_ranges_and_steps_expand() {
        let spec = CronSpec::parse("*/15 8-10 1,15 * 0-4").unwrap();
        assert!(spec.matches(at(2026, 6, 1, 8, 45))); // Monday June 1 2026
        assert!(!spec.matches(at(2026, 6, 1, 8, 50)));
        assert!(!spec.matches(at(2026, 6, 2, 8, 45))); // day 2 not in 1,15
    }

    #[test]
    fn weekday_zero_is_monday() {
        let spec = CronSpec::parse("0 0 * * 0").unwrap();
        assert!(spec.matches(at(2026, 8, 3, 0, 0))); // a Monday
        assert!(!spec.matches(at(2026, 8, 2, 0, 0))); // a Sunday
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        assert!(CronSpec::parse("* * * *").is_err());
        assert!(CronSpec::parse("61 * * * *").is_err());
        assert!(CronSpec::parse("*/0 * * * *").is_err());
        assert!(CronSpec::parse("9-3 * * * *").is_err());
    }

    #[test]
    fn next_after_finds_the_following_match() {
        let spec = CronSpec::parse("30 2 * * *").unwrap();
        let next = spec.next_after(at(2026, 5, 20, 2, 30)).unwrap();
        assert_eq!(next, at(2026, 5, 21, 2, 30));
    }

    #[test]
    fn interval_due_only_after_elapsed() {
        let schedule = Schedule::Interval(Duration::from_secs(600));
        let now = at(2026, 1, 1, 12, 0);
        assert!(schedule.is_due(now, None));
        assert!(!schedule.is_due(now, Some(now - chrono::Duration::seconds(599))));
        assert!(schedule.is_due(now, Some(now - chrono::Duration::seconds(600))));
    }

    #[test]
    fn cron_fires_once_per_matching_minute() {
        let schedule = Schedule::Cron(CronSpec::parse("0 3 * * *").unwrap());
        let now = at(2026, 1, 10, 3, 0);
        assert!(schedule.is_due(now, None));
        assert!(!schedule.is_due(now, Some(now)));
        assert!(schedule.is_due(at(2026, 1, 11, 3, 0), Some(now)));
    }

    #[test]
    fn interval_spec_components_sum() {
        let spec = ScheduleSpec {
            enabled: true,
            kind: "interval".to_string(),
            cron: None,
            interval: stockpile_config::IntervalSpec {
                seconds: 30,
                minutes: 1,
                hours: 1,
                days: 0,
            },
        };
        match Schedule::from_spec(&spec).unwrap() {
            Schedule::Interval(d) => assert_eq!(d.as_secs(), 30 + 60 + 3600),
            other => panic!("expected interval, got {other:?}"),
        }
    }
}
