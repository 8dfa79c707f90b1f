//! Five-field cron expression dialect used by broadcast schedules.
//!
//! Supported grammar per field: `*`, single values, lists (`a,b,c`), ranges
//! (`a-b`), and steps (`*/n`, `a-b/n`). Fields are minute, hour, day of
//! month, month, day of week (0-6, 0 = Sunday, 7 accepted as an alias).
//! Restricted day-of-month and day-of-week combine conjunctively. Evaluation
//! is calendar arithmetic over naive local wall time; the zone itself is
//! supplied by the caller's [`crate::clock::Clock`].

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use thiserror::Error;

/// Errors raised while parsing a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields (min hr dom mon dow), got {0}")]
    FieldCount(usize),
    #[error("{field}: invalid value `{text}`")]
    InvalidValue { field: &'static str, text: String },
    #[error("{field}: {value} out of range {lo}-{hi}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        lo: u8,
        hi: u8,
    },
    #[error("{field}: step must be positive")]
    ZeroStep { field: &'static str },
}

/// One parsed cron field: either unrestricted or an explicit value set.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Values(BTreeSet<u8>),
}

impl CronField {
    fn contains(&self, value: u8) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => values.contains(&value),
        }
    }

    /// Whether the field admits every value of its domain.
    fn covers(&self, lo: u8, hi: u8) -> bool {
        match self {
            CronField::Any => true,
            CronField::Values(values) => (lo..=hi).all(|v| values.contains(&v)),
        }
    }
}

/// A validated five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
    source: String,
}

impl CronExpr {
    /// Parse a five-field expression, normalising whitespace.
    pub fn parse(text: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let minute = parse_field(fields[0], "minute", 0, 59)?;
        let hour = parse_field(fields[1], "hour", 0, 23)?;
        let dom = parse_field(fields[2], "day of month", 1, 31)?;
        let month = parse_field(fields[3], "month", 1, 12)?;
        let dow = parse_dow(fields[4])?;

        Ok(CronExpr {
            minute,
            hour,
            dom,
            month,
            dow,
            source: fields.join(" "),
        })
    }

    /// Whether the minute field fires every minute (`*` or a full list).
    ///
    /// Such schedules get no pre-fetch job: a five-minute lead would always
    /// land on another firing.
    pub fn fires_every_minute(&self) -> bool {
        self.minute.covers(0, 59)
    }

    /// First firing strictly after `after`, or `None` when no match exists
    /// within a four-year horizon (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let floor = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after);
        let mut t = floor + Duration::minutes(1);
        let horizon = after + Duration::days(365 * 4 + 1);

        while t <= horizon {
            if !self.date_matches(t) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.contains(t.hour() as u8) {
                t = t
                    .with_minute(0)
                    .map(|top| top + Duration::hours(1))
                    .unwrap_or(t + Duration::hours(1));
                continue;
            }
            if !self.minute.contains(t.minute() as u8) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    fn date_matches(&self, t: NaiveDateTime) -> bool {
        self.month.contains(t.month() as u8)
            && self.dom.contains(t.day() as u8)
            && self
                .dow
                .contains(t.weekday().num_days_from_sunday() as u8)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse the day-of-week field, folding the `7` alias onto Sunday.
fn parse_dow(text: &str) -> Result<CronField, CronError> {
    match parse_field(text, "day of week", 0, 7)? {
        CronField::Any => Ok(CronField::Any),
        CronField::Values(values) => Ok(CronField::Values(
            values.into_iter().map(|v| if v == 7 { 0 } else { v }).collect(),
        )),
    }
}

fn parse_field(text: &str, field: &'static str, lo: u8, hi: u8) -> Result<CronField, CronError> {
    if text == "*" {
        return Ok(CronField::Any);
    }

    let mut values = BTreeSet::new();
    for item in text.split(',') {
        parse_item(item, field, lo, hi, &mut values)?;
    }
    if values.is_empty() {
        return Err(CronError::InvalidValue {
            field,
            text: text.to_string(),
        });
    }
    Ok(CronField::Values(values))
}

fn parse_item(
    item: &str,
    field: &'static str,
    lo: u8,
    hi: u8,
    values: &mut BTreeSet<u8>,
) -> Result<(), CronError> {
    let invalid = || CronError::InvalidValue {
        field,
        text: item.to_string(),
    };

    let (base, step) = match item.split_once('/') {
        Some((base, step_text)) => {
            let step: u8 = step_text.parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(CronError::ZeroStep { field });
            }
            (base, step)
        }
        None => (item, 1),
    };

    let (start, end) = if base == "*" {
        (lo, hi)
    } else if let Some((a, b)) = base.split_once('-') {
        let start = parse_bounded(a, field, lo, hi)?;
        let end = parse_bounded(b, field, lo, hi)?;
        if start > end {
            return Err(invalid());
        }
        (start, end)
    } else {
        let value = parse_bounded(base, field, lo, hi)?;
        // A bare value with a step (e.g. `5/10`) is not part of the dialect.
        if step != 1 {
            return Err(invalid());
        }
        (value, value)
    };

    let mut v = start;
    while v <= end {
        values.insert(v);
        match v.checked_add(step) {
            Some(next) => v = next,
            None => break,
        }
    }
    Ok(())
}

fn parse_bounded(text: &str, field: &'static str, lo: u8, hi: u8) -> Result<u8, CronError> {
    let value: u32 = text.parse().map_err(|_| CronError::InvalidValue {
        field,
        text: text.to_string(),
    })?;
    if value < lo as u32 || value > hi as u32 {
        return Err(CronError::OutOfRange {
            field,
            value,
            lo,
            hi,
        });
    }
    Ok(value as u8)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(CronExpr::parse("0 17 * *"), Err(CronError::FieldCount(4)));
        assert_eq!(
            CronExpr::parse("0 17 * * 1 extra"),
            Err(CronError::FieldCount(6))
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            CronExpr::parse("60 * * * *"),
            Err(CronError::OutOfRange { field: "minute", value: 60, .. })
        ));
        assert!(matches!(
            CronExpr::parse("0 24 * * *"),
            Err(CronError::OutOfRange { field: "hour", .. })
        ));
        assert!(matches!(
            CronExpr::parse("0 0 0 * *"),
            Err(CronError::OutOfRange { field: "day of month", .. })
        ));
    }

    #[test]
    fn rejects_garbage_and_zero_steps() {
        assert!(matches!(
            CronExpr::parse("a * * * *"),
            Err(CronError::InvalidValue { .. })
        ));
        assert!(matches!(
            CronExpr::parse("*/0 * * * *"),
            Err(CronError::ZeroStep { field: "minute" })
        ));
        assert!(matches!(
            CronExpr::parse("10-5 * * * *"),
            Err(CronError::InvalidValue { .. })
        ));
    }

    #[test]
    fn dow_seven_is_sunday() {
        let with_seven = CronExpr::parse("0 9 * * 7").unwrap();
        let with_zero = CronExpr::parse("0 9 * * 0").unwrap();
        let after = at(2024, 3, 11, 0, 0); // a Monday
        assert_eq!(with_seven.next_after(after), with_zero.next_after(after));
        assert_eq!(with_seven.next_after(after), Some(at(2024, 3, 17, 9, 0)));
    }

    #[test]
    fn next_simple_daily() {
        let expr = CronExpr::parse("0 17 * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 16, 55)),
            Some(at(2024, 3, 11, 17, 0))
        );
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 17, 0)),
            Some(at(2024, 3, 12, 17, 0))
        );
    }

    #[test]
    fn next_respects_weekday_range() {
        let expr = CronExpr::parse("0 17 * * 1-5").unwrap();
        // Friday 17:00 fired; next is Monday.
        assert_eq!(
            expr.next_after(at(2024, 3, 15, 17, 0)),
            Some(at(2024, 3, 18, 17, 0))
        );
    }

    #[test]
    fn next_respects_dow_list() {
        let expr = CronExpr::parse("30 8 * * 0,1,2,3,4,5,6").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 8, 30)),
            Some(at(2024, 3, 12, 8, 30))
        );

        let weekend = CronExpr::parse("15 20 * * 0,6").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 8, 29)),
            Some(at(2024, 3, 11, 8, 30))
        );
        assert_eq!(
            weekend.next_after(at(2024, 3, 11, 0, 0)),
            Some(at(2024, 3, 16, 20, 15))
        );
    }

    #[test]
    fn next_with_minute_steps() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 10, 0)),
            Some(at(2024, 3, 11, 10, 15))
        );
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 10, 46)),
            Some(at(2024, 3, 11, 11, 0))
        );
    }

    #[test]
    fn next_with_stepped_range() {
        let expr = CronExpr::parse("10-30/10 14 * * *").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 14, 10)),
            Some(at(2024, 3, 11, 14, 20))
        );
        assert_eq!(
            expr.next_after(at(2024, 3, 11, 14, 30)),
            Some(at(2024, 3, 12, 14, 10))
        );
    }

    #[test]
    fn next_skips_short_months() {
        let expr = CronExpr::parse("0 0 31 * *").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 4, 1, 0, 0)),
            Some(at(2024, 5, 31, 0, 0))
        );
    }

    #[test]
    fn next_respects_month_field() {
        let expr = CronExpr::parse("0 12 1 6 *").unwrap();
        assert_eq!(
            expr.next_after(at(2024, 7, 2, 0, 0)),
            Some(at(2025, 6, 1, 12, 0))
        );
    }

    #[test]
    fn impossible_date_yields_none() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn every_minute_detection() {
        assert!(CronExpr::parse("* * * * *").unwrap().fires_every_minute());
        assert!(CronExpr::parse("*/1 10 * * *").unwrap().fires_every_minute());
        assert!(!CronExpr::parse("*/5 * * * *").unwrap().fires_every_minute());
        assert!(!CronExpr::parse("0 17 * * *").unwrap().fires_every_minute());
    }

    #[test]
    fn display_normalises_whitespace() {
        let expr = CronExpr::parse("  0   17 * *   1-5 ").unwrap();
        assert_eq!(expr.to_string(), "0 17 * * 1-5");
        assert_eq!(CronExpr::parse(&expr.to_string()), Ok(expr));
    }

    #[test]
    fn seconds_are_truncated_before_stepping() {
        let expr = CronExpr::parse("5 10 * * *").unwrap();
        let after = NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(10, 4, 59)
            .unwrap();
        assert_eq!(expr.next_after(after), Some(at(2024, 3, 11, 10, 5)));
    }
}
