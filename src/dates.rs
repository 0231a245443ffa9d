use crate::error::{IndicatorError, Result};
use chrono::{Datelike, Months, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Calendar resolution of a calculation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    #[default]
    Month,
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    first
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

pub fn next_month_end(date: NaiveDate) -> NaiveDate {
    let first = date.with_day(1).unwrap_or(date);
    match first.checked_add_months(Months::new(1)) {
        Some(next) => last_day_of_month(next),
        None => NaiveDate::MAX,
    }
}

pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Parses the date formats seen in balance exports: `YYYY-MM-DD`,
/// `DD/MM/YYYY`, and timestamps whose first ten characters are an ISO date.
pub fn parse_balance_date(raw: &str) -> Result<NaiveDate> {
    let s = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return Ok(date);
    }
    if let Some(prefix) = s.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Ok(date);
        }
    }

    Err(IndicatorError::InvalidDate(format!(
        "'{}'. Expected YYYY-MM-DD or DD/MM/YYYY",
        raw
    )))
}

pub fn get_month_ends_in_period(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();

    let mut current = last_day_of_month(start);
    while current <= end {
        if current >= start {
            dates.push(current);
        }
        if current == NaiveDate::MAX {
            break;
        }
        current = next_month_end(current);
    }

    dates
}

/// Dates to calculate for a range.
///
/// `Day` yields every calendar day. `Month` yields the last day of every
/// month in the range, and the end date itself is always included even when
/// it is not a month end. The result is sorted and free of duplicates.
pub fn generate_date_range(
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
) -> Result<Vec<NaiveDate>> {
    if start > end {
        return Err(IndicatorError::InvalidDateRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    let mut dates = match granularity {
        Granularity::Day => start.iter_days().take_while(|d| *d <= end).collect(),
        Granularity::Month => {
            let mut dates = get_month_ends_in_period(start, end);
            dates.push(end);
            dates
        }
    };

    dates.sort();
    dates.dedup();
    Ok(dates)
}

/// Parses a period string in the format "YYYY-MM" or "YYYY-MM:YYYY-MM"
/// into the first day of the start month and the last day of the end month.
pub fn parse_period_string(period: &str) -> Result<(NaiveDate, NaiveDate)> {
    let parts: Vec<&str> = period.split(':').collect();

    let parse_month = |part: &str| -> Result<NaiveDate> {
        NaiveDate::parse_from_str(&format!("{}-01", part.trim()), "%Y-%m-%d").map_err(|_| {
            IndicatorError::InvalidPeriod(format!(
                "Invalid month '{}' in period '{}'. Expected YYYY-MM",
                part, period
            ))
        })
    };

    let (start, end_ref) = match parts.as_slice() {
        [single] => {
            let start = parse_month(single)?;
            (start, start)
        }
        [from, to] => (parse_month(from)?, parse_month(to)?),
        _ => {
            return Err(IndicatorError::InvalidPeriod(format!(
                "Invalid period format: {}. Expected 'YYYY-MM' or 'YYYY-MM:YYYY-MM'",
                period
            )))
        }
    };

    let end = last_day_of_month(end_ref);
    if end < start {
        return Err(IndicatorError::InvalidDateRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(ymd(2023, 2, 10)), ymd(2023, 2, 28));
        assert_eq!(last_day_of_month(ymd(2024, 2, 1)), ymd(2024, 2, 29));
        assert_eq!(last_day_of_month(ymd(2023, 12, 31)), ymd(2023, 12, 31));
    }

    #[test]
    fn test_next_month_end() {
        assert_eq!(next_month_end(ymd(2023, 1, 31)), ymd(2023, 2, 28));
        assert_eq!(next_month_end(ymd(2023, 12, 31)), ymd(2024, 1, 31));
    }

    #[test]
    fn test_parse_balance_date_formats() {
        assert_eq!(parse_balance_date("2024-03-05").unwrap(), ymd(2024, 3, 5));
        assert_eq!(parse_balance_date("05/03/2024").unwrap(), ymd(2024, 3, 5));
        assert_eq!(
            parse_balance_date("2024-03-05T00:00:00.000Z").unwrap(),
            ymd(2024, 3, 5)
        );
        assert!(parse_balance_date("03-05-2024").is_err());
        assert!(parse_balance_date("").is_err());
    }

    #[test]
    fn test_monthly_range_forces_end_date() {
        let dates = generate_date_range(ymd(2024, 1, 15), ymd(2024, 4, 10), Granularity::Month)
            .unwrap();
        assert_eq!(
            dates,
            vec![ymd(2024, 1, 31), ymd(2024, 2, 29), ymd(2024, 3, 31), ymd(2024, 4, 10)]
        );
    }

    #[test]
    fn test_monthly_range_end_on_month_end_is_not_duplicated() {
        let dates = generate_date_range(ymd(2024, 1, 1), ymd(2024, 3, 31), Granularity::Month)
            .unwrap();
        assert_eq!(dates, vec![ymd(2024, 1, 31), ymd(2024, 2, 29), ymd(2024, 3, 31)]);
    }

    #[test]
    fn test_daily_range_is_inclusive() {
        let dates =
            generate_date_range(ymd(2024, 2, 27), ymd(2024, 3, 1), Granularity::Day).unwrap();
        assert_eq!(dates.len(), 4);
        assert_eq!(dates.first(), Some(&ymd(2024, 2, 27)));
        assert_eq!(dates.last(), Some(&ymd(2024, 3, 1)));
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        assert!(generate_date_range(ymd(2024, 3, 1), ymd(2024, 1, 1), Granularity::Day).is_err());
    }

    #[test]
    fn test_parse_period_string_month_and_range() {
        let (start, end) = parse_period_string("2023-02").unwrap();
        assert_eq!(start, ymd(2023, 2, 1));
        assert_eq!(end, ymd(2023, 2, 28));

        let (start, end) = parse_period_string("2023-01:2023-03").unwrap();
        assert_eq!(start, ymd(2023, 1, 1));
        assert_eq!(end, ymd(2023, 3, 31));

        assert!(parse_period_string("2023-13").is_err());
        assert!(parse_period_string("2023-05:2023-01").is_err());
    }
}
