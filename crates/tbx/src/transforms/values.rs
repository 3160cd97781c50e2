//! 🧮 Value rewrites: booleans, dates, times. The SAP-to-CRM dialect coach.

use chrono::{Months, NaiveDate, NaiveDateTime};

use crate::common::Row;
use crate::error::RowFault;
use crate::transforms::{Verdict, field};

/// 🔁 Exact match on `truthy.0` becomes `truthy.1`, same for `falsy`. Anything else stays.
pub fn boolify(
    row: &mut Row,
    col: usize,
    truthy: (&str, &str),
    falsy: (&str, &str),
) -> Result<Verdict, RowFault> {
    let current = field(row, col)?;
    let replacement = if current == truthy.0 {
        Some(truthy.1)
    } else if current == falsy.0 {
        Some(falsy.1)
    } else {
        None
    };
    if let Some(replacement) = replacement {
        row[col] = replacement.to_string();
    }
    Ok(Verdict::Keep)
}

/// 📅 `today` plus `years`, as `YYYY-MM-DD`. Feb 29 lands on Feb 28 in a common year.
pub fn years_from(today: NaiveDate, years: u32) -> String {
    today
        .checked_add_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MAX)
        .format("%Y-%m-%d")
        .to_string()
}

/// 📌 Append `stamped` when the field is in `matches`, otherwise append the field itself.
pub fn tack_date_based_on_condition(
    row: &mut Row,
    col: usize,
    matches: &[String],
    stamped: &str,
) -> Result<Verdict, RowFault> {
    let current = field(row, col)?;
    let tacked = if matches.iter().any(|m| m == current) {
        stamped.to_string()
    } else {
        current.to_string()
    };
    row.push(tacked);
    Ok(Verdict::Keep)
}

/// 🗓️ `20200315` → `2020-03-15` at every listed index. Empty stays empty.
///
/// Every index is checked before any is rewritten, so a fault leaves the row as it was.
pub fn yyyymmdd_to_iso(row: &mut Row, cols: &[usize]) -> Result<Verdict, RowFault> {
    for &col in cols {
        let value = field(row, col)?;
        if !value.is_empty() && !(value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit())) {
            return Err(RowFault::BadValue {
                index: col,
                value: value.to_string(),
                expected: "YYYYMMDD date",
            });
        }
    }
    for &col in cols {
        let value = &row[col];
        if !value.is_empty() {
            row[col] = format!("{}-{}-{}", &value[..4], &value[4..6], &value[6..]);
        }
    }
    Ok(Verdict::Keep)
}

/// ⏱️ `HHMMSS` → milliseconds since midnight.
pub fn convert_time(row: &mut Row, col: usize) -> Result<Verdict, RowFault> {
    let value = field(row, col)?.trim();
    let bad = || RowFault::BadValue {
        index: col,
        value: value.to_string(),
        expected: "HHMMSS time",
    };
    if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let part = |range: std::ops::Range<usize>| value[range].parse::<u64>().map_err(|_| bad());
    let millis = (part(0..2)? * 3600 + part(2..4)? * 60 + part(4..6)?) * 1000;
    row[col] = millis.to_string();
    Ok(Verdict::Keep)
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn date_part(value: &str) -> Option<NaiveDate> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|ts| ts.date())
        .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

/// ✂️ `2020-03-15 08:30:00` → `2020-03-15` at every listed index. Empty stays empty.
pub fn strip_time(row: &mut Row, cols: &[usize]) -> Result<Verdict, RowFault> {
    let mut dates = Vec::with_capacity(cols.len());
    for &col in cols {
        let value = field(row, col)?;
        if value.is_empty() {
            continue;
        }
        let date = date_part(value).ok_or_else(|| RowFault::BadValue {
            index: col,
            value: value.to_string(),
            expected: "YYYY-MM-DD HH:MM:SS timestamp",
        })?;
        dates.push((col, date));
    }
    for (col, date) in dates {
        row[col] = date.format("%Y-%m-%d").to_string();
    }
    Ok(Verdict::Keep)
}
