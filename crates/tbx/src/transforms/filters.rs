//! 🚫 Filters: the operations that decide a row does not get to continue.
//!
//! Both report who they turned away, so the helpdesk can chase the source system.

use crate::common::Row;
use crate::error::RowFault;
use crate::transforms::{Verdict, field};

/// 📏 Rows exactly `col_length` wide pass verbatim. Anything else is rejected under its
/// `unique_col` value (when it is even wide enough to have one).
pub fn purge(row: &mut Row, col_length: usize, unique_col: usize) -> Result<Verdict, RowFault> {
    if row.len() == col_length {
        Ok(Verdict::Keep)
    } else {
        Ok(Verdict::Reject(row.get(unique_col).cloned()))
    }
}

/// 🧹 Reject rows whose trimmed `col` equals `value`, reporting `report_col`.
pub fn remove_row_based_on_val(
    row: &mut Row,
    col: usize,
    value: &str,
    report_col: usize,
) -> Result<Verdict, RowFault> {
    if field(row, col)?.trim() != value {
        return Ok(Verdict::Keep);
    }
    let identifier = field(row, report_col)?;
    Ok(Verdict::Reject(Some(identifier.to_string())))
}
