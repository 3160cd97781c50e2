//! 📐 Reshaping: move, drop, and append fields. No value is inspected, only positions.

use crate::common::Row;
use crate::error::RowFault;
use crate::transforms::{ConcatPart, Verdict, field};

pub fn swap_columns(row: &mut Row, from: usize, to: usize) -> Result<Verdict, RowFault> {
    field(row, from)?;
    field(row, to)?;
    row.swap(from, to);
    Ok(Verdict::Keep)
}

/// 🗑️ Remove field `col`; everything after it shifts one to the left.
pub fn delete_column(row: &mut Row, col: usize) -> Result<Verdict, RowFault> {
    field(row, col)?;
    row.remove(col);
    Ok(Verdict::Keep)
}

/// 🧵 Append literals and referenced fields, in order, joined by single spaces.
pub fn concat_n_tack(row: &mut Row, parts: &[ConcatPart]) -> Result<Verdict, RowFault> {
    let pieces = parts
        .iter()
        .map(|part| match part {
            ConcatPart::Literal(text) => Ok(text.as_str()),
            ConcatPart::Field(index) => field(row, *index),
        })
        .collect::<Result<Vec<&str>, RowFault>>()?;
    let joined = pieces.join(" ");
    row.push(joined);
    Ok(Verdict::Keep)
}

pub fn tack_custom_val(row: &mut Row, value: &str) -> Result<Verdict, RowFault> {
    row.push(value.to_string());
    Ok(Verdict::Keep)
}

/// 🕳️ Trim every field and drop the ones that end up empty. Row width is anyone's guess
/// afterwards.
pub fn remove_missing_cols(row: &mut Row) -> Result<Verdict, RowFault> {
    let trimmed: Row = row
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    *row = trimmed;
    Ok(Verdict::Keep)
}
