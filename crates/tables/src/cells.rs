//! Helpers for reading typed values out of string cells.
//!
//! Integer columns written by spreadsheet tooling frequently come back as decimals
//! (`"3.0"`), so whole numbers are parsed as floats and truncated toward zero.

use crate::{TablesError, TablesResult};

/// Returns the cell at `index`, or `MissingCell` if the row is too short.
pub fn required(row: &[String], index: usize) -> TablesResult<&str> {
    row.get(index)
        .map(String::as_str)
        .ok_or(TablesError::MissingCell { index })
}

/// Returns the cell at `index` if present and not blank.
pub fn optional(row: &[String], index: usize) -> Option<&str> {
    row.get(index)
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
}

/// Parses a whole number, truncating any fractional part.
///
/// # Errors
///
/// Returns `TablesError::InvalidCell` for non-numeric, NaN or infinite values, or values
/// outside the `i64` range.
pub fn whole_number(cell: &str) -> TablesResult<i64> {
    let trimmed = cell.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }

    let value = trimmed.parse::<f64>().map_err(|_| TablesError::InvalidCell {
        value: cell.to_owned(),
        reason: "not a number".into(),
    })?;

    if !value.is_finite() {
        return Err(TablesError::InvalidCell {
            value: cell.to_owned(),
            reason: "not a finite number".into(),
        });
    }

    let truncated = value.trunc();
    if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
        return Err(TablesError::InvalidCell {
            value: cell.to_owned(),
            reason: "out of range".into(),
        });
    }

    Ok(truncated as i64)
}

/// Parses a whole number that must fit a `u32` (stock levels, quantities, IDs).
pub fn count(cell: &str) -> TablesResult<u32> {
    let value = whole_number(cell)?;
    u32::try_from(value).map_err(|_| TablesError::InvalidCell {
        value: cell.to_owned(),
        reason: "expected a non-negative count".into(),
    })
}
