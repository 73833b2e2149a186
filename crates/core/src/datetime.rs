//! Date-time cell formatting.
//!
//! Appointment times are persisted as a single combined cell using [`DATE_TIME_FORMAT`]
//! (`05-Nov-2024 9:00:00 AM`); plain dates use [`DATE_FORMAT`] (`05-Nov-2024`). Parsing is
//! case-insensitive in the month and meridiem.

use crate::constants::{DATE_FORMAT, DATE_TIME_FORMAT};
use crate::{LedgerError, LedgerResult};
use chrono::{NaiveDate, NaiveDateTime};

pub fn format_date_time(at: NaiveDateTime) -> String {
    at.format(DATE_TIME_FORMAT).to_string()
}

pub fn parse_date_time(cell: &str) -> LedgerResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(cell.trim(), DATE_TIME_FORMAT)
        .map_err(|_| LedgerError::InvalidDateTime(cell.to_owned()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(cell: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(cell.trim(), DATE_FORMAT)
        .map_err(|_| LedgerError::InvalidDateTime(cell.to_owned()))
}

/// Whether `at` is still ahead of `now`: later today, or on a future date.
pub fn is_upcoming(at: NaiveDateTime, now: NaiveDateTime) -> bool {
    (at.date() == now.date() && at.time() > now.time()) || at.date() > now.date()
}
