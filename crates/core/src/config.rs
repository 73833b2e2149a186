//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services as an `Arc<CoreConfig>`. Services never read environment
//! variables themselves; the binary reads them and uses the parsing helpers below.

use crate::constants::{DEFAULT_CLOSING_HOUR, DEFAULT_DATA_DIR, DEFAULT_OPENING_HOUR};
use crate::{LedgerError, LedgerResult};
use chrono::NaiveTime;
use std::path::{Path, PathBuf};

/// The daily operating window, in whole hours.
///
/// Slots start on the hour from `opening` up to but excluding `closing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClinicHours {
    opening: u32,
    closing: u32,
}

impl ClinicHours {
    /// Create a new operating window.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidInput` unless `opening < closing <= 24`.
    pub fn new(opening: u32, closing: u32) -> LedgerResult<Self> {
        if closing > 24 || opening >= closing {
            return Err(LedgerError::InvalidInput(format!(
                "clinic hours must satisfy opening < closing <= 24 (got {opening}..{closing})"
            )));
        }
        Ok(Self { opening, closing })
    }

    pub fn opening(&self) -> u32 {
        self.opening
    }

    pub fn closing(&self) -> u32 {
        self.closing
    }

    /// Every slot start time in the window, earliest first.
    pub fn slot_starts(&self) -> Vec<NaiveTime> {
        (self.opening..self.closing)
            .filter_map(|hour| NaiveTime::from_hms_opt(hour, 0, 0))
            .collect()
    }

    /// Whether `time` is one of the hourly slot starts.
    pub fn is_slot_start(&self, time: NaiveTime) -> bool {
        self.slot_starts().contains(&time)
    }
}

impl Default for ClinicHours {
    fn default() -> Self {
        Self {
            opening: DEFAULT_OPENING_HOUR,
            closing: DEFAULT_CLOSING_HOUR,
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    clinic_hours: ClinicHours,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(data_dir: PathBuf, clinic_hours: ClinicHours) -> LedgerResult<Self> {
        if data_dir.as_os_str().is_empty() {
            return Err(LedgerError::InvalidInput("data_dir cannot be empty".into()));
        }

        Ok(Self {
            data_dir,
            clinic_hours,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn clinic_hours(&self) -> ClinicHours {
        self.clinic_hours
    }
}

/// Resolve the data directory from an optional environment value.
///
/// Empty or whitespace values fall back to [`DEFAULT_DATA_DIR`].
pub fn data_dir_from_env_value(value: Option<String>) -> PathBuf {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Parse an hour-of-day from an optional environment value.
///
/// If `value` is `None` or empty/whitespace, returns `default`.
pub fn hour_from_env_value(value: Option<String>, default: u32) -> LedgerResult<u32> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match value {
        None => Ok(default),
        Some(v) => v
            .parse::<u32>()
            .ok()
            .filter(|hour| *hour <= 24)
            .ok_or_else(|| LedgerError::InvalidInput(format!("invalid hour of day: {v:?}"))),
    }
}
