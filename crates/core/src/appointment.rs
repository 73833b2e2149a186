//! Appointment rows and the appointment lifecycle.
//!
//! An appointment starts life as a `FREE` slot on a doctor's hourly grid. The only way its
//! status changes is through an [`AppointmentAction`], which checks the current status against
//! the transition table below before producing the next row:
//!
//! | action     | from                   | to          |
//! |------------|------------------------|-------------|
//! | `book`     | `FREE`                 | `PENDING`   |
//! | `approve`  | `PENDING`              | `CONFIRMED` |
//! | `decline`  | `PENDING`              | `FREE`      |
//! | `cancel`   | `PENDING`, `CONFIRMED` | `CANCELLED` |
//! | `release`  | `PENDING`, `CONFIRMED` | `FREE`      |
//! | `complete` | `CONFIRMED`            | `COMPLETED` |
//! | `remove`   | `FREE`                 | (deleted)   |
//!
//! Whenever the resulting status is `FREE` or `CANCELLED` the patient is detached, so a free
//! slot never carries a patient.

use crate::constants::{APPOINTMENTS_HEADER, APPOINTMENTS_TABLE, FREE_PATIENT_SENTINEL};
use crate::datetime::{format_date_time, parse_date_time};
use crate::outcome::Conflict;
use crate::repositories::shared::{record_id_cell, TableRow};
use crate::{LedgerError, LedgerResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clinic_tables::cells;
use clinic_types::{HospitalId, RecordId};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of an appointment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Free,
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Free => "FREE",
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Completed => "COMPLETED",
        }
    }

    /// Whether a row in this status blocks a new slot at the same doctor and time.
    ///
    /// Cancelled rows are retired, so their time can be offered again as a new slot.
    pub fn occupies_time(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    /// Whether the row appears on a doctor's working schedule.
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Free | AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }

    /// Whether a row in this status must have a patient attached.
    pub fn holds_patient(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::Completed
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(AppointmentStatus::Free),
            "PENDING" => Ok(AppointmentStatus::Pending),
            "CONFIRMED" => Ok(AppointmentStatus::Confirmed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            _ => Err(LedgerError::InvalidInput(format!(
                "unknown appointment status {s:?}"
            ))),
        }
    }
}

// ============================================================================
// ACTIONS
// ============================================================================

/// A requested change to an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentAction {
    Book,
    Approve,
    Decline,
    Cancel,
    Release,
    Complete,
    Remove,
}

impl AppointmentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentAction::Book => "book",
            AppointmentAction::Approve => "approve",
            AppointmentAction::Decline => "decline",
            AppointmentAction::Cancel => "cancel",
            AppointmentAction::Release => "release",
            AppointmentAction::Complete => "complete",
            AppointmentAction::Remove => "remove",
        }
    }

    /// Statuses from which this action may be taken.
    pub fn allowed_from(&self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            AppointmentAction::Book | AppointmentAction::Remove => &[Free],
            AppointmentAction::Approve | AppointmentAction::Decline => &[Pending],
            AppointmentAction::Cancel | AppointmentAction::Release => &[Pending, Confirmed],
            AppointmentAction::Complete => &[Confirmed],
        }
    }

    /// Status the row ends up in, or `None` when the action deletes the row.
    pub fn target(&self) -> Option<AppointmentStatus> {
        match self {
            AppointmentAction::Book => Some(AppointmentStatus::Pending),
            AppointmentAction::Approve => Some(AppointmentStatus::Confirmed),
            AppointmentAction::Decline | AppointmentAction::Release => {
                Some(AppointmentStatus::Free)
            }
            AppointmentAction::Cancel => Some(AppointmentStatus::Cancelled),
            AppointmentAction::Complete => Some(AppointmentStatus::Completed),
            AppointmentAction::Remove => None,
        }
    }
}

impl fmt::Display for AppointmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// APPOINTMENT
// ============================================================================

/// One row of the appointments table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Appointment {
    id: RecordId,
    doctor_id: HospitalId,
    patient_id: Option<HospitalId>,
    at: NaiveDateTime,
    status: AppointmentStatus,
}

impl Appointment {
    /// A new unbooked slot.
    pub(crate) fn slot(id: RecordId, doctor_id: HospitalId, at: NaiveDateTime) -> Self {
        Self {
            id,
            doctor_id,
            patient_id: None,
            at,
            status: AppointmentStatus::Free,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn doctor_id(&self) -> &HospitalId {
        &self.doctor_id
    }

    /// The attached patient; `None` while the row is free or cancelled.
    pub fn patient_id(&self) -> Option<&HospitalId> {
        self.patient_id.as_ref()
    }

    pub fn at(&self) -> NaiveDateTime {
        self.at
    }

    pub fn date(&self) -> NaiveDate {
        self.at.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.at.time()
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    /// Whether this row sits at `doctor`'s `date` and `time`.
    pub fn is_at(&self, doctor: &HospitalId, date: NaiveDate, time: NaiveTime) -> bool {
        &self.doctor_id == doctor && self.date() == date && self.time() == time
    }

    pub(crate) fn book(&self, patient: HospitalId) -> Result<Self, Conflict> {
        let mut next = self.next(AppointmentAction::Book)?;
        next.patient_id = Some(patient);
        Ok(next)
    }

    pub(crate) fn approve(&self) -> Result<Self, Conflict> {
        self.next(AppointmentAction::Approve)
    }

    pub(crate) fn decline(&self) -> Result<Self, Conflict> {
        self.next(AppointmentAction::Decline)
    }

    pub(crate) fn cancel(&self) -> Result<Self, Conflict> {
        self.next(AppointmentAction::Cancel)
    }

    /// Returns a booked appointment to the pool so the patient can move elsewhere.
    pub(crate) fn release(&self) -> Result<Self, Conflict> {
        self.next(AppointmentAction::Release)
    }

    pub(crate) fn complete(&self) -> Result<Self, Conflict> {
        self.next(AppointmentAction::Complete)
    }

    pub(crate) fn ensure_removable(&self) -> Result<(), Conflict> {
        self.check(AppointmentAction::Remove)
    }

    fn check(&self, action: AppointmentAction) -> Result<(), Conflict> {
        if action.allowed_from().contains(&self.status) {
            Ok(())
        } else {
            Err(Conflict::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }

    fn next(&self, action: AppointmentAction) -> Result<Self, Conflict> {
        self.check(action)?;
        let mut next = self.clone();
        if let Some(status) = action.target() {
            next.status = status;
            if !status.holds_patient() {
                next.patient_id = None;
            }
        }
        Ok(next)
    }
}

impl TableRow for Appointment {
    type Key = RecordId;
    const TABLE: &'static str = APPOINTMENTS_TABLE;
    const HEADER: &'static [&'static str] = APPOINTMENTS_HEADER;

    fn key(&self) -> RecordId {
        self.id
    }

    fn from_cells(row: &[String]) -> LedgerResult<Self> {
        let id = record_id_cell(cells::required(row, 0)?)?;
        let doctor_id = HospitalId::new(cells::required(row, 1)?)?;
        let patient_cell = cells::required(row, 2)?.trim();
        let at = parse_date_time(cells::required(row, 3)?)?;
        let status: AppointmentStatus = cells::required(row, 4)?.parse()?;

        let patient_id = if patient_cell.is_empty()
            || patient_cell.eq_ignore_ascii_case(FREE_PATIENT_SENTINEL)
        {
            None
        } else {
            Some(HospitalId::new(patient_cell)?)
        };

        let patient_id = match (status.holds_patient(), patient_id) {
            (true, Some(patient)) => Some(patient),
            (true, None) => {
                return Err(LedgerError::InvalidInput(format!(
                    "{status} appointment {id} has no patient"
                )));
            }
            (false, Some(patient)) => {
                tracing::warn!(
                    "appointment {} is {} but names patient {}; detaching",
                    id,
                    status,
                    patient
                );
                None
            }
            (false, None) => None,
        };

        Ok(Self {
            id,
            doctor_id,
            patient_id,
            at,
            status,
        })
    }

    fn to_cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.doctor_id.to_string(),
            self.patient_id
                .as_ref()
                .map(HospitalId::to_string)
                .unwrap_or_else(|| FREE_PATIENT_SENTINEL.to_string()),
            format_date_time(self.at),
            self.status.to_string(),
        ]
    }
}
