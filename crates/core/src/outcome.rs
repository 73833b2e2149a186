//! Explicit results for domain operations.
//!
//! Storage failures are errors ([`crate::LedgerError`]); "nothing matched" and "not allowed in
//! the current state" are ordinary answers and come back as an [`Outcome`] so callers can
//! branch on them instead of assuming success.

use crate::appointment::{AppointmentAction, AppointmentStatus};
use chrono::{NaiveDateTime, NaiveTime};
use clinic_types::{HospitalId, RecordId};

/// Result of a mutation that reached the domain rules.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The change was made and persisted.
    Applied(T),
    /// No row matched; nothing changed.
    NotFound,
    /// A row matched but the change is not allowed; nothing changed.
    Conflict(Conflict),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    /// Returns the applied value, discarding not-found and conflict answers.
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Applied(value) => Outcome::Applied(f(value)),
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Conflict(conflict) => Outcome::Conflict(conflict),
        }
    }
}

/// Why a matched row could not be changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("cannot {action} an appointment that is {from}")]
    InvalidTransition {
        from: AppointmentStatus,
        action: AppointmentAction,
    },
    #[error("doctor {doctor} already has a slot at {at}")]
    SlotOccupied {
        doctor: HospitalId,
        at: NaiveDateTime,
    },
    #[error("{0} is not an hourly slot within clinic hours")]
    OutsideClinicHours(NaiveTime),
    #[error("insufficient stock of {medication}: {available} available, {requested} requested")]
    InsufficientStock {
        medication: String,
        available: u32,
        requested: u32,
    },
    #[error("no replenishment request is pending for {0}")]
    NoReplenishmentPending(String),
    #[error("medication {0} already exists")]
    DuplicateMedication(String),
    #[error("medical record {0} has already been dispensed")]
    AlreadyDispensed(RecordId),
    #[error("medication {0} is not in the inventory")]
    UnknownMedication(String),
    #[error("{0} already has an account")]
    DuplicateAccount(HospitalId),
    #[error("{0} is not a doctor in the staff directory")]
    UnknownDoctor(HospitalId),
    #[error("{0} is not a registered patient")]
    UnknownPatient(HospitalId),
}
