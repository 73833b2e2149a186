//! Outcome records written when an appointment is completed.
//!
//! A record is created `PENDING` (awaiting dispense) and flips to `DISPENSED` exactly once, after
//! the prescribed quantity has been taken from stock. Records are never deleted by normal
//! operation.

use crate::constants::{MEDICAL_RECORDS_HEADER, MEDICAL_RECORDS_TABLE};
use crate::outcome::Conflict;
use crate::repositories::shared::{record_id_cell, TableRow};
use crate::{LedgerError, LedgerResult};
use clinic_tables::cells;
use clinic_types::{HospitalId, NonEmptyText, RecordId};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Dispense state of a medical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Dispensed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Dispensed => "DISPENSED",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RecordStatus::Pending),
            "DISPENSED" => Ok(RecordStatus::Dispensed),
            _ => Err(LedgerError::InvalidInput(format!(
                "unknown medical record status {s:?}"
            ))),
        }
    }
}

/// The clinical content of an outcome, as entered by the doctor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeNote {
    diagnosis: NonEmptyText,
    treatment: NonEmptyText,
    medication: NonEmptyText,
    quantity: u32,
}

impl OutcomeNote {
    /// # Errors
    ///
    /// Returns `LedgerError::Text` for blank text fields and `LedgerError::InvalidInput` when
    /// `quantity` is zero.
    pub fn new(
        diagnosis: &str,
        treatment: &str,
        medication: &str,
        quantity: u32,
    ) -> LedgerResult<Self> {
        if quantity == 0 {
            return Err(LedgerError::InvalidInput(
                "prescribed quantity must be greater than zero".into(),
            ));
        }
        Ok(Self {
            diagnosis: NonEmptyText::new(diagnosis)?,
            treatment: NonEmptyText::new(treatment)?,
            medication: NonEmptyText::new(medication)?,
            quantity,
        })
    }

    pub fn medication(&self) -> &str {
        self.medication.as_str()
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }
}

/// One row of the medical records table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MedicalRecord {
    id: RecordId,
    patient_id: HospitalId,
    diagnosis: NonEmptyText,
    treatment: NonEmptyText,
    medication: NonEmptyText,
    quantity: u32,
    status: RecordStatus,
    appointment_id: Option<RecordId>,
}

impl MedicalRecord {
    pub(crate) fn from_note(
        id: RecordId,
        patient_id: HospitalId,
        note: OutcomeNote,
        appointment_id: Option<RecordId>,
    ) -> Self {
        Self {
            id,
            patient_id,
            diagnosis: note.diagnosis,
            treatment: note.treatment,
            medication: note.medication,
            quantity: note.quantity,
            status: RecordStatus::Pending,
            appointment_id,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn patient_id(&self) -> &HospitalId {
        &self.patient_id
    }

    pub fn diagnosis(&self) -> &str {
        self.diagnosis.as_str()
    }

    pub fn treatment(&self) -> &str {
        self.treatment.as_str()
    }

    pub fn medication(&self) -> &str {
        self.medication.as_str()
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    /// The appointment this outcome was recorded for, if any.
    pub fn appointment_id(&self) -> Option<RecordId> {
        self.appointment_id
    }

    pub(crate) fn dispensed(&self) -> Result<Self, Conflict> {
        match self.status {
            RecordStatus::Dispensed => Err(Conflict::AlreadyDispensed(self.id)),
            RecordStatus::Pending => Ok(Self {
                status: RecordStatus::Dispensed,
                ..self.clone()
            }),
        }
    }
}

impl TableRow for MedicalRecord {
    type Key = RecordId;
    const TABLE: &'static str = MEDICAL_RECORDS_TABLE;
    const HEADER: &'static [&'static str] = MEDICAL_RECORDS_HEADER;

    fn key(&self) -> RecordId {
        self.id
    }

    fn from_cells(row: &[String]) -> LedgerResult<Self> {
        Ok(Self {
            patient_id: HospitalId::new(cells::required(row, 0)?)?,
            diagnosis: NonEmptyText::new(cells::required(row, 1)?)?,
            treatment: NonEmptyText::new(cells::required(row, 2)?)?,
            medication: NonEmptyText::new(cells::required(row, 3)?)?,
            quantity: cells::count(cells::required(row, 4)?)?,
            status: cells::required(row, 5)?.parse()?,
            id: record_id_cell(cells::required(row, 6)?)?,
            appointment_id: cells::optional(row, 7).map(record_id_cell).transpose()?,
        })
    }

    fn to_cells(&self) -> Vec<String> {
        let mut row = vec![
            self.patient_id.to_string(),
            self.diagnosis.to_string(),
            self.treatment.to_string(),
            self.medication.to_string(),
            self.quantity.to_string(),
            self.status.to_string(),
            self.id.to_string(),
        ];
        if let Some(appointment_id) = self.appointment_id {
            row.push(appointment_id.to_string());
        }
        row
    }
}
