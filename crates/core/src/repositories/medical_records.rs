//! Outcome / Medical-Record Linker.
//!
//! Creates outcome records (optionally linked to the appointment they came from) and drives
//! the dispense workflow against the [`MedicationLedger`]. A record only becomes `DISPENSED`
//! after the ledger has actually taken the stock.
//!
//! Lock order: this service's lock is always taken before the ledger's.

use crate::constants::MEDICAL_RECORDS_TABLE;
use crate::error::{LedgerError, LedgerResult};
use crate::medical_record::{MedicalRecord, OutcomeNote, RecordStatus};
use crate::outcome::{Conflict, Outcome};
use crate::repositories::medications::MedicationLedger;
use crate::repositories::shared::{lock, IdCounter, TableRepository};
use clinic_tables::TableStore;
use clinic_types::{HospitalId, RecordId};
use std::sync::Mutex;

#[derive(Debug)]
struct RecordBook {
    table: TableRepository<MedicalRecord>,
    ids: IdCounter,
}

impl RecordBook {
    fn load(store: TableStore) -> LedgerResult<Self> {
        let table = TableRepository::<MedicalRecord>::load(store)?;
        let ids =
            IdCounter::seeded(MEDICAL_RECORDS_TABLE, table.values().map(MedicalRecord::id));
        Ok(Self { table, ids })
    }
}

#[derive(Debug)]
pub struct MedicalRecordService {
    book: Mutex<RecordBook>,
}

impl MedicalRecordService {
    pub fn load(store: TableStore) -> LedgerResult<Self> {
        Ok(Self {
            book: Mutex::new(RecordBook::load(store)?),
        })
    }

    pub fn reload(&self) -> LedgerResult<()> {
        let mut book = lock(&self.book, "medical records")?;
        book.table.reload()?;
        let reseeded = IdCounter::seeded(
            MEDICAL_RECORDS_TABLE,
            book.table.values().map(MedicalRecord::id),
        );
        book.ids = reseeded.max_with(book.ids);
        Ok(())
    }

    pub fn get(&self, id: RecordId) -> LedgerResult<Option<MedicalRecord>> {
        let book = lock(&self.book, "medical records")?;
        Ok(book.table.get(&id).cloned())
    }

    /// Records an outcome that is not tied to an appointment.
    ///
    /// The prescribed medication must exist in `ledger`; otherwise the answer is an
    /// `UnknownMedication` conflict and nothing is written.
    pub fn record_outcome(
        &self,
        patient_id: HospitalId,
        note: OutcomeNote,
        ledger: &MedicationLedger,
    ) -> LedgerResult<Outcome<MedicalRecord>> {
        self.insert_outcome(patient_id, note, None, ledger)
    }

    /// Writes a new `PENDING` record with the next ID.
    ///
    /// Only the completion workflow in [`crate::Clinic`] passes an `appointment_id`, so every
    /// back-reference points at a completed appointment.
    pub(crate) fn insert_outcome(
        &self,
        patient_id: HospitalId,
        note: OutcomeNote,
        appointment_id: Option<RecordId>,
        ledger: &MedicationLedger,
    ) -> LedgerResult<Outcome<MedicalRecord>> {
        let mut book = lock(&self.book, "medical records")?;

        if ledger.get(note.medication())?.is_none() {
            tracing::warn!(
                "outcome for {} prescribes unknown medication {}",
                patient_id,
                note.medication()
            );
            return Ok(Outcome::Conflict(Conflict::UnknownMedication(
                note.medication().to_owned(),
            )));
        }

        let id = book.ids.peek()?;
        let record = MedicalRecord::from_note(id, patient_id, note, appointment_id);
        book.table.put(record.clone())?;
        book.ids.advance_past(id);

        tracing::info!(
            "recorded outcome {} for patient {}",
            record.id(),
            record.patient_id()
        );
        Ok(Outcome::Applied(record))
    }

    /// Deletes a record written moments ago by a workflow that then failed.
    pub(crate) fn retract(&self, id: RecordId) -> LedgerResult<()> {
        let mut book = lock(&self.book, "medical records")?;
        if book.table.remove(&id)?.is_some() {
            tracing::warn!("retracted outcome {}", id);
        }
        Ok(())
    }

    /// Dispenses the prescription of a pending record.
    ///
    /// On insufficient stock the record stays `PENDING` and the ledger's conflict is passed
    /// back. If the record cannot be flushed after stock was taken, the stock is returned; if
    /// that also fails the error is `LedgerError::RollbackFailed`.
    pub fn dispense_outcome(
        &self,
        id: RecordId,
        ledger: &MedicationLedger,
    ) -> LedgerResult<Outcome<MedicalRecord>> {
        let mut book = lock(&self.book, "medical records")?;

        let Some(record) = book.table.get(&id).cloned() else {
            return Ok(Outcome::NotFound);
        };
        let dispensed = match record.dispensed() {
            Ok(next) => next,
            Err(conflict) => {
                tracing::warn!("cannot dispense outcome {}: {}", id, conflict);
                return Ok(Outcome::Conflict(conflict));
            }
        };

        match ledger.dispense(record.medication(), record.quantity())? {
            Outcome::Applied(_) => {}
            Outcome::NotFound => {
                return Ok(Outcome::Conflict(Conflict::UnknownMedication(
                    record.medication().to_owned(),
                )));
            }
            Outcome::Conflict(conflict) => return Ok(Outcome::Conflict(conflict)),
        }

        if let Err(operation_error) = book.table.put(dispensed.clone()) {
            tracing::warn!(
                "failed to mark outcome {} dispensed, returning {} {}",
                id,
                record.quantity(),
                record.medication()
            );
            let rollback_error = match ledger.restock(record.medication(), record.quantity()) {
                Ok(Outcome::Applied(_)) => return Err(operation_error),
                Ok(_) => LedgerError::InvalidInput(format!(
                    "medication {} disappeared before stock could be returned",
                    record.medication()
                )),
                Err(e) => e,
            };
            return Err(LedgerError::RollbackFailed {
                operation_error: Box::new(operation_error),
                rollback_error: Box::new(rollback_error),
            });
        }

        tracing::info!(
            "dispensed {} {} for outcome {}",
            dispensed.quantity(),
            dispensed.medication(),
            id
        );
        Ok(Outcome::Applied(dispensed))
    }

    pub fn records_for_patient(&self, patient_id: &HospitalId) -> LedgerResult<Vec<MedicalRecord>> {
        self.filtered(|r| r.patient_id() == patient_id)
    }

    /// Outcomes whose prescription has not been dispensed yet.
    pub fn pending_outcomes(&self) -> LedgerResult<Vec<MedicalRecord>> {
        self.filtered(|r| r.status() == RecordStatus::Pending)
    }

    pub fn record_for_appointment(
        &self,
        appointment_id: RecordId,
    ) -> LedgerResult<Option<MedicalRecord>> {
        let book = lock(&self.book, "medical records")?;
        let linked = book
            .table
            .values()
            .find(|r| r.appointment_id() == Some(appointment_id))
            .cloned();
        Ok(linked)
    }

    /// A patient's records that came from completed appointments.
    pub fn past_appointment_records(
        &self,
        patient_id: &HospitalId,
    ) -> LedgerResult<Vec<MedicalRecord>> {
        self.filtered(|r| r.patient_id() == patient_id && r.appointment_id().is_some())
    }

    pub fn all(&self) -> LedgerResult<Vec<MedicalRecord>> {
        self.filtered(|_| true)
    }

    fn filtered(&self, keep: impl Fn(&MedicalRecord) -> bool) -> LedgerResult<Vec<MedicalRecord>> {
        let book = lock(&self.book, "medical records")?;
        Ok(book.table.values().filter(|r| keep(r)).cloned().collect())
    }
}
