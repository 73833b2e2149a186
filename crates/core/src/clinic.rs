//! The clinic facade.
//!
//! [`Clinic`] owns one instance of every service over a single data directory and implements
//! the workflows that span more than one of them:
//!
//! - completing an appointment together with its outcome record
//! - dispensing an outcome's prescription from the medication ledger
//! - the administrator's appointment overview (each appointment with its outcome, if any)
//! - publishing, booking and rescheduling slots for doctors and patients known to the directory
//!
//! Cross-service workflows always take locks in the order appointments, medical records,
//! medications.

use crate::appointment::{Appointment, AppointmentStatus};
use crate::config::CoreConfig;
use crate::constants::ALL_TABLES;
use crate::error::{LedgerError, LedgerResult};
use crate::medical_record::{MedicalRecord, OutcomeNote};
use crate::outcome::{Conflict, Outcome};
use crate::repositories::appointments::AppointmentService;
use crate::repositories::directory::DirectoryService;
use crate::repositories::medical_records::MedicalRecordService;
use crate::repositories::medications::MedicationLedger;
use clinic_tables::TableStore;
use chrono::{NaiveDate, NaiveTime};
use clinic_types::{HospitalId, RecordId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An appointment alongside the outcome recorded for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentOverview {
    pub appointment: Appointment,
    pub outcome: Option<MedicalRecord>,
}

#[derive(Debug)]
pub struct Clinic {
    cfg: Arc<CoreConfig>,
    store: TableStore,
    appointments: AppointmentService,
    records: MedicalRecordService,
    medications: MedicationLedger,
    directory: DirectoryService,
}

impl Clinic {
    /// Creates the data directory and any missing tables, then opens the clinic.
    ///
    /// Existing tables are left untouched, so this is safe to run against a populated
    /// directory.
    pub fn initialise(cfg: Arc<CoreConfig>) -> LedgerResult<Self> {
        let store = TableStore::create_root(cfg.data_dir())?;
        for (table, header) in ALL_TABLES {
            if !store.exists(table)? {
                let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
                store.create(table, &header)?;
                tracing::info!("created table {}", table);
            }
        }
        Self::open(cfg)
    }

    /// Opens an existing data directory and loads every table.
    pub fn open(cfg: Arc<CoreConfig>) -> LedgerResult<Self> {
        let store = TableStore::new(cfg.data_dir())?;
        let clinic = Self {
            appointments: AppointmentService::load(store.clone(), cfg.clinic_hours())?,
            records: MedicalRecordService::load(store.clone())?,
            medications: MedicationLedger::load(store.clone())?,
            directory: DirectoryService::load(store.clone())?,
            store,
            cfg,
        };
        clinic.warn_on_dangling_outcomes()?;
        tracing::debug!("opened clinic at {}", clinic.store.root_directory().display());
        Ok(clinic)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn appointments(&self) -> &AppointmentService {
        &self.appointments
    }

    pub fn records(&self) -> &MedicalRecordService {
        &self.records
    }

    pub fn medications(&self) -> &MedicationLedger {
        &self.medications
    }

    pub fn directory(&self) -> &DirectoryService {
        &self.directory
    }

    /// Re-reads every table. Use after a version conflict before retrying.
    pub fn reload(&self) -> LedgerResult<()> {
        self.appointments.reload()?;
        self.records.reload()?;
        self.medications.reload()?;
        self.directory.reload()
    }

    // ========================================================================
    // SLOTS AND BOOKINGS
    // ========================================================================

    /// Publishes a free slot for a doctor listed in the staff directory.
    pub fn add_slot(
        &self,
        doctor: HospitalId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> LedgerResult<Outcome<Appointment>> {
        if let Some(conflict) = self.unknown_doctor(&doctor)? {
            return Ok(Outcome::Conflict(conflict));
        }
        self.appointments.add_slot(doctor, date, time)
    }

    /// Books a free slot for a registered patient with a listed doctor.
    pub fn book(
        &self,
        patient: HospitalId,
        doctor: &HospitalId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> LedgerResult<Outcome<Appointment>> {
        if let Some(conflict) = self.unknown_patient(&patient)? {
            return Ok(Outcome::Conflict(conflict));
        }
        if let Some(conflict) = self.unknown_doctor(doctor)? {
            return Ok(Outcome::Conflict(conflict));
        }
        self.appointments.book(patient, doctor, date, time)
    }

    /// Moves appointment `id` to a free slot of a listed doctor.
    pub fn reschedule(
        &self,
        id: RecordId,
        doctor: &HospitalId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> LedgerResult<Outcome<Appointment>> {
        if let Some(conflict) = self.unknown_doctor(doctor)? {
            return Ok(Outcome::Conflict(conflict));
        }
        self.appointments.reschedule(id, doctor, date, time)
    }

    fn unknown_doctor(&self, doctor: &HospitalId) -> LedgerResult<Option<Conflict>> {
        if self.directory.doctor(doctor)?.is_some() {
            return Ok(None);
        }
        tracing::warn!("{} is not a doctor in the staff directory", doctor);
        Ok(Some(Conflict::UnknownDoctor(doctor.clone())))
    }

    fn unknown_patient(&self, patient: &HospitalId) -> LedgerResult<Option<Conflict>> {
        if self.directory.patient(patient)?.is_some() {
            return Ok(None);
        }
        tracing::warn!("{} is not a registered patient", patient);
        Ok(Some(Conflict::UnknownPatient(patient.clone())))
    }

    // ========================================================================
    // OUTCOMES
    // ========================================================================

    /// Completes a confirmed appointment and writes its outcome record.
    ///
    /// The record is written first. If the appointment cannot then be flushed, the record is
    /// retracted, so a `COMPLETED` appointment never exists without its outcome.
    pub fn complete_appointment(
        &self,
        id: RecordId,
        note: OutcomeNote,
    ) -> LedgerResult<Outcome<(Appointment, MedicalRecord)>> {
        self.appointments.complete_with(
            id,
            |appointment| {
                let patient = appointment.patient_id().cloned().ok_or_else(|| {
                    LedgerError::InvalidInput(format!("appointment {id} has no patient"))
                })?;
                self.records
                    .insert_outcome(patient, note, Some(appointment.id()), &self.medications)
            },
            |record| self.records.retract(record.id()),
        )
    }

    /// Records an outcome that did not come from an appointment, for a registered patient.
    pub fn record_patient_outcome(
        &self,
        patient_id: HospitalId,
        note: OutcomeNote,
    ) -> LedgerResult<Outcome<MedicalRecord>> {
        if let Some(conflict) = self.unknown_patient(&patient_id)? {
            return Ok(Outcome::Conflict(conflict));
        }
        self.records
            .record_outcome(patient_id, note, &self.medications)
    }

    /// Dispenses the prescription of a pending outcome record.
    pub fn dispense_outcome(&self, record_id: RecordId) -> LedgerResult<Outcome<MedicalRecord>> {
        self.records.dispense_outcome(record_id, &self.medications)
    }

    /// Every appointment, earliest first, with the outcome recorded for it.
    pub fn appointment_overview(&self) -> LedgerResult<Vec<AppointmentOverview>> {
        let mut outcomes: BTreeMap<RecordId, MedicalRecord> = self
            .records
            .all()?
            .into_iter()
            .filter_map(|r| r.appointment_id().map(|a| (a, r)))
            .collect();

        Ok(self
            .appointments
            .list_all()?
            .into_iter()
            .map(|appointment| AppointmentOverview {
                outcome: outcomes.remove(&appointment.id()),
                appointment,
            })
            .collect())
    }

    fn warn_on_dangling_outcomes(&self) -> LedgerResult<()> {
        for record in self.records.all()? {
            let Some(appointment_id) = record.appointment_id() else {
                continue;
            };
            match self.appointments.get(appointment_id)? {
                Some(a) if a.status() == AppointmentStatus::Completed => {}
                Some(a) => tracing::warn!(
                    "outcome {} references appointment {} which is {}",
                    record.id(),
                    appointment_id,
                    a.status()
                ),
                None => tracing::warn!(
                    "outcome {} references missing appointment {}",
                    record.id(),
                    appointment_id
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClinicHours;
    use crate::constants::{ACCOUNTS_TABLE, PATIENTS_TABLE, STAFF_TABLE};
    use crate::medical_record::RecordStatus;
    use crate::people::{AccountRole, Gender};
    use tempfile::TempDir;

    fn cfg(temp: &TempDir) -> Arc<CoreConfig> {
        Arc::new(CoreConfig::new(temp.path().join("data"), ClinicHours::default()).unwrap())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 5).unwrap()
    }

    fn nine() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap()
    }

    fn doctor() -> HospitalId {
        HospitalId::new("D001").unwrap()
    }

    fn patient() -> HospitalId {
        HospitalId::new("P1001").unwrap()
    }

    fn overwrite(store: &TableStore, table: &str, rows: &[&[&str]]) {
        let data = store.load_all(table).unwrap();
        let rows: Vec<Vec<String>> = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        store
            .save_all(table, data.version, &data.header, &rows)
            .unwrap();
    }

    /// An initialised clinic whose directory lists doctor D001 and patient P1001.
    fn registered(temp: &TempDir) -> Clinic {
        let clinic = Clinic::initialise(cfg(temp)).unwrap();
        overwrite(
            &clinic.store,
            ACCOUNTS_TABLE,
            &[&["S01", "x", "DOCTOR"], &["H100", "x", "PATIENT"]],
        );
        overwrite(&clinic.store, STAFF_TABLE, &[&["S01", "FEMALE", "41", "D001"]]);
        overwrite(
            &clinic.store,
            PATIENTS_TABLE,
            &[&[
                "H100",
                "P1001",
                "Alice Tan",
                "FEMALE",
                "07-Mar-1990",
                "O+",
                "alice@example.com",
                "91234567",
            ]],
        );
        clinic.reload().unwrap();
        clinic
    }

    /// A clinic with Paracetamol in stock and one confirmed 09:00 appointment.
    fn confirmed(temp: &TempDir) -> (Clinic, RecordId) {
        let clinic = registered(temp);
        assert!(clinic
            .medications()
            .add_medication("Paracetamol", 10, 2)
            .unwrap()
            .is_applied());
        let slot = clinic
            .add_slot(doctor(), date(), nine())
            .unwrap()
            .applied()
            .unwrap();
        assert!(clinic
            .book(patient(), &doctor(), date(), nine())
            .unwrap()
            .is_applied());
        assert!(clinic.appointments().approve(slot.id()).unwrap().is_applied());
        (clinic, slot.id())
    }

    fn note(quantity: u32) -> OutcomeNote {
        OutcomeNote::new("Fever", "Rest", "Paracetamol", quantity).unwrap()
    }

    #[test]
    fn test_open_requires_existing_directory() {
        let temp = TempDir::new().unwrap();
        assert!(Clinic::open(cfg(&temp)).is_err());
    }

    #[test]
    fn test_initialise_creates_every_table_once() {
        let temp = TempDir::new().unwrap();
        let clinic = Clinic::initialise(cfg(&temp)).unwrap();
        for (table, _) in ALL_TABLES {
            assert!(clinic.store.exists(table).unwrap());
        }
        assert!(clinic.appointments().list_all().unwrap().is_empty());

        // Second run leaves existing data alone.
        assert!(clinic
            .medications()
            .add_medication("Paracetamol", 1, 1)
            .unwrap()
            .is_applied());
        let again = Clinic::initialise(cfg(&temp)).unwrap();
        assert_eq!(again.medications().all().unwrap().len(), 1);
    }

    #[test]
    fn test_complete_appointment_links_outcome() {
        let temp = TempDir::new().unwrap();
        let (clinic, id) = confirmed(&temp);

        let (appointment, record) = clinic
            .complete_appointment(id, note(3))
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(appointment.status(), AppointmentStatus::Completed);
        assert_eq!(record.appointment_id(), Some(id));
        assert_eq!(record.patient_id(), &patient());
        assert_eq!(record.status(), RecordStatus::Pending);
        assert_eq!(
            clinic.records().record_for_appointment(id).unwrap(),
            Some(record)
        );
    }

    #[test]
    fn test_complete_with_unknown_medication_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let (clinic, id) = confirmed(&temp);
        let note = OutcomeNote::new("Fever", "Rest", "Aspirin", 1).unwrap();

        assert!(matches!(
            clinic.complete_appointment(id, note).unwrap(),
            Outcome::Conflict(Conflict::UnknownMedication(_))
        ));
        assert_eq!(
            clinic.appointments().get(id).unwrap().unwrap().status(),
            AppointmentStatus::Confirmed
        );
        assert!(clinic.records().all().unwrap().is_empty());
    }

    #[test]
    fn test_failed_completion_retracts_outcome() {
        let temp = TempDir::new().unwrap();
        let (clinic, id) = confirmed(&temp);

        // Another process publishes a slot, leaving this clinic's appointments stale.
        let other = Clinic::open(cfg(&temp)).unwrap();
        assert!(other
            .appointments()
            .add_slot(doctor(), date(), NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .unwrap()
            .is_applied());

        let err = clinic.complete_appointment(id, note(1)).unwrap_err();
        assert!(err.is_version_conflict());
        assert!(clinic.records().all().unwrap().is_empty());
        assert_eq!(
            clinic.appointments().get(id).unwrap().unwrap().status(),
            AppointmentStatus::Confirmed
        );
    }

    #[test]
    fn test_dispense_after_completion() {
        let temp = TempDir::new().unwrap();
        let (clinic, id) = confirmed(&temp);
        let (_, record) = clinic
            .complete_appointment(id, note(4))
            .unwrap()
            .applied()
            .unwrap();

        let dispensed = clinic
            .dispense_outcome(record.id())
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(dispensed.status(), RecordStatus::Dispensed);
        assert_eq!(
            clinic
                .medications()
                .get("Paracetamol")
                .unwrap()
                .unwrap()
                .current_stock(),
            6
        );
    }

    #[test]
    fn test_appointment_overview_pairs_outcomes() {
        let temp = TempDir::new().unwrap();
        let (clinic, id) = confirmed(&temp);
        assert!(clinic
            .appointments()
            .add_slot(doctor(), date(), NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .unwrap()
            .is_applied());
        assert!(clinic
            .complete_appointment(id, note(1))
            .unwrap()
            .is_applied());
        assert!(clinic
            .record_patient_outcome(patient(), note(1))
            .unwrap()
            .is_applied());

        let overview = clinic.appointment_overview().unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].appointment.id(), id);
        assert!(overview[0].outcome.is_some());
        assert!(overview[1].outcome.is_none());
    }

    #[test]
    fn test_reload_picks_up_external_changes() {
        let temp = TempDir::new().unwrap();
        let (clinic, _) = confirmed(&temp);
        let other = Clinic::open(cfg(&temp)).unwrap();
        assert!(other
            .medications()
            .dispense("Paracetamol", 2)
            .unwrap()
            .is_applied());

        clinic.reload().unwrap();
        assert_eq!(
            clinic
                .medications()
                .get("Paracetamol")
                .unwrap()
                .unwrap()
                .current_stock(),
            8
        );
    }

    #[test]
    fn test_unknown_doctor_or_patient_is_refused() {
        let temp = TempDir::new().unwrap();
        let clinic = registered(&temp);
        let stranger = HospitalId::new("D999").unwrap();
        let walk_in = HospitalId::new("P9999").unwrap();

        assert_eq!(
            clinic.add_slot(stranger.clone(), date(), nine()).unwrap(),
            Outcome::Conflict(Conflict::UnknownDoctor(stranger.clone()))
        );
        assert!(clinic.appointments().list_all().unwrap().is_empty());

        let slot = clinic
            .add_slot(doctor(), date(), nine())
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(
            clinic
                .book(walk_in.clone(), &doctor(), date(), nine())
                .unwrap(),
            Outcome::Conflict(Conflict::UnknownPatient(walk_in.clone()))
        );
        assert_eq!(
            clinic.book(patient(), &stranger, date(), nine()).unwrap(),
            Outcome::Conflict(Conflict::UnknownDoctor(stranger.clone()))
        );
        assert_eq!(
            clinic.appointments().get(slot.id()).unwrap().unwrap().status(),
            AppointmentStatus::Free
        );

        assert_eq!(
            clinic.reschedule(slot.id(), &stranger, date(), nine()).unwrap(),
            Outcome::Conflict(Conflict::UnknownDoctor(stranger))
        );
        assert_eq!(
            clinic.record_patient_outcome(walk_in.clone(), note(1)).unwrap(),
            Outcome::Conflict(Conflict::UnknownPatient(walk_in))
        );
        assert!(clinic.records().all().unwrap().is_empty());
    }

    #[test]
    fn test_doctor_added_through_directory_can_publish_slots() {
        let temp = TempDir::new().unwrap();
        let clinic = registered(&temp);

        let added = clinic
            .directory()
            .add_staff("S02", AccountRole::Doctor, Gender::Male, 50)
            .unwrap()
            .applied()
            .unwrap();
        let doctor_id = added.doctor_id().cloned().unwrap();
        assert!(clinic.add_slot(doctor_id, date(), nine()).unwrap().is_applied());
    }
}
