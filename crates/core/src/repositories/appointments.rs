//! Appointment Scheduler.
//!
//! Owns the appointments table. Doctors publish `FREE` slots on an hourly grid inside clinic
//! hours; patients book them; doctors approve, decline and complete them; patients cancel or
//! reschedule. Each operation looks up, checks and writes under a single lock, so two bookings
//! for the same slot in one process cannot both succeed.
//!
//! ## Slot occupancy
//!
//! A time on a doctor's grid is occupied by any row there that is not `CANCELLED`. A cancelled
//! row is retired rather than reused: the time becomes available again and a new slot (with a
//! new ID) may be published over it.
//!
//! Lock order: the scheduler's lock is taken before those of the record linker and the
//! medication ledger.

use crate::appointment::{Appointment, AppointmentAction, AppointmentStatus};
use crate::config::ClinicHours;
use crate::constants::APPOINTMENTS_TABLE;
use crate::datetime::is_upcoming;
use crate::error::{LedgerError, LedgerResult};
use crate::outcome::{Conflict, Outcome};
use crate::repositories::shared::{lock, IdCounter, TableRepository};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clinic_tables::TableStore;
use clinic_types::{HospitalId, RecordId};
use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Debug)]
struct AppointmentBook {
    table: TableRepository<Appointment>,
    ids: IdCounter,
}

impl AppointmentBook {
    fn load(store: TableStore) -> LedgerResult<Self> {
        let table = TableRepository::<Appointment>::load(store)?;
        let ids = IdCounter::seeded(APPOINTMENTS_TABLE, table.values().map(Appointment::id));
        Ok(Self { table, ids })
    }

    /// The live row at `doctor`'s `date` and `time`, ignoring retired (cancelled) rows.
    fn live_at(&self, doctor: &HospitalId, date: NaiveDate, time: NaiveTime) -> Option<&Appointment> {
        self.table
            .values()
            .find(|a| a.status().occupies_time() && a.is_at(doctor, date, time))
    }

    fn select(&self, keep: impl Fn(&Appointment) -> bool) -> Vec<Appointment> {
        let mut rows: Vec<Appointment> = self.table.values().filter(|a| keep(a)).cloned().collect();
        rows.sort_by_key(|a| (a.at(), a.id()));
        rows
    }
}

#[derive(Debug)]
pub struct AppointmentService {
    book: Mutex<AppointmentBook>,
    hours: ClinicHours,
}

impl AppointmentService {
    /// Loads the appointments table from `store`.
    pub fn load(store: TableStore, hours: ClinicHours) -> LedgerResult<Self> {
        Ok(Self {
            book: Mutex::new(AppointmentBook::load(store)?),
            hours,
        })
    }

    /// Re-reads the table after another writer changed it.
    pub fn reload(&self) -> LedgerResult<()> {
        let mut book = lock(&self.book, "appointments")?;
        book.table.reload()?;
        let reseeded =
            IdCounter::seeded(APPOINTMENTS_TABLE, book.table.values().map(Appointment::id));
        book.ids = reseeded.max_with(book.ids);
        Ok(())
    }

    pub fn clinic_hours(&self) -> ClinicHours {
        self.hours
    }

    pub fn get(&self, id: RecordId) -> LedgerResult<Option<Appointment>> {
        let book = lock(&self.book, "appointments")?;
        Ok(book.table.get(&id).cloned())
    }

    /// Every row, earliest first.
    pub fn list_all(&self) -> LedgerResult<Vec<Appointment>> {
        let book = lock(&self.book, "appointments")?;
        Ok(book.select(|_| true))
    }

    // ========================================================================
    // SLOTS
    // ========================================================================

    /// Grid times on `date` where `doctor` has no live row yet.
    ///
    /// These are the times a doctor may still publish as new slots.
    pub fn free_slots_for_doctor(
        &self,
        doctor: &HospitalId,
        date: NaiveDate,
    ) -> LedgerResult<Vec<NaiveTime>> {
        let book = lock(&self.book, "appointments")?;
        let occupied: BTreeSet<NaiveTime> = book
            .table
            .values()
            .filter(|a| a.status().occupies_time() && a.doctor_id() == doctor && a.date() == date)
            .map(Appointment::time)
            .collect();

        Ok(self
            .hours
            .slot_starts()
            .into_iter()
            .filter(|t| !occupied.contains(t))
            .collect())
    }

    /// Published slots on `date` that a patient can book with `doctor`.
    pub fn bookable_slots(
        &self,
        doctor: &HospitalId,
        date: NaiveDate,
    ) -> LedgerResult<Vec<Appointment>> {
        let book = lock(&self.book, "appointments")?;
        Ok(book.select(|a| {
            a.status() == AppointmentStatus::Free && a.doctor_id() == doctor && a.date() == date
        }))
    }

    /// Publishes a new `FREE` slot.
    ///
    /// The time must be one of the hourly starts within clinic hours, and the doctor must not
    /// already have a live row there.
    pub fn add_slot(
        &self,
        doctor: HospitalId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> LedgerResult<Outcome<Appointment>> {
        if !self.hours.is_slot_start(time) {
            tracing::warn!("rejected slot for {} at {}: outside clinic hours", doctor, time);
            return Ok(Outcome::Conflict(Conflict::OutsideClinicHours(time)));
        }

        let mut book = lock(&self.book, "appointments")?;
        let at = date.and_time(time);
        if book.live_at(&doctor, date, time).is_some() {
            tracing::warn!("rejected slot for {} at {}: already occupied", doctor, at);
            return Ok(Outcome::Conflict(Conflict::SlotOccupied { doctor, at }));
        }

        let id = book.ids.peek()?;
        let slot = Appointment::slot(id, doctor, at);
        book.table.put(slot.clone())?;
        book.ids.advance_past(id);

        tracing::info!("added slot {} for {} at {}", id, slot.doctor_id(), at);
        Ok(Outcome::Applied(slot))
    }

    /// Deletes a slot. Only unbooked (`FREE`) slots can be removed.
    pub fn remove_slot(&self, id: RecordId) -> LedgerResult<Outcome<Appointment>> {
        let mut book = lock(&self.book, "appointments")?;
        let Some(slot) = book.table.get(&id).cloned() else {
            return Ok(Outcome::NotFound);
        };
        if let Err(conflict) = slot.ensure_removable() {
            tracing::warn!("cannot remove slot {}: {}", id, conflict);
            return Ok(Outcome::Conflict(conflict));
        }

        book.table.remove(&id)?;
        tracing::info!("removed slot {}", id);
        Ok(Outcome::Applied(slot))
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Books the slot at (`doctor`, `date`, `time`) for `patient`.
    ///
    /// `NotFound` when no live row exists there; `Conflict` when the row is not `FREE`. In both
    /// cases nothing is written.
    pub fn book(
        &self,
        patient: HospitalId,
        doctor: &HospitalId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> LedgerResult<Outcome<Appointment>> {
        let mut book = lock(&self.book, "appointments")?;
        let Some(slot) = book.live_at(doctor, date, time).cloned() else {
            tracing::warn!(
                "no slot for {} on {} at {} to book",
                doctor,
                date,
                time
            );
            return Ok(Outcome::NotFound);
        };

        let booked = match slot.book(patient) {
            Ok(booked) => booked,
            Err(conflict) => {
                tracing::warn!("cannot book slot {}: {}", slot.id(), conflict);
                return Ok(Outcome::Conflict(conflict));
            }
        };

        book.table.put(booked.clone())?;
        tracing::info!(
            "slot {} booked by {}",
            booked.id(),
            booked.patient_id().map(HospitalId::as_str).unwrap_or_default()
        );
        Ok(Outcome::Applied(booked))
    }

    /// `PENDING → CONFIRMED`.
    pub fn approve(&self, id: RecordId) -> LedgerResult<Outcome<Appointment>> {
        self.transition(id, "approve", Appointment::approve)
    }

    /// `PENDING → FREE`; the slot goes back to the pool.
    pub fn decline(&self, id: RecordId) -> LedgerResult<Outcome<Appointment>> {
        self.transition(id, "decline", Appointment::decline)
    }

    /// `PENDING | CONFIRMED → CANCELLED`; the row is retired.
    pub fn cancel(&self, id: RecordId) -> LedgerResult<Outcome<Appointment>> {
        self.transition(id, "cancel", Appointment::cancel)
    }

    /// Moves the patient of appointment `id` to the slot at (`doctor`, `date`, `time`).
    ///
    /// The new slot is booked (`PENDING`) for the same patient and the old appointment is
    /// returned to the pool, in one flush. Nothing changes unless both steps are allowed.
    pub fn reschedule(
        &self,
        id: RecordId,
        doctor: &HospitalId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> LedgerResult<Outcome<Appointment>> {
        let mut book = lock(&self.book, "appointments")?;

        let Some(current) = book.table.get(&id).cloned() else {
            return Ok(Outcome::NotFound);
        };
        let Some(target) = book.live_at(doctor, date, time).cloned() else {
            return Ok(Outcome::NotFound);
        };

        let moved = current
            .release()
            .and_then(|released| {
                let patient = current.patient_id().cloned().ok_or(Conflict::InvalidTransition {
                    from: current.status(),
                    action: AppointmentAction::Book,
                })?;
                target.book(patient).map(|booked| (released, booked))
            });

        let (released, booked) = match moved {
            Ok(pair) => pair,
            Err(conflict) => {
                tracing::warn!("cannot reschedule appointment {}: {}", id, conflict);
                return Ok(Outcome::Conflict(conflict));
            }
        };

        book.table.commit(|rows| {
            rows.insert(released.id(), released);
            rows.insert(booked.id(), booked.clone());
        })?;

        tracing::info!("rescheduled appointment {} to slot {}", id, booked.id());
        Ok(Outcome::Applied(booked))
    }

    /// Completes a confirmed appointment together with whatever `create_outcome` records.
    ///
    /// `create_outcome` runs first, while the scheduler's lock is held. If it applies and the
    /// appointment flush then fails, `rollback` is handed the created value; the operation
    /// error is returned either way, wrapped in `RollbackFailed` when the rollback fails too.
    pub(crate) fn complete_with<T>(
        &self,
        id: RecordId,
        create_outcome: impl FnOnce(&Appointment) -> LedgerResult<Outcome<T>>,
        rollback: impl FnOnce(&T) -> LedgerResult<()>,
    ) -> LedgerResult<Outcome<(Appointment, T)>> {
        let mut book = lock(&self.book, "appointments")?;

        let Some(current) = book.table.get(&id).cloned() else {
            return Ok(Outcome::NotFound);
        };
        let completed = match current.complete() {
            Ok(completed) => completed,
            Err(conflict) => {
                tracing::warn!("cannot complete appointment {}: {}", id, conflict);
                return Ok(Outcome::Conflict(conflict));
            }
        };

        let created = match create_outcome(&completed)? {
            Outcome::Applied(created) => created,
            Outcome::NotFound => return Ok(Outcome::NotFound),
            Outcome::Conflict(conflict) => return Ok(Outcome::Conflict(conflict)),
        };

        if let Err(operation_error) = book.table.put(completed.clone()) {
            tracing::warn!("failed to complete appointment {}, rolling back outcome", id);
            return Err(match rollback(&created) {
                Ok(()) => operation_error,
                Err(rollback_error) => LedgerError::RollbackFailed {
                    operation_error: Box::new(operation_error),
                    rollback_error: Box::new(rollback_error),
                },
            });
        }

        tracing::info!("completed appointment {}", id);
        Ok(Outcome::Applied((completed, created)))
    }

    fn transition(
        &self,
        id: RecordId,
        action: &str,
        change: impl FnOnce(&Appointment) -> Result<Appointment, Conflict>,
    ) -> LedgerResult<Outcome<Appointment>> {
        let mut book = lock(&self.book, "appointments")?;
        let Some(current) = book.table.get(&id).cloned() else {
            tracing::warn!("cannot {} appointment {}: not found", action, id);
            return Ok(Outcome::NotFound);
        };

        match change(&current) {
            Ok(next) => {
                book.table.put(next.clone())?;
                tracing::info!("appointment {} is now {}", id, next.status());
                Ok(Outcome::Applied(next))
            }
            Err(conflict) => {
                tracing::warn!("cannot {} appointment {}: {}", action, id, conflict);
                Ok(Outcome::Conflict(conflict))
            }
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// A doctor's working rows on `date` (free, pending or confirmed) still ahead of `now`.
    pub fn schedule_for_doctor(
        &self,
        doctor: &HospitalId,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> LedgerResult<Vec<Appointment>> {
        let book = lock(&self.book, "appointments")?;
        Ok(book.select(|a| {
            a.doctor_id() == doctor
                && a.date() == date
                && a.status().is_scheduled()
                && is_upcoming(a.at(), now)
        }))
    }

    /// A patient's appointments later today or on a future date.
    pub fn upcoming_for_patient(
        &self,
        patient: &HospitalId,
        now: NaiveDateTime,
    ) -> LedgerResult<Vec<Appointment>> {
        let book = lock(&self.book, "appointments")?;
        Ok(book.select(|a| a.patient_id() == Some(patient) && is_upcoming(a.at(), now)))
    }

    /// A doctor's confirmed appointments for `today`.
    pub fn upcoming_for_doctor(
        &self,
        doctor: &HospitalId,
        today: NaiveDate,
    ) -> LedgerResult<Vec<Appointment>> {
        let book = lock(&self.book, "appointments")?;
        Ok(book.select(|a| {
            a.doctor_id() == doctor
                && a.date() == today
                && a.status() == AppointmentStatus::Confirmed
        }))
    }

    /// Distinct patients that have, or had, an appointment with `doctor`.
    pub fn patients_of_doctor(&self, doctor: &HospitalId) -> LedgerResult<Vec<HospitalId>> {
        let book = lock(&self.book, "appointments")?;
        let patients: BTreeSet<HospitalId> = book
            .table
            .values()
            .filter(|a| a.doctor_id() == doctor)
            .filter_map(|a| a.patient_id().cloned())
            .collect();
        Ok(patients.into_iter().collect())
    }
}
