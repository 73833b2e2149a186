//! # Clinic Core
//!
//! Core business logic for the clinic appointment and resource ledger.
//!
//! This crate contains the domain rows and the services that own them:
//! - **Appointment Scheduler**: slot publication, booking and the appointment lifecycle
//! - **Medication Ledger**: stock, low-stock alerts, replenishment and dispensing
//! - **Outcome Linker**: medical records written on completion and the dispense workflow
//! - **Directory**: staff and patient lookups, staff management, patient contact details
//!
//! Every table is loaded whole into memory and rewritten whole on each mutation through
//! [`clinic_tables::TableStore`]. Domain answers that are not failures ("no such slot", "not
//! enough stock") come back as an [`Outcome`]; [`LedgerError`] is reserved for storage and
//! input failures.
//!
//! **No presentation concerns**: menus, argument parsing and output formatting belong in the
//! `clinic` binary.

pub mod appointment;
pub mod clinic;
pub mod config;
pub mod constants;
pub mod datetime;
pub mod error;
pub mod medical_record;
pub mod medication;
pub mod outcome;
pub mod people;
pub mod repositories;

pub use appointment::{Appointment, AppointmentAction, AppointmentStatus};
pub use clinic::{AppointmentOverview, Clinic};
pub use config::{ClinicHours, CoreConfig};
pub use error::{LedgerError, LedgerResult};
pub use medical_record::{MedicalRecord, OutcomeNote, RecordStatus};
pub use medication::{Medication, MedicationKey};
pub use outcome::{Conflict, Outcome};
pub use people::{AccountRole, Gender, Patient, StaffMember, StaffRole};
pub use repositories::appointments::AppointmentService;
pub use repositories::directory::{DirectoryService, StaffFilter};
pub use repositories::medical_records::MedicalRecordService;
pub use repositories::medications::MedicationLedger;
