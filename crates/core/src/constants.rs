//! Constants used throughout the clinic core crate.
//!
//! This module contains table names, canonical headers and formatting constants so that
//! every repository agrees on the persisted layout.

/// Default directory for table storage when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "clinic_data";

/// Default first bookable hour of the day.
pub const DEFAULT_OPENING_HOUR: u32 = 8;

/// Default hour at which the clinic closes; no slot may start at or after it.
pub const DEFAULT_CLOSING_HOUR: u32 = 17;

/// Placeholder stored in the patient column of an appointment with no patient attached.
pub const FREE_PATIENT_SENTINEL: &str = "FREE";

/// Textual pattern of every date-time cell, e.g. `05-Nov-2024 9:00:00 AM`.
pub const DATE_TIME_FORMAT: &str = "%d-%b-%Y %-I:%M:%S %p";

/// Textual pattern of date-only cells such as a date of birth, e.g. `05-Nov-1990`.
pub const DATE_FORMAT: &str = "%d-%b-%Y";

/// Table holding appointment slots.
pub const APPOINTMENTS_TABLE: &str = "appointments";

/// Table holding outcome / medical records.
pub const MEDICAL_RECORDS_TABLE: &str = "medical_records";

/// Table holding medication inventory.
pub const MEDICATIONS_TABLE: &str = "medications";

/// Table holding login accounts. Only the role column is ever read.
pub const ACCOUNTS_TABLE: &str = "accounts";

/// Table holding staff details.
pub const STAFF_TABLE: &str = "staff";

/// Table holding patient details.
pub const PATIENTS_TABLE: &str = "patients";

pub const APPOINTMENTS_HEADER: &[&str] = &[
    "Appointment ID",
    "Doctor ID",
    "Patient ID",
    "Appointment Time",
    "Status",
];

pub const MEDICAL_RECORDS_HEADER: &[&str] = &[
    "Patient ID",
    "Diagnosis",
    "Treatment",
    "Prescription",
    "Prescription Amount",
    "Status",
    "ID",
    "Past Appointment ID",
];

pub const MEDICATIONS_HEADER: &[&str] = &[
    "Medicine Name",
    "Current Stock",
    "Low Stock Level Alert",
    "Replenish Amount",
];

pub const ACCOUNTS_HEADER: &[&str] = &["Hospital ID", "Password", "Role"];

pub const STAFF_HEADER: &[&str] = &["Hospital ID", "Gender", "Age", "Doctor ID"];

pub const PATIENTS_HEADER: &[&str] = &[
    "Hospital ID",
    "Patient ID",
    "Name",
    "Gender",
    "Date of Birth",
    "Blood Type",
    "Email",
    "Contact Number",
];

/// Every table with its canonical header, in initialisation order.
pub const ALL_TABLES: &[(&str, &[&str])] = &[
    (ACCOUNTS_TABLE, ACCOUNTS_HEADER),
    (STAFF_TABLE, STAFF_HEADER),
    (PATIENTS_TABLE, PATIENTS_HEADER),
    (MEDICATIONS_TABLE, MEDICATIONS_HEADER),
    (APPOINTMENTS_TABLE, APPOINTMENTS_HEADER),
    (MEDICAL_RECORDS_TABLE, MEDICAL_RECORDS_HEADER),
];
