//! Staff and patient directory entries.
//!
//! The accounts table is consulted for its role column alone. The credential column belongs
//! to the authentication layer: it is carried through rewrites verbatim and never decoded.

use crate::constants::{
    ACCOUNTS_HEADER, ACCOUNTS_TABLE, PATIENTS_HEADER, PATIENTS_TABLE, STAFF_HEADER, STAFF_TABLE,
};
use crate::datetime::{format_date, parse_date};
use crate::repositories::shared::TableRow;
use crate::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use clinic_tables::cells;
use clinic_types::{HospitalId, NonEmptyText};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
        })
    }
}

impl FromStr for Gender {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MALE" | "M" => Ok(Gender::Male),
            "FEMALE" | "F" => Ok(Gender::Female),
            _ => Err(LedgerError::InvalidInput(format!("unknown gender {s:?}"))),
        }
    }
}

/// The role column of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountRole {
    Patient,
    Doctor,
    Pharmacist,
    Administrator,
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountRole::Patient => "PATIENT",
            AccountRole::Doctor => "DOCTOR",
            AccountRole::Pharmacist => "PHARMACIST",
            AccountRole::Administrator => "ADMINISTRATOR",
        })
    }
}

impl FromStr for AccountRole {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PATIENT" => Ok(AccountRole::Patient),
            "DOCTOR" => Ok(AccountRole::Doctor),
            "PHARMACIST" => Ok(AccountRole::Pharmacist),
            "ADMINISTRATOR" => Ok(AccountRole::Administrator),
            _ => Err(LedgerError::InvalidInput(format!("unknown role {s:?}"))),
        }
    }
}

// ============================================================================
// ACCOUNTS AND STAFF ROWS
// ============================================================================

/// One row of the accounts table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Account {
    hospital_id: HospitalId,
    credential: String,
    role: AccountRole,
}

impl Account {
    /// An account with no credential set yet; the authentication layer fills it in.
    pub(crate) fn provisioned(hospital_id: HospitalId, role: AccountRole) -> Self {
        Self {
            hospital_id,
            credential: String::new(),
            role,
        }
    }

    pub(crate) fn role(&self) -> AccountRole {
        self.role
    }
}

impl TableRow for Account {
    type Key = HospitalId;
    const TABLE: &'static str = ACCOUNTS_TABLE;
    const HEADER: &'static [&'static str] = ACCOUNTS_HEADER;

    fn key(&self) -> HospitalId {
        self.hospital_id.clone()
    }

    fn from_cells(row: &[String]) -> LedgerResult<Self> {
        Ok(Self {
            hospital_id: HospitalId::new(cells::required(row, 0)?)?,
            credential: row.get(1).cloned().unwrap_or_default(),
            role: cells::required(row, 2)?.parse()?,
        })
    }

    fn to_cells(&self) -> Vec<String> {
        vec![
            self.hospital_id.to_string(),
            self.credential.clone(),
            self.role.to_string(),
        ]
    }
}

/// One row of the staff table, before it is joined with the account's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StaffRow {
    hospital_id: HospitalId,
    gender: Gender,
    age: u32,
    doctor_id: Option<HospitalId>,
}

impl StaffRow {
    pub(crate) fn hospital_id(&self) -> &HospitalId {
        &self.hospital_id
    }
}

impl TableRow for StaffRow {
    type Key = HospitalId;
    const TABLE: &'static str = STAFF_TABLE;
    const HEADER: &'static [&'static str] = STAFF_HEADER;

    fn key(&self) -> HospitalId {
        self.hospital_id.clone()
    }

    fn from_cells(row: &[String]) -> LedgerResult<Self> {
        Ok(Self {
            hospital_id: HospitalId::new(cells::required(row, 0)?)?,
            gender: cells::required(row, 1)?.parse()?,
            age: cells::count(cells::required(row, 2)?)?,
            doctor_id: cells::optional(row, 3).map(HospitalId::new).transpose()?,
        })
    }

    fn to_cells(&self) -> Vec<String> {
        let mut encoded = vec![
            self.hospital_id.to_string(),
            self.gender.to_string(),
            self.age.to_string(),
        ];
        if let Some(doctor_id) = &self.doctor_id {
            encoded.push(doctor_id.to_string());
        }
        encoded
    }
}

// ============================================================================
// STAFF
// ============================================================================

/// What a staff member does, with the data specific to that role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    Doctor { doctor_id: HospitalId },
    Pharmacist,
    Administrator,
}

impl StaffRole {
    pub fn account_role(&self) -> AccountRole {
        match self {
            StaffRole::Doctor { .. } => AccountRole::Doctor,
            StaffRole::Pharmacist => AccountRole::Pharmacist,
            StaffRole::Administrator => AccountRole::Administrator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffMember {
    hospital_id: HospitalId,
    gender: Gender,
    age: u32,
    #[serde(flatten)]
    role: StaffRole,
}

impl StaffMember {
    pub(crate) fn new(hospital_id: HospitalId, gender: Gender, age: u32, role: StaffRole) -> Self {
        Self {
            hospital_id,
            gender,
            age,
            role,
        }
    }

    /// Joins a staff row with the role taken from the accounts table.
    ///
    /// Doctors must carry a doctor ID; for other roles that column is ignored.
    pub(crate) fn join(row: &StaffRow, role: AccountRole) -> LedgerResult<Self> {
        let hospital_id = &row.hospital_id;
        let role = match role {
            AccountRole::Doctor => {
                let doctor_id = row.doctor_id.clone().ok_or_else(|| {
                    LedgerError::InvalidInput(format!("doctor {hospital_id} has no doctor ID"))
                })?;
                StaffRole::Doctor { doctor_id }
            }
            AccountRole::Pharmacist => StaffRole::Pharmacist,
            AccountRole::Administrator => StaffRole::Administrator,
            AccountRole::Patient => {
                return Err(LedgerError::InvalidInput(format!(
                    "staff member {hospital_id} has a patient account"
                )));
            }
        };
        Ok(Self::new(hospital_id.clone(), row.gender, row.age, role))
    }

    pub(crate) fn to_row(&self) -> StaffRow {
        StaffRow {
            hospital_id: self.hospital_id.clone(),
            gender: self.gender,
            age: self.age,
            doctor_id: self.doctor_id().cloned(),
        }
    }

    /// The same member with new personal details; the role is unchanged.
    pub(crate) fn with_details(&self, gender: Gender, age: u32) -> Self {
        Self {
            gender,
            age,
            ..self.clone()
        }
    }

    pub fn hospital_id(&self) -> &HospitalId {
        &self.hospital_id
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn role(&self) -> &StaffRole {
        &self.role
    }

    /// The doctor ID used in the appointments table, for doctors only.
    pub fn doctor_id(&self) -> Option<&HospitalId> {
        match &self.role {
            StaffRole::Doctor { doctor_id } => Some(doctor_id),
            _ => None,
        }
    }
}

// ============================================================================
// PATIENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patient {
    hospital_id: HospitalId,
    patient_id: HospitalId,
    name: NonEmptyText,
    gender: Gender,
    #[serde(serialize_with = "serialize_date")]
    date_of_birth: NaiveDate,
    blood_type: String,
    email: String,
    contact_number: String,
}

fn serialize_date<S: serde::Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_date(*date))
}

impl Patient {
    /// The same patient with whichever contact details are given replaced.
    pub(crate) fn with_contact(
        &self,
        email: Option<&NonEmptyText>,
        contact_number: Option<&NonEmptyText>,
    ) -> Self {
        let mut updated = self.clone();
        if let Some(email) = email {
            updated.email = email.to_string();
        }
        if let Some(contact_number) = contact_number {
            updated.contact_number = contact_number.to_string();
        }
        updated
    }

    pub fn hospital_id(&self) -> &HospitalId {
        &self.hospital_id
    }

    /// The ID used in the appointments and medical records tables.
    pub fn patient_id(&self) -> &HospitalId {
        &self.patient_id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn date_of_birth(&self) -> NaiveDate {
        self.date_of_birth
    }

    pub fn blood_type(&self) -> &str {
        &self.blood_type
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn contact_number(&self) -> &str {
        &self.contact_number
    }
}

impl TableRow for Patient {
    type Key = HospitalId;
    const TABLE: &'static str = PATIENTS_TABLE;
    const HEADER: &'static [&'static str] = PATIENTS_HEADER;

    fn key(&self) -> HospitalId {
        self.patient_id.clone()
    }

    fn from_cells(row: &[String]) -> LedgerResult<Self> {
        let text = |index: usize| cells::optional(row, index).unwrap_or_default().to_string();
        Ok(Self {
            hospital_id: HospitalId::new(cells::required(row, 0)?)?,
            patient_id: HospitalId::new(cells::required(row, 1)?)?,
            name: NonEmptyText::new(cells::required(row, 2)?)?,
            gender: cells::required(row, 3)?.parse()?,
            date_of_birth: parse_date(cells::required(row, 4)?)?,
            blood_type: text(5),
            email: text(6),
            contact_number: text(7),
        })
    }

    fn to_cells(&self) -> Vec<String> {
        vec![
            self.hospital_id.to_string(),
            self.patient_id.to_string(),
            self.name.to_string(),
            self.gender.to_string(),
            format_date(self.date_of_birth),
            self.blood_type.clone(),
            self.email.clone(),
            self.contact_number.clone(),
        ]
    }
}
