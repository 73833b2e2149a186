//! Staff and patient directory.
//!
//! Joins the staff table with the role column of the accounts table, and indexes the patients
//! table by patient ID. Staff are added, updated and removed here; patients are registered
//! elsewhere, and only their contact details are written back.
//!
//! Adding a staff member writes two tables. The account row goes first and is removed again if
//! the staff row cannot be flushed, so a staff row never exists without its account.

use crate::constants::STAFF_TABLE;
use crate::error::{LedgerError, LedgerResult};
use crate::outcome::{Conflict, Outcome};
use crate::people::{Account, AccountRole, Gender, Patient, StaffMember, StaffRole, StaffRow};
use crate::repositories::shared::{lock, TableRepository};
use clinic_tables::TableStore;
use clinic_types::{HospitalId, NonEmptyText};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Mutex;

/// Prefix of generated doctor IDs.
const DOCTOR_ID_PREFIX: &str = "D";

/// Criteria for listing staff. Unset fields match everyone.
#[derive(Debug, Clone, Default)]
pub struct StaffFilter {
    pub role: Option<AccountRole>,
    pub gender: Option<Gender>,
    pub age: Option<RangeInclusive<u32>>,
}

impl StaffFilter {
    fn matches(&self, member: &StaffMember) -> bool {
        self.role.is_none_or(|role| member.role().account_role() == role)
            && self.gender.is_none_or(|gender| member.gender() == gender)
            && self
                .age
                .as_ref()
                .is_none_or(|range| range.contains(&member.age()))
    }
}

#[derive(Debug)]
struct Directory {
    accounts: TableRepository<Account>,
    staff: TableRepository<StaffRow>,
    patients: TableRepository<Patient>,
    /// Staff rows joined with their account roles, keyed by hospital ID.
    members: BTreeMap<HospitalId, StaffMember>,
}

impl Directory {
    fn load(store: &TableStore) -> LedgerResult<Self> {
        let accounts: TableRepository<Account> = TableRepository::load(store.clone())?;
        let staff: TableRepository<StaffRow> = TableRepository::load(store.clone())?;
        let patients: TableRepository<Patient> = TableRepository::load(store.clone())?;
        let members = join_staff(&accounts, &staff)?;

        tracing::debug!(
            "directory loaded: {} staff, {} patients",
            members.len(),
            patients.values().count()
        );
        Ok(Self {
            accounts,
            staff,
            patients,
            members,
        })
    }
}

#[derive(Debug)]
pub struct DirectoryService {
    store: TableStore,
    book: Mutex<Directory>,
}

impl DirectoryService {
    /// Loads the accounts, staff and patients tables. Missing tables load as empty.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidRow` if any row cannot be decoded, and
    /// `LedgerError::InconsistentRow` if a staff row has no account, has a patient account,
    /// or is a doctor without a unique doctor ID.
    pub fn load(store: TableStore) -> LedgerResult<Self> {
        let book = Directory::load(&store)?;
        Ok(Self {
            store,
            book: Mutex::new(book),
        })
    }

    /// Re-reads all three tables. On failure the previous copy is kept.
    pub fn reload(&self) -> LedgerResult<()> {
        let fresh = Directory::load(&self.store)?;
        *lock(&self.book, "directory")? = fresh;
        Ok(())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// All staff, ordered by hospital ID.
    pub fn staff(&self) -> LedgerResult<Vec<StaffMember>> {
        self.filter_staff(&StaffFilter::default())
    }

    pub fn filter_staff(&self, filter: &StaffFilter) -> LedgerResult<Vec<StaffMember>> {
        let book = lock(&self.book, "directory")?;
        Ok(book
            .members
            .values()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    pub fn doctors(&self) -> LedgerResult<Vec<StaffMember>> {
        self.filter_staff(&StaffFilter {
            role: Some(AccountRole::Doctor),
            ..StaffFilter::default()
        })
    }

    /// The doctor whose doctor ID (as used in the appointments table) is `doctor_id`.
    pub fn doctor(&self, doctor_id: &HospitalId) -> LedgerResult<Option<StaffMember>> {
        let book = lock(&self.book, "directory")?;
        let doctor = book
            .members
            .values()
            .find(|m| m.doctor_id() == Some(doctor_id))
            .cloned();
        Ok(doctor)
    }

    pub fn staff_member(&self, hospital_id: &HospitalId) -> LedgerResult<Option<StaffMember>> {
        let book = lock(&self.book, "directory")?;
        Ok(book.members.get(hospital_id).cloned())
    }

    pub fn patients(&self) -> LedgerResult<Vec<Patient>> {
        let book = lock(&self.book, "directory")?;
        Ok(book.patients.values().cloned().collect())
    }

    /// Looks a patient up by the patient ID used in the appointments table.
    pub fn patient(&self, patient_id: &HospitalId) -> LedgerResult<Option<Patient>> {
        let book = lock(&self.book, "directory")?;
        Ok(book.patients.get(patient_id).cloned())
    }

    pub fn patient_by_hospital_id(&self, hospital_id: &HospitalId) -> LedgerResult<Option<Patient>> {
        let book = lock(&self.book, "directory")?;
        let patient = book
            .patients
            .values()
            .find(|p| p.hospital_id() == hospital_id)
            .cloned();
        Ok(patient)
    }

    // ========================================================================
    // STAFF MANAGEMENT
    // ========================================================================

    /// Creates an account and a staff row for a new staff member.
    ///
    /// Doctors are given the next free doctor ID. The account's credential column is left
    /// blank for the authentication layer to fill in.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidInput` for a patient role. If the account was written but
    /// the staff row could not be, the account is removed again; if that also fails the error
    /// is `LedgerError::RollbackFailed`.
    pub fn add_staff(
        &self,
        hospital_id: &str,
        role: AccountRole,
        gender: Gender,
        age: u32,
    ) -> LedgerResult<Outcome<StaffMember>> {
        let hospital_id = HospitalId::new(hospital_id)?;
        let mut book = lock(&self.book, "directory")?;

        if book.accounts.get(&hospital_id).is_some() {
            tracing::warn!("cannot add staff {}: account already exists", hospital_id);
            return Ok(Outcome::Conflict(Conflict::DuplicateAccount(hospital_id)));
        }

        let staff_role = match role {
            AccountRole::Doctor => StaffRole::Doctor {
                doctor_id: next_doctor_id(book.members.values())?,
            },
            AccountRole::Pharmacist => StaffRole::Pharmacist,
            AccountRole::Administrator => StaffRole::Administrator,
            AccountRole::Patient => {
                return Err(LedgerError::InvalidInput(format!(
                    "{hospital_id} cannot be added as staff with a patient account"
                )));
            }
        };
        let member = StaffMember::new(hospital_id.clone(), gender, age, staff_role);

        book.accounts
            .put(Account::provisioned(hospital_id.clone(), role))?;

        if let Err(operation_error) = book.staff.put(member.to_row()) {
            tracing::warn!(
                "failed to write staff row for {}, removing its account",
                hospital_id
            );
            return Err(match book.accounts.remove(&hospital_id) {
                Ok(_) => operation_error,
                Err(rollback_error) => LedgerError::RollbackFailed {
                    operation_error: Box::new(operation_error),
                    rollback_error: Box::new(rollback_error),
                },
            });
        }

        book.members.insert(hospital_id.clone(), member.clone());
        tracing::info!("added {} {}", role, hospital_id);
        Ok(Outcome::Applied(member))
    }

    /// Replaces a staff member's gender and age. The role and doctor ID are unchanged.
    pub fn update_staff(
        &self,
        hospital_id: &HospitalId,
        gender: Gender,
        age: u32,
    ) -> LedgerResult<Outcome<StaffMember>> {
        let mut book = lock(&self.book, "directory")?;

        let Some(current) = book.members.get(hospital_id) else {
            tracing::warn!("cannot update staff {}: not found", hospital_id);
            return Ok(Outcome::NotFound);
        };
        let updated = current.with_details(gender, age);

        book.staff.put(updated.to_row())?;
        book.members.insert(hospital_id.clone(), updated.clone());
        tracing::info!("updated staff {}: {}, {}", hospital_id, gender, age);
        Ok(Outcome::Applied(updated))
    }

    /// Removes a staff member's staff row and then their account.
    ///
    /// Appointments that name a removed doctor are left in place.
    pub fn remove_staff(&self, hospital_id: &HospitalId) -> LedgerResult<Outcome<StaffMember>> {
        let mut book = lock(&self.book, "directory")?;

        let Some(member) = book.members.get(hospital_id).cloned() else {
            tracing::warn!("cannot remove staff {}: not found", hospital_id);
            return Ok(Outcome::NotFound);
        };

        book.staff.remove(hospital_id)?;
        book.members.remove(hospital_id);
        book.accounts.remove(hospital_id)?;

        tracing::info!("removed staff {}", hospital_id);
        Ok(Outcome::Applied(member))
    }

    // ========================================================================
    // PATIENT CONTACT DETAILS
    // ========================================================================

    /// Replaces whichever of the patient's email and contact number are given.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidInput` when neither value is given, and
    /// `LedgerError::Text` when a given value is blank.
    pub fn update_patient_contact(
        &self,
        patient_id: &HospitalId,
        email: Option<&str>,
        contact_number: Option<&str>,
    ) -> LedgerResult<Outcome<Patient>> {
        if email.is_none() && contact_number.is_none() {
            return Err(LedgerError::InvalidInput(
                "no contact details to update".into(),
            ));
        }
        let email = email.map(NonEmptyText::new).transpose()?;
        let contact_number = contact_number.map(NonEmptyText::new).transpose()?;

        let mut book = lock(&self.book, "directory")?;
        let Some(current) = book.patients.get(patient_id) else {
            tracing::warn!("cannot update contact of {}: not a patient", patient_id);
            return Ok(Outcome::NotFound);
        };
        let updated = current.with_contact(email.as_ref(), contact_number.as_ref());

        book.patients.put(updated.clone())?;
        tracing::info!("updated contact details of patient {}", patient_id);
        Ok(Outcome::Applied(updated))
    }
}

/// Joins every staff row with its account, checking the pair is consistent.
fn join_staff(
    accounts: &TableRepository<Account>,
    staff: &TableRepository<StaffRow>,
) -> LedgerResult<BTreeMap<HospitalId, StaffMember>> {
    let mut members = BTreeMap::new();
    let mut doctor_ids = BTreeMap::new();

    for row in staff.values() {
        let hospital_id = row.hospital_id();
        let inconsistent = |reason: String| LedgerError::InconsistentRow {
            table: STAFF_TABLE,
            key: hospital_id.to_string(),
            reason,
        };

        let account = accounts
            .get(hospital_id)
            .ok_or_else(|| inconsistent("no matching account".into()))?;
        let member =
            StaffMember::join(row, account.role()).map_err(|e| inconsistent(e.to_string()))?;

        if let Some(doctor_id) = member.doctor_id() {
            if let Some(other) = doctor_ids.insert(doctor_id.clone(), hospital_id.clone()) {
                return Err(inconsistent(format!(
                    "doctor ID {doctor_id} is also used by {other}"
                )));
            }
        }
        members.insert(hospital_id.clone(), member);
    }
    Ok(members)
}

/// `D` followed by one more than the highest numeric suffix in use, at least three digits.
fn next_doctor_id<'a>(members: impl Iterator<Item = &'a StaffMember>) -> LedgerResult<HospitalId> {
    let highest = members
        .filter_map(StaffMember::doctor_id)
        .filter_map(|id| id.as_str().strip_prefix(DOCTOR_ID_PREFIX))
        .filter_map(|digits| digits.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    let next = highest
        .checked_add(1)
        .ok_or(LedgerError::IdsExhausted(STAFF_TABLE))?;
    Ok(HospitalId::new(format!("{DOCTOR_ID_PREFIX}{next:03}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ACCOUNTS_TABLE, PATIENTS_TABLE};
    use crate::repositories::shared::TableRow;
    use tempfile::TempDir;

    fn rows(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn header(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn id(value: &str) -> HospitalId {
        HospitalId::new(value).unwrap()
    }

    fn seeded_store(temp: &TempDir) -> TableStore {
        let store = TableStore::new(temp.path()).unwrap();
        store
            .save_all(
                ACCOUNTS_TABLE,
                0,
                &header(crate::constants::ACCOUNTS_HEADER),
                &rows(&[
                    &["S01", "x", "DOCTOR"],
                    &["S02", "x", "DOCTOR"],
                    &["S03", "x", "PHARMACIST"],
                    &["S04", "x", "ADMINISTRATOR"],
                    &["H100", "x", "PATIENT"],
                ]),
            )
            .unwrap();
        store
            .save_all(
                STAFF_TABLE,
                0,
                &header(crate::constants::STAFF_HEADER),
                &rows(&[
                    &["S01", "FEMALE", "41", "D001"],
                    &["S02", "MALE", "55", "D002"],
                    &["S03", "MALE", "29"],
                    &["S04", "FEMALE", "38"],
                ]),
            )
            .unwrap();
        store
            .save_all(
                PATIENTS_TABLE,
                0,
                &header(crate::constants::PATIENTS_HEADER),
                &rows(&[&[
                    "H100",
                    "P1001",
                    "Alice Tan",
                    "FEMALE",
                    "07-Mar-1990",
                    "O+",
                    "alice@example.com",
                    "91234567",
                ]]),
            )
            .unwrap();
        store
    }

    fn seeded(temp: &TempDir) -> DirectoryService {
        DirectoryService::load(seeded_store(temp)).unwrap()
    }

    #[test]
    fn test_empty_directory_loads() {
        let temp = TempDir::new().unwrap();
        let store = TableStore::new(temp.path()).unwrap();
        let directory = DirectoryService::load(store).unwrap();
        assert!(directory.staff().unwrap().is_empty());
        assert!(directory.patients().unwrap().is_empty());
    }

    #[test]
    fn test_roles_are_joined_from_accounts() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        assert_eq!(directory.staff().unwrap().len(), 4);
        assert_eq!(directory.doctors().unwrap().len(), 2);

        let doctor = directory.doctor(&id("D002")).unwrap().unwrap();
        assert_eq!(doctor.hospital_id().as_str(), "S02");

        let pharmacist = directory.staff_member(&id("S03")).unwrap().unwrap();
        assert_eq!(pharmacist.role().account_role(), AccountRole::Pharmacist);
    }

    #[test]
    fn test_filter_staff() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        let women = directory
            .filter_staff(&StaffFilter {
                gender: Some(Gender::Female),
                ..StaffFilter::default()
            })
            .unwrap();
        assert_eq!(women.len(), 2);

        let over_forty_doctors = directory
            .filter_staff(&StaffFilter {
                role: Some(AccountRole::Doctor),
                age: Some(40..=60),
                ..StaffFilter::default()
            })
            .unwrap();
        assert_eq!(over_forty_doctors.len(), 2);

        let young = directory
            .filter_staff(&StaffFilter {
                age: Some(0..=30),
                ..StaffFilter::default()
            })
            .unwrap();
        assert_eq!(young.len(), 1);
    }

    #[test]
    fn test_patient_lookup() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        let patient = directory.patient(&id("P1001")).unwrap().unwrap();
        assert_eq!(patient.name(), "Alice Tan");
        assert_eq!(
            directory
                .patient_by_hospital_id(&id("H100"))
                .unwrap()
                .map(|p| p.name().to_owned()),
            Some("Alice Tan".to_owned())
        );
    }

    #[test]
    fn test_staff_without_account_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = TableStore::new(temp.path()).unwrap();
        store
            .save_all(
                STAFF_TABLE,
                0,
                &header(crate::constants::STAFF_HEADER),
                &rows(&[&["S09", "MALE", "30"]]),
            )
            .unwrap();

        let result = DirectoryService::load(store);
        assert!(matches!(
            result,
            Err(LedgerError::InconsistentRow {
                table: STAFF_TABLE,
                ref key,
                ..
            }) if key == "S09"
        ));
    }

    #[test]
    fn test_shared_doctor_id_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = seeded_store(&temp);
        let version = store.load_all(STAFF_TABLE).unwrap().version;
        store
            .save_all(
                STAFF_TABLE,
                version,
                &header(crate::constants::STAFF_HEADER),
                &rows(&[
                    &["S01", "FEMALE", "41", "D001"],
                    &["S02", "MALE", "55", "D001"],
                ]),
            )
            .unwrap();

        assert!(matches!(
            DirectoryService::load(store),
            Err(LedgerError::InconsistentRow { .. })
        ));
    }

    #[test]
    fn test_add_staff_writes_account_and_staff_rows() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        let doctor = directory
            .add_staff("S05", AccountRole::Doctor, Gender::Male, 33)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(doctor.doctor_id(), Some(&id("D003")));

        let pharmacist = directory
            .add_staff("S06", AccountRole::Pharmacist, Gender::Female, 27)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(pharmacist.doctor_id(), None);

        // Both tables carry the new rows, and the existing credentials are untouched.
        let store = TableStore::new(temp.path()).unwrap();
        let accounts = store.load_all(ACCOUNTS_TABLE).unwrap().rows;
        assert!(accounts.contains(&header(&["S05", "", "DOCTOR"])));
        assert!(accounts.contains(&header(&["S01", "x", "DOCTOR"])));
        let staff = store.load_all(STAFF_TABLE).unwrap().rows;
        assert!(staff.contains(&header(&["S05", "MALE", "33", "D003"])));
        assert!(staff.contains(&header(&["S06", "FEMALE", "27"])));

        let reloaded = DirectoryService::load(store).unwrap();
        assert_eq!(reloaded.doctors().unwrap().len(), 3);
        assert_eq!(reloaded.doctor(&id("D003")).unwrap(), Some(doctor));
    }

    #[test]
    fn test_add_staff_refuses_existing_account_and_patient_role() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        assert_eq!(
            directory
                .add_staff("H100", AccountRole::Pharmacist, Gender::Female, 30)
                .unwrap(),
            Outcome::Conflict(Conflict::DuplicateAccount(id("H100")))
        );
        assert!(matches!(
            directory.add_staff("S07", AccountRole::Patient, Gender::Male, 30),
            Err(LedgerError::InvalidInput(_))
        ));
        assert_eq!(directory.staff().unwrap().len(), 4);
        assert!(directory.staff_member(&id("S07")).unwrap().is_none());
    }

    #[test]
    fn test_update_staff_keeps_role() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        let updated = directory
            .update_staff(&id("S01"), Gender::Female, 42)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(updated.age(), 42);
        assert_eq!(updated.doctor_id(), Some(&id("D001")));

        assert_eq!(
            directory
                .update_staff(&id("S99"), Gender::Male, 50)
                .unwrap(),
            Outcome::NotFound
        );

        let reloaded = DirectoryService::load(TableStore::new(temp.path()).unwrap()).unwrap();
        assert_eq!(
            reloaded.staff_member(&id("S01")).unwrap().map(|m| m.age()),
            Some(42)
        );
    }

    #[test]
    fn test_remove_staff_drops_account_too() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        let removed = directory
            .remove_staff(&id("S03"))
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(removed.role(), &StaffRole::Pharmacist);
        assert_eq!(directory.remove_staff(&id("S03")).unwrap(), Outcome::NotFound);

        let store = TableStore::new(temp.path()).unwrap();
        let accounts = store.load_all(ACCOUNTS_TABLE).unwrap().rows;
        assert!(accounts.iter().all(|row| row[0] != "S03"));
        assert_eq!(accounts.len(), 4);

        // The freed hospital ID can be reused.
        assert!(directory
            .add_staff("S03", AccountRole::Administrator, Gender::Male, 30)
            .unwrap()
            .is_applied());
    }

    #[test]
    fn test_doctor_ids_are_not_reused_after_removal() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        directory.remove_staff(&id("S01")).unwrap();
        let doctor = directory
            .add_staff("S08", AccountRole::Doctor, Gender::Female, 45)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(doctor.doctor_id(), Some(&id("D003")));
    }

    #[test]
    fn test_failed_staff_write_removes_new_account() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        // Another writer changes the staff table, so the staff flush hits a stale version.
        let store = TableStore::new(temp.path()).unwrap();
        let staff = store.load_all(STAFF_TABLE).unwrap();
        store
            .save_all(STAFF_TABLE, staff.version, &staff.header, &staff.rows)
            .unwrap();

        let err = directory
            .add_staff("S05", AccountRole::Pharmacist, Gender::Male, 30)
            .unwrap_err();
        assert!(err.is_version_conflict());

        let accounts = store.load_all(ACCOUNTS_TABLE).unwrap().rows;
        assert!(accounts.iter().all(|row| row[0] != "S05"));
        assert!(directory.staff_member(&id("S05")).unwrap().is_none());

        directory.reload().unwrap();
        assert!(directory
            .add_staff("S05", AccountRole::Pharmacist, Gender::Male, 30)
            .unwrap()
            .is_applied());
    }

    #[test]
    fn test_update_patient_contact() {
        let temp = TempDir::new().unwrap();
        let directory = seeded(&temp);

        let updated = directory
            .update_patient_contact(&id("P1001"), Some("alice.tan@example.com"), None)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(updated.email(), "alice.tan@example.com");
        assert_eq!(updated.contact_number(), "91234567");

        assert_eq!(
            directory
                .update_patient_contact(&id("P9999"), None, Some("80000000"))
                .unwrap(),
            Outcome::NotFound
        );
        assert!(matches!(
            directory.update_patient_contact(&id("P1001"), None, None),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            directory.update_patient_contact(&id("P1001"), Some("  "), None),
            Err(LedgerError::Text(_))
        ));

        let store = TableStore::new(temp.path()).unwrap();
        let row = &store.load_all(PATIENTS_TABLE).unwrap().rows[0];
        assert_eq!(row, &updated.to_cells());
        assert_eq!(row[4], "07-Mar-1990");
    }
}
