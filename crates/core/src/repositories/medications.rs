//! Medication Ledger.
//!
//! Owns the medication inventory: stock levels, low-stock thresholds, the single outstanding
//! replenishment request per medication, and dispensing. Every check-then-write (for example
//! "is there enough stock?" followed by the decrement) runs under the ledger's lock, so two
//! callers in the same process can never both take the last units.

use crate::error::{LedgerError, LedgerResult};
use crate::medication::{Medication, MedicationKey};
use crate::outcome::{Conflict, Outcome};
use crate::repositories::shared::{lock, TableRepository};
use clinic_tables::TableStore;
use clinic_types::NonEmptyText;
use std::sync::Mutex;

#[derive(Debug)]
pub struct MedicationLedger {
    table: Mutex<TableRepository<Medication>>,
}

impl MedicationLedger {
    /// Loads the medication table from `store`.
    pub fn load(store: TableStore) -> LedgerResult<Self> {
        Ok(Self {
            table: Mutex::new(TableRepository::load(store)?),
        })
    }

    /// Re-reads the table, discarding the in-memory copy.
    ///
    /// Needed before retrying after a version conflict.
    pub fn reload(&self) -> LedgerResult<()> {
        lock(&self.table, "medications")?.reload()
    }

    pub fn get(&self, name: &str) -> LedgerResult<Option<Medication>> {
        let table = lock(&self.table, "medications")?;
        Ok(table.get(&MedicationKey::new(name)).cloned())
    }

    pub fn all(&self) -> LedgerResult<Vec<Medication>> {
        let table = lock(&self.table, "medications")?;
        Ok(table.values().cloned().collect())
    }

    /// Medications at or below their alert threshold. Purely informational.
    pub fn low_stock(&self) -> LedgerResult<Vec<Medication>> {
        let table = lock(&self.table, "medications")?;
        Ok(table.values().filter(|m| m.is_low_stock()).cloned().collect())
    }

    /// Medications with an outstanding replenishment request.
    pub fn pending_replenishments(&self) -> LedgerResult<Vec<Medication>> {
        let table = lock(&self.table, "medications")?;
        Ok(table
            .values()
            .filter(|m| m.has_pending_replenishment())
            .cloned()
            .collect())
    }

    /// Adds a medication to the inventory.
    ///
    /// Names are unique ignoring case; a clash is a `DuplicateMedication` conflict.
    pub fn add_medication(
        &self,
        name: &str,
        current_stock: u32,
        low_stock_threshold: u32,
    ) -> LedgerResult<Outcome<Medication>> {
        let name = NonEmptyText::new(name)?;
        let mut table = lock(&self.table, "medications")?;

        let key = MedicationKey::new(name.as_str());
        if let Some(existing) = table.get(&key) {
            tracing::warn!("medication {} already exists", existing.name());
            return Ok(Outcome::Conflict(Conflict::DuplicateMedication(
                existing.name().to_owned(),
            )));
        }

        let medication = Medication::new(name, current_stock, low_stock_threshold);
        table.put(medication.clone())?;
        tracing::info!(
            "added medication {} with stock {}",
            medication.name(),
            current_stock
        );
        Ok(Outcome::Applied(medication))
    }

    /// Overwrites the stock level and alert threshold. Any pending request is kept.
    pub fn update_levels(
        &self,
        name: &str,
        current_stock: u32,
        low_stock_threshold: u32,
    ) -> LedgerResult<Outcome<Medication>> {
        self.update(name, "update levels of", |m| {
            Ok(m.with_levels(current_stock, low_stock_threshold))
        })
    }

    pub fn remove_medication(&self, name: &str) -> LedgerResult<Outcome<Medication>> {
        let mut table = lock(&self.table, "medications")?;
        match table.remove(&MedicationKey::new(name))? {
            Some(removed) => {
                tracing::info!("removed medication {}", removed.name());
                Ok(Outcome::Applied(removed))
            }
            None => Ok(Outcome::NotFound),
        }
    }

    /// Takes `amount` units out of stock.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidInput` when `amount` is zero. Insufficient stock is not an
    /// error: it comes back as `Outcome::Conflict` with nothing written.
    pub fn dispense(&self, name: &str, amount: u32) -> LedgerResult<Outcome<Medication>> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput(
                "dispense amount must be greater than zero".into(),
            ));
        }
        self.update(name, "dispense", |m| m.dispensed(amount))
    }

    /// Records a request for `amount` more units, replacing any earlier request.
    pub fn submit_replenish_request(
        &self,
        name: &str,
        amount: u32,
    ) -> LedgerResult<Outcome<Medication>> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput(
                "replenish amount must be greater than zero".into(),
            ));
        }
        self.update(name, "request replenishment of", |m| {
            Ok(m.with_replenishment_request(amount))
        })
    }

    /// Adds the pending amount to stock and clears the request.
    pub fn approve_replenish_request(&self, name: &str) -> LedgerResult<Outcome<Medication>> {
        self.update(name, "approve replenishment of", Medication::replenished)
    }

    /// Returns stock taken by a dispense whose outcome could not be recorded.
    pub(crate) fn restock(&self, name: &str, amount: u32) -> LedgerResult<Outcome<Medication>> {
        self.update(name, "restock", |m| Ok(m.restocked(amount)))
    }

    fn update(
        &self,
        name: &str,
        action: &str,
        change: impl FnOnce(&Medication) -> Result<Medication, Conflict>,
    ) -> LedgerResult<Outcome<Medication>> {
        let mut table = lock(&self.table, "medications")?;

        let Some(current) = table.get(&MedicationKey::new(name)) else {
            tracing::warn!("cannot {} {}: not in inventory", action, name);
            return Ok(Outcome::NotFound);
        };

        match change(current) {
            Ok(next) => {
                table.put(next.clone())?;
                tracing::info!(
                    "{} {}: stock {}, pending {}",
                    action,
                    next.name(),
                    next.current_stock(),
                    next.replenish_amount()
                );
                Ok(Outcome::Applied(next))
            }
            Err(conflict) => {
                tracing::warn!("cannot {} {}: {}", action, name, conflict);
                Ok(Outcome::Conflict(conflict))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger(temp: &TempDir) -> MedicationLedger {
        MedicationLedger::load(TableStore::new(temp.path()).unwrap()).unwrap()
    }

    fn stocked(temp: &TempDir) -> MedicationLedger {
        let ledger = ledger(temp);
        assert!(ledger.add_medication("Paracetamol", 10, 3).unwrap().is_applied());
        assert!(ledger.add_medication("Ibuprofen", 2, 5).unwrap().is_applied());
        ledger
    }

    #[test]
    fn test_dispense_decrements_by_exact_amount() {
        let temp = TempDir::new().unwrap();
        let ledger = stocked(&temp);

        let after = ledger.dispense("paracetamol", 4).unwrap().applied().unwrap();
        assert_eq!(after.current_stock(), 6);

        // A fresh load sees the persisted value.
        let reloaded = self::ledger(&temp);
        assert_eq!(reloaded.get("Paracetamol").unwrap().unwrap().current_stock(), 6);
    }

    #[test]
    fn test_dispense_more_than_stock_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let ledger = stocked(&temp);

        let outcome = ledger.dispense("Ibuprofen", 3).unwrap();
        assert!(matches!(
            outcome,
            Outcome::Conflict(Conflict::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            })
        ));
        assert_eq!(ledger.get("Ibuprofen").unwrap().unwrap().current_stock(), 2);
    }

    #[test]
    fn test_dispense_unknown_and_zero() {
        let temp = TempDir::new().unwrap();
        let ledger = stocked(&temp);
        assert_eq!(ledger.dispense("Aspirin", 1).unwrap(), Outcome::NotFound);
        assert!(matches!(
            ledger.dispense("Paracetamol", 0),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_replenishment_flow() {
        let temp = TempDir::new().unwrap();
        let ledger = stocked(&temp);

        assert!(matches!(
            ledger.approve_replenish_request("Ibuprofen").unwrap(),
            Outcome::Conflict(Conflict::NoReplenishmentPending(_))
        ));

        let requested = ledger
            .submit_replenish_request("Ibuprofen", 20)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(requested.current_stock(), 2);
        assert_eq!(ledger.pending_replenishments().unwrap().len(), 1);

        let approved = ledger
            .approve_replenish_request("IBUPROFEN")
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(approved.current_stock(), 22);
        assert_eq!(approved.replenish_amount(), 0);
        assert!(ledger.pending_replenishments().unwrap().is_empty());

        assert_eq!(
            ledger.approve_replenish_request("Aspirin").unwrap(),
            Outcome::NotFound
        );
    }

    #[test]
    fn test_low_stock_worklist() {
        let temp = TempDir::new().unwrap();
        let ledger = stocked(&temp);

        let low: Vec<String> = ledger
            .low_stock()
            .unwrap()
            .iter()
            .map(|m| m.name().to_owned())
            .collect();
        assert_eq!(low, vec!["Ibuprofen".to_string()]);
    }

    #[test]
    fn test_add_update_remove() {
        let temp = TempDir::new().unwrap();
        let ledger = stocked(&temp);

        assert!(matches!(
            ledger.add_medication("PARACETAMOL", 1, 1).unwrap(),
            Outcome::Conflict(Conflict::DuplicateMedication(_))
        ));

        let updated = ledger
            .update_levels("Paracetamol", 50, 10)
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(updated.current_stock(), 50);
        assert_eq!(updated.low_stock_threshold(), 10);
        assert_eq!(updated.name(), "Paracetamol");

        assert!(ledger.remove_medication("paracetamol").unwrap().is_applied());
        assert_eq!(ledger.remove_medication("paracetamol").unwrap(), Outcome::NotFound);
        assert_eq!(ledger.all().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_ledger_detects_lost_update() {
        let temp = TempDir::new().unwrap();
        let first = stocked(&temp);
        let second = ledger(&temp);

        first.dispense("Paracetamol", 1).unwrap();
        let err = second.dispense("Paracetamol", 1).unwrap_err();
        assert!(err.is_version_conflict());

        second.reload().unwrap();
        let after = second.dispense("Paracetamol", 1).unwrap().applied().unwrap();
        assert_eq!(after.current_stock(), 8);
    }

    #[test]
    fn test_concurrent_dispenses_never_overdraw() {
        let temp = TempDir::new().unwrap();
        let ledger = stocked(&temp);

        // Ten units of Paracetamol, twelve threads each taking three.
        let taken: Vec<u32> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..12)
                .map(|_| {
                    let ledger = &ledger;
                    scope.spawn(move || match ledger.dispense("Paracetamol", 3).unwrap() {
                        Outcome::Applied(after) => {
                            assert!(after.current_stock() <= 7);
                            3
                        }
                        Outcome::Conflict(Conflict::InsufficientStock { .. }) => 0,
                        other => panic!("unexpected outcome {other:?}"),
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let remaining = ledger.get("Paracetamol").unwrap().unwrap().current_stock();
        assert_eq!(taken.iter().filter(|t| **t > 0).count(), 3);
        assert_eq!(taken.iter().sum::<u32>() + remaining, 10);
        assert_eq!(remaining, 1);
        assert_eq!(
            self::ledger(&temp).get("Paracetamol").unwrap().unwrap().current_stock(),
            1
        );
    }
}
