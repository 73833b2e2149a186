//! Medication inventory rows.

use crate::constants::{MEDICATIONS_HEADER, MEDICATIONS_TABLE};
use crate::outcome::Conflict;
use crate::repositories::shared::TableRow;
use crate::LedgerResult;
use clinic_tables::cells;
use clinic_types::NonEmptyText;
use serde::Serialize;
use std::fmt;

/// Case-insensitive identity of a medication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MedicationKey(String);

impl MedicationKey {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }
}

impl fmt::Display for MedicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the medication inventory.
///
/// `replenish_amount` is the single outstanding replenishment request; zero means none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Medication {
    name: NonEmptyText,
    current_stock: u32,
    low_stock_threshold: u32,
    replenish_amount: u32,
}

impl Medication {
    pub(crate) fn new(name: NonEmptyText, current_stock: u32, low_stock_threshold: u32) -> Self {
        Self {
            name,
            current_stock,
            low_stock_threshold,
            replenish_amount: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn key(&self) -> MedicationKey {
        MedicationKey::new(self.name.as_str())
    }

    pub fn current_stock(&self) -> u32 {
        self.current_stock
    }

    pub fn low_stock_threshold(&self) -> u32 {
        self.low_stock_threshold
    }

    pub fn replenish_amount(&self) -> u32 {
        self.replenish_amount
    }

    /// Stock is at or below the alert threshold.
    pub fn is_low_stock(&self) -> bool {
        self.current_stock <= self.low_stock_threshold
    }

    pub fn has_pending_replenishment(&self) -> bool {
        self.replenish_amount > 0
    }

    pub(crate) fn dispensed(&self, amount: u32) -> Result<Self, Conflict> {
        let remaining =
            self.current_stock
                .checked_sub(amount)
                .ok_or_else(|| Conflict::InsufficientStock {
                    medication: self.name.to_string(),
                    available: self.current_stock,
                    requested: amount,
                })?;
        Ok(Self {
            current_stock: remaining,
            ..self.clone()
        })
    }

    /// Replaces any outstanding request with `amount`.
    pub(crate) fn with_replenishment_request(&self, amount: u32) -> Self {
        Self {
            replenish_amount: amount,
            ..self.clone()
        }
    }

    pub(crate) fn replenished(&self) -> Result<Self, Conflict> {
        if !self.has_pending_replenishment() {
            return Err(Conflict::NoReplenishmentPending(self.name.to_string()));
        }
        Ok(Self {
            current_stock: self.current_stock.saturating_add(self.replenish_amount),
            replenish_amount: 0,
            ..self.clone()
        })
    }

    pub(crate) fn with_levels(&self, current_stock: u32, low_stock_threshold: u32) -> Self {
        Self {
            current_stock,
            low_stock_threshold,
            ..self.clone()
        }
    }

    /// Puts back stock taken by a dispense that could not be recorded.
    pub(crate) fn restocked(&self, amount: u32) -> Self {
        Self {
            current_stock: self.current_stock.saturating_add(amount),
            ..self.clone()
        }
    }
}

impl TableRow for Medication {
    type Key = MedicationKey;
    const TABLE: &'static str = MEDICATIONS_TABLE;
    const HEADER: &'static [&'static str] = MEDICATIONS_HEADER;

    fn key(&self) -> MedicationKey {
        Medication::key(self)
    }

    fn from_cells(row: &[String]) -> LedgerResult<Self> {
        Ok(Self {
            name: NonEmptyText::new(cells::required(row, 0)?)?,
            current_stock: cells::count(cells::required(row, 1)?)?,
            low_stock_threshold: cells::count(cells::required(row, 2)?)?,
            replenish_amount: cells::optional(row, 3)
                .map(cells::count)
                .transpose()?
                .unwrap_or(0),
        })
    }

    fn to_cells(&self) -> Vec<String> {
        vec![
            self.name.to_string(),
            self.current_stock.to_string(),
            self.low_stock_threshold.to_string(),
            self.replenish_amount.to_string(),
        ]
    }
}
