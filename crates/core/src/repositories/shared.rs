//! Shared repository machinery.
//!
//! Every repository follows the same discipline: load the whole table at construction, keep
//! it in memory as a key-indexed map, and rewrite the whole table on every mutation.
//!
//! ## Key Components
//!
//! - **`TableRow`**: how a domain type maps to and from a row of string cells
//! - **`TableRepository`**: the in-memory map plus the version it was loaded at; mutations are
//!   staged on a copy and only published after the flush succeeds
//! - **`IdCounter`**: monotonic numeric IDs seeded from the highest ID on disk

use crate::error::{LedgerError, LedgerResult};
use clinic_tables::{cells, TableData, TableStore, TablesError};
use clinic_types::RecordId;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};

/// Mapping between a domain type and one row of its table.
pub(crate) trait TableRow: Clone + Sized {
    /// Unique key of the row within its table.
    type Key: Ord + Clone + Debug;

    /// Name of the backing table.
    const TABLE: &'static str;

    /// Header written when the table is created.
    const HEADER: &'static [&'static str];

    fn key(&self) -> Self::Key;

    fn from_cells(cells: &[String]) -> LedgerResult<Self>;

    fn to_cells(&self) -> Vec<String>;
}

/// In-memory copy of one table.
#[derive(Debug)]
pub(crate) struct TableRepository<R: TableRow> {
    store: TableStore,
    header: Vec<String>,
    version: u64,
    rows: BTreeMap<R::Key, R>,
}

impl<R: TableRow> TableRepository<R> {
    /// Loads the whole table. A table that has never been written loads as empty.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Tables` if the file cannot be read, or `LedgerError::InvalidRow`
    /// (with a 1-based data row number) if a row cannot be decoded or repeats a key.
    pub(crate) fn load(store: TableStore) -> LedgerResult<Self> {
        let data = match store.load_all(R::TABLE) {
            Ok(data) => data,
            Err(TablesError::TableNotFound(_)) => {
                tracing::debug!("table {} not found, starting empty", R::TABLE);
                TableData {
                    header: Vec::new(),
                    rows: Vec::new(),
                    version: 0,
                }
            }
            Err(e) => return Err(e.into()),
        };

        let header = if data.header.is_empty() {
            R::HEADER.iter().map(|h| h.to_string()).collect()
        } else {
            data.header
        };

        let mut rows = BTreeMap::new();
        for (index, row_cells) in data.rows.iter().enumerate() {
            let invalid = |reason: String| LedgerError::InvalidRow {
                table: R::TABLE,
                row: index + 1,
                reason,
            };
            let row = R::from_cells(row_cells).map_err(|e| invalid(e.to_string()))?;
            let key = row.key();
            if rows.insert(key.clone(), row).is_some() {
                return Err(invalid(format!("duplicate key {key:?}")));
            }
        }

        tracing::debug!(
            "loaded {} rows from {} at version {}",
            rows.len(),
            R::TABLE,
            data.version
        );

        Ok(Self {
            store,
            header,
            version: data.version,
            rows,
        })
    }

    /// Discards the in-memory copy and loads the table again.
    pub(crate) fn reload(&mut self) -> LedgerResult<()> {
        *self = Self::load(self.store.clone())?;
        Ok(())
    }

    pub(crate) fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    #[cfg(test)]
    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    /// Applies `change` to a copy of the rows, rewrites the table, and only then publishes the
    /// copy. If the flush fails the in-memory rows are left exactly as they were.
    pub(crate) fn commit<T>(
        &mut self,
        change: impl FnOnce(&mut BTreeMap<R::Key, R>) -> T,
    ) -> LedgerResult<T> {
        let mut staged = self.rows.clone();
        let result = change(&mut staged);

        let encoded: Vec<Vec<String>> = staged.values().map(R::to_cells).collect();
        let version = self
            .store
            .save_all(R::TABLE, self.version, &self.header, &encoded)?;

        self.rows = staged;
        self.version = version;
        Ok(result)
    }

    /// Inserts or replaces a single row.
    pub(crate) fn put(&mut self, row: R) -> LedgerResult<()> {
        self.commit(|rows| {
            rows.insert(row.key(), row);
        })
    }

    /// Removes a single row, returning it if it existed.
    pub(crate) fn remove(&mut self, key: &R::Key) -> LedgerResult<Option<R>> {
        if !self.rows.contains_key(key) {
            return Ok(None);
        }
        self.commit(|rows| rows.remove(key))
    }
}

/// Monotonic allocator for numeric row IDs.
///
/// Seeded from the highest ID present at load time; an empty table starts at 1. Once
/// `u32::MAX` has been used the counter is exhausted and never wraps onto an existing row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdCounter {
    table: &'static str,
    next: Option<RecordId>,
}

impl IdCounter {
    pub(crate) fn seeded(table: &'static str, ids: impl Iterator<Item = RecordId>) -> Self {
        let next = match ids.max() {
            Some(highest) => highest.next(),
            None => Some(RecordId::FIRST),
        };
        Self { table, next }
    }

    /// The ID the next insert should use.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::IdsExhausted` when every ID has been handed out.
    pub(crate) fn peek(&self) -> LedgerResult<RecordId> {
        self.next.ok_or(LedgerError::IdsExhausted(self.table))
    }

    /// Whichever of the two counters is further ahead. An exhausted counter is furthest.
    pub(crate) fn max_with(self, other: IdCounter) -> IdCounter {
        match (self.next, other.next) {
            (None, _) => self,
            (_, None) => other,
            (Some(mine), Some(theirs)) if theirs > mine => other,
            _ => self,
        }
    }

    /// Records that `id` has been persisted, so it is never handed out again.
    pub(crate) fn advance_past(&mut self, id: RecordId) {
        if self.next.is_some_and(|next| id >= next) {
            self.next = id.next();
        }
    }
}

/// Parses a numeric ID cell, tolerating decimal encodings such as `"3.0"`.
pub(crate) fn record_id_cell(cell: &str) -> LedgerResult<RecordId> {
    let value = cells::count(cell)?;
    Ok(RecordId::new(value)?)
}

/// Locks a repository mutex, mapping poisoning to a ledger error.
pub(crate) fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    what: &'static str,
) -> LedgerResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| LedgerError::LockPoisoned(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        name: String,
        value: u32,
    }

    impl TableRow for Counter {
        type Key = String;
        const TABLE: &'static str = "counters";
        const HEADER: &'static [&'static str] = &["Name", "Value"];

        fn key(&self) -> String {
            self.name.clone()
        }

        fn from_cells(row: &[String]) -> LedgerResult<Self> {
            Ok(Self {
                name: cells::required(row, 0)?.to_string(),
                value: cells::count(cells::required(row, 1)?)?,
            })
        }

        fn to_cells(&self) -> Vec<String> {
            vec![self.name.clone(), self.value.to_string()]
        }
    }

    fn counter(name: &str, value: u32) -> Counter {
        Counter {
            name: name.into(),
            value,
        }
    }

    #[test]
    fn test_missing_table_loads_empty_with_canonical_header() {
        let temp = TempDir::new().unwrap();
        let store = TableStore::new(temp.path()).unwrap();
        let mut repo = TableRepository::<Counter>::load(store.clone()).unwrap();
        assert_eq!(repo.values().count(), 0);
        assert_eq!(repo.version(), 0);

        repo.put(counter("a", 1)).unwrap();
        let data = store.load_all("counters").unwrap();
        assert_eq!(data.header, vec!["Name", "Value"]);
        assert_eq!(data.rows, vec![vec!["a".to_string(), "1".to_string()]]);
    }

    #[test]
    fn test_failed_flush_leaves_memory_untouched() {
        let temp = TempDir::new().unwrap();
        let store = TableStore::new(temp.path()).unwrap();
        let mut first = TableRepository::<Counter>::load(store.clone()).unwrap();
        let mut second = TableRepository::<Counter>::load(store).unwrap();

        first.put(counter("a", 1)).unwrap();

        // `second` still believes the table is at version 0.
        let result = second.put(counter("b", 2));
        assert!(matches!(result, Err(ref e) if e.is_version_conflict()));
        assert!(second.get(&"b".to_string()).is_none());

        second.reload().unwrap();
        assert_eq!(second.get(&"a".to_string()), Some(&counter("a", 1)));
        second.put(counter("b", 2)).unwrap();
        assert_eq!(second.values().count(), 2);
    }

    #[test]
    fn test_invalid_row_reports_position() {
        let temp = TempDir::new().unwrap();
        let store = TableStore::new(temp.path()).unwrap();
        let header: Vec<String> = vec!["Name".into(), "Value".into()];
        let rows = vec![
            vec!["a".to_string(), "1.0".to_string()],
            vec!["b".to_string(), "lots".to_string()],
        ];
        store.save_all("counters", 0, &header, &rows).unwrap();

        let result = TableRepository::<Counter>::load(store);
        assert!(matches!(
            result,
            Err(LedgerError::InvalidRow { row: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let temp = TempDir::new().unwrap();
        let store = TableStore::new(temp.path()).unwrap();
        let header: Vec<String> = vec!["Name".into(), "Value".into()];
        let rows = vec![
            vec!["a".to_string(), "1".to_string()],
            vec!["a".to_string(), "2".to_string()],
        ];
        store.save_all("counters", 0, &header, &rows).unwrap();

        assert!(TableRepository::<Counter>::load(store).is_err());
    }

    #[test]
    fn test_remove_missing_row_does_not_write() {
        let temp = TempDir::new().unwrap();
        let store = TableStore::new(temp.path()).unwrap();
        let mut repo = TableRepository::<Counter>::load(store.clone()).unwrap();
        assert_eq!(repo.remove(&"nope".to_string()).unwrap(), None);
        assert!(!store.exists("counters").unwrap());
    }

    #[test]
    fn test_id_counter_starts_at_one_and_is_monotonic() {
        let mut ids = IdCounter::seeded("counters", std::iter::empty());
        assert_eq!(ids.peek().unwrap(), RecordId::FIRST);

        let seeded = [3, 7, 5].map(|v| RecordId::new(v).unwrap());
        ids = IdCounter::seeded("counters", seeded.into_iter());
        assert_eq!(ids.peek().unwrap().get(), 8);

        ids.advance_past(RecordId::new(8).unwrap());
        assert_eq!(ids.peek().unwrap().get(), 9);
        ids.advance_past(RecordId::new(2).unwrap());
        assert_eq!(ids.peek().unwrap().get(), 9);
    }

    #[test]
    fn test_id_counter_exhausts_instead_of_repeating() {
        let highest = RecordId::new(u32::MAX).unwrap();
        let exhausted = IdCounter::seeded("counters", std::iter::once(highest));
        assert!(matches!(
            exhausted.peek(),
            Err(LedgerError::IdsExhausted("counters"))
        ));

        let mut ids = IdCounter::seeded("counters", std::iter::once(RecordId::new(5).unwrap()));
        assert_eq!(ids.max_with(exhausted).peek().ok(), None);
        assert_eq!(exhausted.max_with(ids).peek().ok(), None);

        ids.advance_past(highest);
        assert!(ids.peek().is_err());
    }

    #[test]
    fn test_record_id_cell_accepts_decimal_encoding() {
        assert_eq!(record_id_cell("3.0").unwrap().get(), 3);
        assert_eq!(record_id_cell("12").unwrap().get(), 12);
        assert!(record_id_cell("0").is_err());
        assert!(record_id_cell("-4").is_err());
    }
}
