use clinic_tables::TablesError;
use clinic_types::TextError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid text: {0}")]
    Text(#[from] TextError),
    #[error("table storage error: {0}")]
    Tables(#[from] TablesError),
    #[error("invalid row {row} in table {table}: {reason}")]
    InvalidRow {
        table: &'static str,
        row: usize,
        reason: String,
    },
    #[error("{table} entry {key} is inconsistent: {reason}")]
    InconsistentRow {
        table: &'static str,
        key: String,
        reason: String,
    },
    #[error("invalid date-time {0:?}")]
    InvalidDateTime(String),
    #[error("no ids left in table {0}")]
    IdsExhausted(&'static str),
    #[error("{0} lock poisoned by a panicking writer")]
    LockPoisoned(&'static str),
    #[error(
        "operation failed and rollback also failed: operation={operation_error}; rollback={rollback_error}"
    )]
    RollbackFailed {
        #[source]
        operation_error: Box<LedgerError>,
        rollback_error: Box<LedgerError>,
    },
}

impl LedgerError {
    /// Whether the failure came from another writer having changed a table since it was loaded.
    ///
    /// Callers should `reload` the affected service before retrying.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::Tables(TablesError::VersionConflict { .. })
        )
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
