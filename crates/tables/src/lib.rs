//! Clinic Table Storage
//!
//! This crate provides the record store that every clinic repository sits on: a
//! schema-agnostic accessor over flat tables of string cells.
//!
//! ## Design Principles
//!
//! - A table is always read and written as a whole; there is no incremental update path
//! - Writes are atomic: the new content is written to a temporary file next to the table and
//!   renamed over it, so a failed write leaves the previous content in place
//! - The header row is stored separately from the data rows and echoed verbatim on rewrite
//! - Every table carries a version counter; a save names the version it was loaded from and
//!   is refused if the file has moved on since (lost-update detection)
//!
//! ## Storage Layout
//!
//! ```text
//! <data_dir>/
//! ├── appointments.yaml
//! ├── medical_records.yaml
//! └── medications.yaml
//! ```
//!
//! Each file is a single YAML document:
//!
//! ```yaml
//! version: 4
//! header: [Name, Current Stock, Low Stock Level, Replenish Amount]
//! rows:
//!   - [Paracetamol, '100', '20', '0']
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use clinic_tables::TableStore;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TableStore::new(Path::new("clinic_data"))?;
//! let table = store.load_all("medications")?;
//! store.save_all("medications", table.version, &table.header, &table.rows)?;
//! # Ok(())
//! # }
//! ```

pub mod cells;
mod constants;
mod store;

pub use constants::TABLE_FILE_EXTENSION;
pub use store::{TableData, TableStore};

/// Errors that can occur during table operations
#[derive(Debug, thiserror::Error)]
pub enum TablesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Table names are plain file stems; anything else could escape the data directory
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// The backing file for a table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A table was created twice
    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    /// The table file does not match the table document schema
    #[error("Table {table} schema mismatch at {path}: {message}")]
    Schema {
        table: String,
        path: String,
        message: String,
    },

    /// A cell could not be interpreted as the caller asked
    #[error("Invalid cell {value:?}: {reason}")]
    InvalidCell { value: String, reason: String },

    /// A row was shorter than the column the caller needed
    #[error("Row is missing column {index}")]
    MissingCell { index: usize },

    /// The file was rewritten by someone else since it was loaded
    #[error("Table {table} changed on disk (loaded version {expected}, found {found})")]
    VersionConflict {
        table: String,
        expected: u64,
        found: u64,
    },

    /// Serialising the table document failed
    #[error("Failed to serialise table: {0}")]
    Serialisation(#[from] serde_yaml::Error),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results that can fail with a [`TablesError`].
pub type TablesResult<T> = Result<T, TablesError>;
