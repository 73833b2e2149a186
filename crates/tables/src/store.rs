//! Whole-table storage service implementation
//!
//! This module provides [`TableStore`], the only code in the workspace that touches table
//! files. Repositories load a table once, mutate an in-memory copy, and hand the complete
//! row set back to [`TableStore::save_all`].
//!
//! # Write Discipline
//!
//! - The new document is written to a temporary file inside the data directory
//! - The temporary file is flushed to disk and then renamed over the table file
//! - Before writing, the on-disk version is compared with the version the caller loaded
//!
//! A failed save therefore never leaves a half-written table behind, and the caller's
//! in-memory copy is the only thing that can be out of date.
//!
//! # Cell Encoding
//!
//! Cells are strings. Tables edited by hand or exported from a spreadsheet may contain
//! plain YAML numbers or booleans where a string was expected; these are read back as their
//! textual form (`3.0` becomes `"3"`), and [`crate::cells`] interprets them from there.

use crate::{TablesError, TablesResult, TABLE_FILE_EXTENSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The complete content of a table as loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableData {
    /// Column names, echoed verbatim on every rewrite
    pub header: Vec<String>,

    /// Data rows in file order, header excluded
    pub rows: Vec<Vec<String>>,

    /// Version counter the rows were read at
    pub version: u64,
}

/// Service for reading and rewriting the tables in one data directory
///
/// # Design
///
/// - Directory-scoped: each instance is bound to one data directory
/// - Stateless: nothing is cached between calls
/// - Contained: table names are plain file stems, so paths stay inside the directory
#[derive(Debug, Clone)]
pub struct TableStore {
    /// Directory containing the table files
    root_directory: PathBuf,
}

impl TableStore {
    /// Creates a new `TableStore` over an existing data directory
    ///
    /// # Errors
    ///
    /// Returns `TablesError::InvalidRootDirectory` if the directory does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root_directory: &Path) -> TablesResult<Self> {
        if !root_directory.exists() {
            return Err(TablesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root_directory.display()
            )));
        }

        if !root_directory.is_dir() {
            return Err(TablesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        let root_directory = root_directory.canonicalize().map_err(|e| {
            TablesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self { root_directory })
    }

    /// Creates the data directory (and parents) if needed, then opens it.
    pub fn create_root(root_directory: &Path) -> TablesResult<Self> {
        fs::create_dir_all(root_directory)?;
        Self::new(root_directory)
    }

    /// Returns the data directory this store is bound to.
    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    /// Returns whether a table file exists.
    pub fn exists(&self, table: &str) -> TablesResult<bool> {
        Ok(self.table_path(table)?.is_file())
    }

    /// Loads every row of a table.
    ///
    /// # Errors
    ///
    /// Returns `TablesError` if:
    /// - the table name is invalid
    /// - the table file does not exist (`TableNotFound`)
    /// - the file cannot be read (I/O)
    /// - the file is not a valid table document (`Schema`)
    pub fn load_all(&self, table: &str) -> TablesResult<TableData> {
        let path = self.table_path(table)?;
        if !path.is_file() {
            return Err(TablesError::TableNotFound(table.to_owned()));
        }

        let text = fs::read_to_string(&path).map_err(|e| {
            TablesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read table {}: {}", path.display(), e),
            ))
        })?;

        let wire = parse_document(table, &text)?;
        Ok(TableData {
            header: wire.header.into_iter().map(CellWire::into_text).collect(),
            rows: wire
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(CellWire::into_text).collect())
                .collect(),
            version: wire.version,
        })
    }

    /// Replaces the entire content of a table.
    ///
    /// `expected_version` is the version the caller loaded (0 for a table that has never been
    /// written). On success the table is stored at `expected_version + 1`, which is returned.
    ///
    /// # Errors
    ///
    /// Returns `TablesError` if:
    /// - the table name is invalid
    /// - the on-disk version differs from `expected_version` (`VersionConflict`)
    /// - serialisation fails
    /// - the temporary file cannot be written or renamed into place (I/O)
    pub fn save_all(
        &self,
        table: &str,
        expected_version: u64,
        header: &[String],
        rows: &[Vec<String>],
    ) -> TablesResult<u64> {
        let path = self.table_path(table)?;

        let found = self.current_version(table, &path)?;
        if found != expected_version {
            return Err(TablesError::VersionConflict {
                table: table.to_owned(),
                expected: expected_version,
                found,
            });
        }

        let version = expected_version + 1;
        let document = TableDocumentOut {
            version,
            header,
            rows,
        };
        let yaml = serde_yaml::to_string(&document)?;

        self.write_atomically(&path, yaml.as_bytes())?;
        Ok(version)
    }

    /// Creates a new, empty table with the given header.
    ///
    /// # Errors
    ///
    /// Returns `TablesError::TableAlreadyExists` if the table file is already present.
    pub fn create(&self, table: &str, header: &[String]) -> TablesResult<TableData> {
        if self.exists(table)? {
            return Err(TablesError::TableAlreadyExists(table.to_owned()));
        }
        let version = self.save_all(table, 0, header, &[])?;
        Ok(TableData {
            header: header.to_vec(),
            rows: Vec::new(),
            version,
        })
    }

    /// Computes the path of a table file, rejecting names that are not plain file stems.
    fn table_path(&self, table: &str) -> TablesResult<PathBuf> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(TablesError::InvalidTableName(table.to_owned()));
        }
        Ok(self
            .root_directory
            .join(format!("{table}.{TABLE_FILE_EXTENSION}")))
    }

    /// Reads only the version counter of the file currently on disk (0 if absent).
    fn current_version(&self, table: &str, path: &Path) -> TablesResult<u64> {
        if !path.exists() {
            return Ok(0);
        }
        let text = fs::read_to_string(path)?;
        Ok(parse_document(table, &text)?.version)
    }

    fn write_atomically(&self, path: &Path, bytes: &[u8]) -> TablesResult<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.root_directory)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| {
            TablesError::Io(std::io::Error::new(
                e.error.kind(),
                format!("Failed to replace table {}: {}", path.display(), e.error),
            ))
        })?;
        Ok(())
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

/// On-disk table document as read.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableDocumentIn {
    version: u64,
    header: Vec<CellWire>,
    #[serde(default)]
    rows: Vec<Vec<CellWire>>,
}

/// On-disk table document as written. Borrowed so a save does not copy the rows.
#[derive(Serialize)]
struct TableDocumentOut<'a> {
    version: u64,
    header: &'a [String],
    rows: &'a [Vec<String>],
}

/// A single cell as it may appear in a hand-edited document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellWire {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null(()),
}

impl CellWire {
    fn into_text(self) -> String {
        match self {
            CellWire::Text(text) => text,
            CellWire::Integer(value) => value.to_string(),
            CellWire::Float(value) => value.to_string(),
            CellWire::Bool(value) => value.to_string(),
            CellWire::Null(()) => String::new(),
        }
    }
}

fn parse_document(table: &str, text: &str) -> TablesResult<TableDocumentIn> {
    let deserializer = serde_yaml::Deserializer::from_str(text);
    serde_path_to_error::deserialize::<_, TableDocumentIn>(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        TablesError::Schema {
            table: table.to_owned(),
            path: if path.is_empty() || path == "." {
                "<root>".to_owned()
            } else {
                path
            },
            message: source.to_string(),
        }
    })
}
