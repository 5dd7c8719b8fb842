//! Storage backend trait definition.

use crate::error::StorageResult;
use crate::value::{Row, Value};

/// Description of one column of an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared column type (`TEXT`, `INTEGER`, `REAL`).
    pub column_type: String,
    /// Whether the column carries a `NOT NULL` constraint.
    pub not_null: bool,
    /// Literal default as written in the DDL, if any.
    pub default: Option<String>,
    /// Whether the column is (part of) the primary key.
    pub primary_key: bool,
}

/// Description of one foreign key of an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub to: String,
}

/// A relational storage backend for docbase.
///
/// Backends execute SQL text with bound parameters and answer catalog
/// questions. They know nothing about metadata, documents or naming;
/// the persistence layer in `docbase_core` owns all statement generation.
///
/// # Invariants
///
/// - Parameters are always bound, never interpolated
/// - `commit` with no open transaction returns
///   [`StorageError::NothingToCommit`](crate::StorageError::NothingToCommit)
/// - `rollback` with no open transaction is a no-op
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::SqliteBackend`] - file-backed or in-memory SQLite
pub trait StorageBackend: Send + Sync {
    /// Executes a single statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails or a parameter cannot be bound.
    fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<usize>;

    /// Executes several `;`-separated statements without parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    fn execute_batch(&self, sql: &str) -> StorageResult<()>;

    /// Runs a query and returns every row in column order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a parameter cannot be bound.
    fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Row>>;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open.
    fn begin(&self) -> StorageResult<()>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `NothingToCommit` when no transaction is open.
    fn commit(&self) -> StorageResult<()>;

    /// Rolls back the open transaction, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback statement fails.
    fn rollback(&self) -> StorageResult<()>;

    /// Returns true while a transaction is open.
    fn in_transaction(&self) -> bool;

    /// Returns true if a table with this exact name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn table_exists(&self, table: &str) -> StorageResult<bool>;

    /// Lists all user tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn table_names(&self) -> StorageResult<Vec<String>>;

    /// Lists the columns of a table in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn table_columns(&self, table: &str) -> StorageResult<Vec<ColumnInfo>>;

    /// Lists the foreign keys declared on a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn foreign_keys(&self, table: &str) -> StorageResult<Vec<ForeignKeyInfo>>;

    /// Lists the index names declared on a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn index_names(&self, table: &str) -> StorageResult<Vec<String>>;

    /// Turns referential integrity enforcement on or off.
    ///
    /// Has no effect inside an open transaction on SQLite.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting cannot be changed.
    fn set_foreign_keys(&self, enabled: bool) -> StorageResult<()>;

    /// Whether `ALTER TABLE .. DROP COLUMN` is available.
    fn supports_drop_column(&self) -> bool {
        false
    }
}
