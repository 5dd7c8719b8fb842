//! # docbase Storage
//!
//! Storage backend trait and the SQLite implementation for docbase.
//!
//! This crate provides the lowest-level storage abstraction for docbase.
//! Backends execute SQL with bound parameters, manage transactions and
//! answer catalog questions. They do **not** interpret metadata: table
//! layout, filters and migrations are generated by `docbase_core`.
//!
//! ## Design Principles
//!
//! - Every value reaches the database as a bound parameter
//! - `commit` with nothing pending is reported, not hidden, so callers can
//!   choose to treat it as idempotent
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`SqliteBackend`] - file-backed or in-memory SQLite via `rusqlite`
//!
//! ## Example
//!
//! ```rust
//! use docbase_storage::{SqliteBackend, StorageBackend, Value};
//!
//! let backend = SqliteBackend::open_in_memory().unwrap();
//! backend.execute_batch("CREATE TABLE note (name TEXT PRIMARY KEY NOT NULL, body TEXT)").unwrap();
//! backend
//!     .execute("INSERT INTO note (name, body) VALUES (?, ?)", &[Value::from("n1"), Value::from("hi")])
//!     .unwrap();
//! assert!(backend.table_exists("note").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod sqlite;
mod value;

pub use backend::{ColumnInfo, ForeignKeyInfo, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use sqlite::{SqliteBackend, SqliteOptions};
pub use value::{Row, Value};
