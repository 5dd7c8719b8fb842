//! SQLite storage backend.

use crate::backend::{ColumnInfo, ForeignKeyInfo, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::value::{Row, Value};
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Options applied when a SQLite connection is opened.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
    /// Whether `PRAGMA foreign_keys` is enabled.
    pub foreign_keys: bool,
    /// Whether file databases switch to WAL journaling.
    pub wal_journal: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
            wal_journal: true,
        }
    }
}

/// A SQLite-backed storage backend.
///
/// The connection is guarded by a mutex so the backend can be shared
/// across threads; statements are serialized.
///
/// # Example
///
/// ```rust
/// use docbase_storage::{SqliteBackend, StorageBackend, Value};
///
/// let backend = SqliteBackend::open_in_memory().unwrap();
/// backend.execute_batch("CREATE TABLE t (name TEXT PRIMARY KEY NOT NULL)").unwrap();
/// backend.execute("INSERT INTO t (name) VALUES (?)", &[Value::from("a")]).unwrap();
/// let rows = backend.query("SELECT name FROM t", &[]).unwrap();
/// assert_eq!(rows[0]["name"], Value::from("a"));
/// ```
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Opens (or creates) a database file with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with(path, &SqliteOptions::default())
    }

    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or configured.
    pub fn open_with(path: impl AsRef<Path>, options: &SqliteOptions) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(options.busy_timeout)?;
        if options.wal_journal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        let backend = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        backend.set_foreign_keys(options.foreign_keys)?;
        debug!(path = %path.display(), "opened sqlite database");
        Ok(backend)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_in_memory_with(&SqliteOptions::default())
    }

    /// Opens a private in-memory database with explicit options.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory_with(options: &SqliteOptions) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let backend = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        backend.set_foreign_keys(options.foreign_keys)?;
        Ok(backend)
    }

    /// Returns the database file path, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn query_strings(&self, sql: &str, table: &str, column: usize) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let names = stmt
            .query_map([table], |row| row.get::<_, String>(column))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

impl StorageBackend for SqliteBackend {
    fn execute(&self, sql: &str, params: &[Value]) -> StorageResult<usize> {
        debug!(sql, params = params.len(), "execute");
        let conn = self.conn.lock();
        Ok(conn.execute(sql, params_from_iter(params.iter()))?)
    }

    fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        debug!(sql, "execute batch");
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Row>> {
        debug!(sql, params = params.len(), "query");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                record.insert(column.clone(), row.get::<_, Value>(i)?);
            }
            out.push(record);
        }
        Ok(out)
    }

    fn begin(&self) -> StorageResult<()> {
        self.conn.lock().execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        if conn.is_autocommit() {
            return Err(StorageError::NothingToCommit);
        }
        conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.lock().is_autocommit()
    }

    fn table_exists(&self, table: &str) -> StorageResult<bool> {
        let names = self.query_strings(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            table,
            0,
        )?;
        Ok(!names.is_empty())
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn table_columns(&self, table: &str) -> StorageResult<Vec<ColumnInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
        )?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    column_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                    primary_key: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn foreign_keys(&self, table: &str) -> StorageResult<Vec<ForeignKeyInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)",
        )?;
        let keys = stmt
            .query_map([table], |row| {
                Ok(ForeignKeyInfo {
                    column: row.get(0)?,
                    table: row.get(1)?,
                    to: row.get::<_, Option<String>>(2)?.unwrap_or_else(|| "name".into()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn index_names(&self, table: &str) -> StorageResult<Vec<String>> {
        self.query_strings("SELECT name FROM pragma_index_list(?1)", table, 0)
    }

    fn set_foreign_keys(&self, enabled: bool) -> StorageResult<()> {
        let pragma = if enabled {
            "PRAGMA foreign_keys = ON;"
        } else {
            "PRAGMA foreign_keys = OFF;"
        };
        self.conn.lock().execute_batch(pragma)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend_with_table() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute_batch(
                "CREATE TABLE item (name TEXT PRIMARY KEY NOT NULL, qty INTEGER DEFAULT 0, rate REAL)",
            )
            .unwrap();
        backend
    }

    #[test]
    fn execute_and_query_round_trip() {
        let backend = backend_with_table();
        let affected = backend
            .execute(
                "INSERT INTO item (name, qty, rate) VALUES (?, ?, ?)",
                &[Value::from("a"), Value::Int(2), Value::Float(1.5)],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = backend
            .query("SELECT name, qty, rate FROM item WHERE name = ?", &[Value::from("a")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["name", "qty", "rate"]);
        assert_eq!(rows[0]["qty"], Value::Int(2));
        assert_eq!(rows[0]["rate"], Value::Float(1.5));
    }

    #[test]
    fn list_parameters_are_rejected() {
        let backend = backend_with_table();
        let result = backend.execute(
            "INSERT INTO item (name) VALUES (?)",
            &[Value::List(vec![Value::Int(1)])],
        );
        assert!(matches!(result, Err(StorageError::Sqlite(_))));
    }

    #[test]
    fn commit_without_transaction() {
        let backend = backend_with_table();
        assert!(backend.commit().unwrap_err().is_nothing_to_commit());
        // rollback without a transaction is a no-op
        backend.rollback().unwrap();
    }

    #[test]
    fn rollback_discards_writes() {
        let backend = backend_with_table();
        backend.begin().unwrap();
        assert!(backend.in_transaction());
        backend
            .execute("INSERT INTO item (name) VALUES (?)", &[Value::from("x")])
            .unwrap();
        backend.rollback().unwrap();
        assert!(!backend.in_transaction());
        assert!(backend.query("SELECT name FROM item", &[]).unwrap().is_empty());
    }

    #[test]
    fn catalog_introspection() {
        let backend = backend_with_table();
        backend
            .execute_batch(
                "CREATE TABLE line (name TEXT PRIMARY KEY NOT NULL, item TEXT, \
                 FOREIGN KEY (item) REFERENCES item(name) ON UPDATE CASCADE ON DELETE RESTRICT); \
                 CREATE INDEX idx_line_item ON line (item);",
            )
            .unwrap();

        assert!(backend.table_exists("line").unwrap());
        assert!(!backend.table_exists("missing").unwrap());
        assert_eq!(backend.table_names().unwrap(), vec!["item", "line"]);

        let columns = backend.table_columns("item").unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].column_type, "INTEGER");
        assert_eq!(columns[1].default.as_deref(), Some("0"));

        let keys = backend.foreign_keys("line").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].column, "item");
        assert_eq!(keys[0].table, "item");

        assert!(backend
            .index_names("line")
            .unwrap()
            .contains(&"idx_line_item".to_string()));
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let backend = backend_with_table();
        backend
            .execute_batch(
                "CREATE TABLE line (name TEXT PRIMARY KEY NOT NULL, item TEXT, \
                 FOREIGN KEY (item) REFERENCES item(name))",
            )
            .unwrap();
        let result = backend.execute(
            "INSERT INTO line (name, item) VALUES (?, ?)",
            &[Value::from("l1"), Value::from("ghost")],
        );
        assert!(result.is_err());

        backend.set_foreign_keys(false).unwrap();
        backend
            .execute(
                "INSERT INTO line (name, item) VALUES (?, ?)",
                &[Value::from("l1"), Value::from("ghost")],
            )
            .unwrap();
    }

    #[test]
    fn file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("app.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .execute_batch("CREATE TABLE t (name TEXT PRIMARY KEY NOT NULL)")
                .unwrap();
            backend
                .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("kept")])
                .unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.path(), Some(path.as_path()));
        let rows = backend.query("SELECT name FROM t", &[]).unwrap();
        assert_eq!(rows[0]["name"], Value::from("kept"));
    }
}
