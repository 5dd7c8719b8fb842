//! Persistence layer.
//!
//! [`Database`] turns metadata into SQL: it creates and migrates tables,
//! reads and writes records (children included), translates structured
//! [`Filters`] into bound `WHERE` clauses and announces every write on its
//! [`Observable`] and [`ChangeFeed`].
//!
//! # Table layout
//!
//! - one table per non-single base doctype, named after it, `name` as the
//!   primary key
//! - doctypes `based_on` another share the base table; their fixed
//!   `filters` are applied to every query and write
//! - child rows live in the child doctype's table and point back through
//!   `parent`, `parenttype`, `parentfield` and `idx`
//! - single doctypes store one `SingleValue` row per field
//!
//! ```rust
//! use docbase_core::Config;
//! use docbase_core::database::{Database, Query};
//! use docbase_core::meta::{FieldDefinition, FieldType, MetaDefinition, MetaRegistry, RegistrySettings};
//! use docbase_core::Record;
//! use std::sync::Arc;
//!
//! let registry = MetaRegistry::with_builtins(RegistrySettings::default());
//! registry
//!     .register(MetaDefinition::new("Note").field(FieldDefinition::new("body", FieldType::Text)))
//!     .unwrap();
//! let db = Database::open(&Config::default(), Arc::new(registry)).unwrap();
//! db.migrate().unwrap();
//!
//! let mut record = Record::default();
//! record.values.insert("name".into(), "n1".into());
//! record.values.insert("body".into(), "hello".into());
//! db.insert("Note", &record).unwrap();
//!
//! assert_eq!(db.get_all("Note", &Query::new().fields(["body"])).unwrap().len(), 1);
//! ```

mod filter;
mod migrate;
mod query;
mod read;
mod record;
mod schema;
mod write;

pub use filter::{Condition, FilterValue, Filters, Op};
pub use migrate::{MigrationReport, MigrationStep};
pub use query::{Order, Query};
pub use record::{row_to_json, Record};
pub use schema::SINGLE_VALUE;

use crate::change_feed::{ChangeEvent, ChangeFeed, ChangeType};
use crate::config::Config;
use crate::error::CoreResult;
use crate::meta::{Meta, MetaRegistry};
use crate::observable::{Event, Observable};
use docbase_storage::{SqliteBackend, SqliteOptions, StorageBackend};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Metadata-driven access to one SQLite database.
pub struct Database {
    backend: Box<dyn StorageBackend>,
    registry: Arc<MetaRegistry>,
    events: Observable,
    changes: ChangeFeed,
    /// Changes of the open transaction, published on commit.
    pending: Mutex<Vec<ChangeEvent>>,
    foreign_keys: bool,
}

impl Database {
    /// Wraps an opened backend.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>, registry: Arc<MetaRegistry>, config: &Config) -> Self {
        Self {
            backend,
            registry,
            events: Observable::new(),
            changes: ChangeFeed::with_capacity(config.change_history),
            pending: Mutex::new(Vec::new()),
            foreign_keys: config.foreign_keys,
        }
    }

    /// Opens the SQLite database named by `config` (in memory when it has
    /// no path).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the database cannot be opened.
    pub fn open(config: &Config, registry: Arc<MetaRegistry>) -> CoreResult<Self> {
        let options = SqliteOptions {
            busy_timeout: config.busy_timeout,
            foreign_keys: config.foreign_keys,
            ..SqliteOptions::default()
        };
        let backend = match &config.database_path {
            Some(path) => SqliteBackend::open_with(path, &options)?,
            None => SqliteBackend::open_in_memory_with(&options)?,
        };
        Ok(Self::new(Box::new(backend), registry, config))
    }

    /// The storage backend.
    #[must_use]
    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// The metadata registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetaRegistry> {
        &self.registry
    }

    /// Write notifications: `change:<doctype>` and `change`.
    #[must_use]
    pub fn events(&self) -> &Observable {
        &self.events
    }

    /// Sequenced feed of committed writes.
    #[must_use]
    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if one is already open.
    pub fn begin(&self) -> CoreResult<()> {
        self.backend.begin()?;
        Ok(())
    }

    /// Commits the open transaction and publishes its changes.
    ///
    /// Committing with nothing pending is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub fn commit(&self) -> CoreResult<()> {
        match self.backend.commit() {
            Ok(()) => {}
            Err(err) if err.is_nothing_to_commit() => {
                warn!("commit without an open transaction");
            }
            Err(err) => return Err(err.into()),
        }
        self.publish_changes();
        Ok(())
    }

    /// Rolls back the open transaction and drops its changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub fn rollback(&self) -> CoreResult<()> {
        self.pending.lock().clear();
        self.backend.rollback()?;
        Ok(())
    }

    /// Runs `f` in a transaction.
    ///
    /// When a transaction is already open `f` joins it and the outermost
    /// caller decides. Otherwise the transaction is committed when `f`
    /// returns `Ok` and rolled back when it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of the commit.
    pub fn transaction<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> CoreResult<T>,
    {
        if self.backend.in_transaction() {
            return f();
        }
        self.begin()?;
        match f() {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Announces a write: `change:<doctype>` then `change`, repeated for
    /// the doctype it is based on, and queues the feed event.
    pub(crate) fn trigger_change(
        &self,
        meta: &Meta,
        name: &str,
        change_type: ChangeType,
        old_name: Option<&str>,
    ) -> CoreResult<()> {
        let event = match old_name {
            Some(old) => ChangeEvent::renamed(meta.name(), old, name),
            None => ChangeEvent::new(meta.name(), name, change_type),
        };
        self.pending.lock().push(event);

        let mut doctype = Some(meta.name().to_string());
        while let Some(current) = doctype {
            let payload = Event::new("change").record(current.as_str(), Some(name.to_string()));
            self.events
                .trigger(&format!("change:{current}"), &payload.renamed(format!("change:{current}")))?;
            self.events.trigger("change", &payload)?;
            doctype = self.registry.get_meta(&current)?.based_on().map(str::to_string);
        }
        if !self.backend.in_transaction() {
            self.publish_changes();
        }
        Ok(())
    }

    fn publish_changes(&self) {
        let pending: Vec<ChangeEvent> = std::mem::take(&mut *self.pending.lock());
        for event in pending {
            let (doctype, name) = (event.doctype.clone(), event.name.clone());
            let sequence = self.changes.publish(event);
            debug!(sequence, %doctype, %name, "change");
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("in_transaction", &self.backend.in_transaction())
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::meta::{FieldDefinition, FieldType, MetaDefinition, RegistrySettings};
    use docbase_storage::{Row, Value};

    /// A migrated in-memory database with a small sales schema.
    pub(crate) fn database() -> Database {
        let registry = MetaRegistry::with_builtins(RegistrySettings::default());
        registry
            .register(
                MetaDefinition::new("Party")
                    .field(FieldDefinition::new("party_name", FieldType::Data).required())
                    .field(FieldDefinition::new("is_supplier", FieldType::Check).default_value(0)),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Supplier")
                    .based_on("Party")
                    .filter("is_supplier", 1),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("OrderItem")
                    .child()
                    .field(FieldDefinition::new("item", FieldType::Data).required())
                    .field(FieldDefinition::new("qty", FieldType::Float)),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("SalesOrder")
                    .keyword_fields(["party"])
                    .field(FieldDefinition::new("party", FieldType::Link).target("Party"))
                    .field(FieldDefinition::new("status", FieldType::Data))
                    .field(FieldDefinition::new("items", FieldType::Table).childtype("OrderItem")),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("ShopSettings")
                    .single()
                    .field(FieldDefinition::new("shop_name", FieldType::Data))
                    .field(FieldDefinition::new("tax_rate", FieldType::Float))
                    .field(FieldDefinition::new("open_days", FieldType::Int)),
            )
            .unwrap();
        let db = Database::open(&Config::default(), Arc::new(registry)).unwrap();
        db.migrate().unwrap();
        db
    }

    pub(crate) fn record(pairs: &[(&str, Value)]) -> Record {
        Record::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect::<Row>(),
        )
    }

    #[test]
    fn transaction_commits_and_rolls_back() {
        let db = database();
        db.transaction(|| {
            db.insert("Party", &record(&[("name", "p1".into()), ("party_name", "One".into())]))?;
            Ok(())
        })
        .unwrap();
        assert!(db.exists("Party", "p1").unwrap());

        let result: CoreResult<()> = db.transaction(|| {
            db.insert("Party", &record(&[("name", "p2".into()), ("party_name", "Two".into())]))?;
            Err(CoreError::validation("abort"))
        });
        assert!(result.is_err());
        assert!(!db.exists("Party", "p2").unwrap());
        assert!(!db.backend().in_transaction());
    }

    #[test]
    fn nested_transactions_join_the_outer_one() {
        let db = database();
        let result: CoreResult<()> = db.transaction(|| {
            db.transaction(|| {
                db.insert("Party", &record(&[("name", "p1".into()), ("party_name", "One".into())]))
                    .map(|_| ())
            })?;
            assert!(db.backend().in_transaction());
            Err(CoreError::validation("outer fails"))
        });
        assert!(result.is_err());
        assert!(!db.exists("Party", "p1").unwrap());
    }

    #[test]
    fn commit_without_transaction_is_ignored() {
        let db = database();
        db.commit().unwrap();
        db.rollback().unwrap();
    }

    #[test]
    fn change_feed_only_sees_committed_writes() {
        let db = database();
        let receiver = db.changes().subscribe();
        let _: CoreResult<()> = db.transaction(|| {
            db.insert("Party", &record(&[("name", "gone".into()), ("party_name", "G".into())]))?;
            Err(CoreError::validation("abort"))
        });
        assert!(db.changes().is_empty());

        db.insert("Party", &record(&[("name", "kept".into()), ("party_name", "K".into())]))
            .unwrap();
        let event = receiver.try_recv().unwrap();
        assert_eq!(event.name, "kept");
        assert_eq!(event.change_type, ChangeType::Insert);
        assert_eq!(event.sequence, 1);
    }

    #[test]
    fn change_events_bubble_to_the_base_doctype() {
        use std::sync::Mutex as StdMutex;

        let db = database();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        for name in ["change:Supplier", "change:Party", "change"] {
            let seen = Arc::clone(&seen);
            db.events().on(name, move |event: &Event| {
                seen.lock().unwrap().push(format!(
                    "{}:{}",
                    event.name,
                    event.doctype.clone().unwrap_or_default()
                ));
                Ok(())
            });
        }
        db.insert("Supplier", &record(&[("name", "s1".into()), ("party_name", "S".into())]))
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "change:Supplier:Supplier",
                "change:Supplier",
                "change:Party:Party",
                "change:Party",
            ]
        );
    }
}
