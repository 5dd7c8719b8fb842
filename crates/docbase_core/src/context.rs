//! The application context.
//!
//! [`App`] owns the configuration, the metadata registry, the database and
//! an in-memory cache of documents. It is passed explicitly to every
//! lifecycle operation:
//!
//! ```rust,ignore
//! use docbase_core::{App, Config, FieldDefinition, FieldType, MetaDefinition};
//! use serde_json::json;
//!
//! let app = App::builder(Config::new().database_path("shop.db"))
//!     .definition(
//!         MetaDefinition::new("ToDo")
//!             .field(FieldDefinition::new("subject", FieldType::Data).required()),
//!     )
//!     .open()?;
//!
//! let todo = app.insert_doc("ToDo", &json!({"subject": "Buy milk"}))?;
//! let cached = app.get_doc("ToDo", todo.name())?;
//! assert_eq!(cached.lock().get_str("subject"), "Buy milk");
//! ```

use crate::config::Config;
use crate::database::{Database, MigrationReport, Query, Record};
use crate::document::{Controller, Document, Hook};
use crate::error::CoreResult;
use crate::meta::{
    standard, ColumnType, FieldType, Meta, MetaDefinition, MetaRegistry, RegistrySettings, DOCFIELD,
    DOCTYPE, FIELDTYPE,
};
use crate::observable::Observable;
use crate::patches::{Patch, PatchRunner};
use crate::util::random_name;
use docbase_storage::Value;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A cached document shared between callers.
pub type SharedDoc = Arc<Mutex<Document>>;

/// Builder for [`App`].
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    registry: MetaRegistry,
    definitions: Vec<MetaDefinition>,
    patches: PatchRunner,
}

impl AppBuilder {
    /// Adds an entity definition.
    #[must_use]
    pub fn definition(mut self, definition: MetaDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Adds several entity definitions.
    #[must_use]
    pub fn definitions(mut self, definitions: impl IntoIterator<Item = MetaDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    /// Registers a formula for `doctype.fieldname`.
    #[must_use]
    pub fn formula<F>(self, doctype: &str, fieldname: &str, formula: F) -> Self
    where
        F: Fn(&Document, Option<&Document>) -> Value + Send + Sync + 'static,
    {
        self.registry.register_formula(doctype, fieldname, formula);
        self
    }

    /// Registers a computed default for `doctype.fieldname`.
    #[must_use]
    pub fn default<F>(self, doctype: &str, fieldname: &str, default: F) -> Self
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        self.registry.register_default(doctype, fieldname, default);
        self
    }

    /// Registers a named field validator.
    #[must_use]
    pub fn validator<F>(self, name: &str, validator: F) -> Self
    where
        F: Fn(&Value, &Document) -> Result<(), String> + Send + Sync + 'static,
    {
        self.registry.register_validator(name, validator);
        self
    }

    /// Registers the lifecycle controller of a doctype.
    #[must_use]
    pub fn controller<C>(self, doctype: &str, controller: C) -> Self
    where
        C: Controller + 'static,
    {
        self.registry.register_controller(doctype, controller);
        self
    }

    /// Registers a custom field type.
    #[must_use]
    pub fn fieldtype(self, fieldtype: FieldType, column: ColumnType) -> Self {
        self.registry.register_fieldtype(fieldtype, column);
        self
    }

    /// Adds a patch, run once when the app opens.
    #[must_use]
    pub fn patch<F>(mut self, name: &str, run: F) -> Self
    where
        F: Fn(&App) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.patches.register(Patch::new(name, run));
        self
    }

    /// Opens the database and brings it in line with the registry.
    ///
    /// Definitions are registered and resolved, tables migrated, the
    /// `FieldType` catalog seeded, stored `DocType` records loaded (and
    /// migrated when there are new ones), then pending patches run.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` for a broken definition, or the first
    /// storage or migration failure.
    pub fn open(self) -> CoreResult<App> {
        let Self {
            config,
            registry,
            definitions,
            patches,
        } = self;
        for definition in definitions {
            registry.register(definition)?;
        }
        let registry = Arc::new(registry);
        let doctypes = registry.validate_all()?;
        let database = Database::open(&config, Arc::clone(&registry))?;
        database.migrate()?;

        let app = App {
            config,
            registry,
            database,
            docs: RwLock::new(IndexMap::new()),
            docs_bus: Arc::new(Observable::new()),
            patches,
            meta_reloads: Mutex::new(Vec::new()),
        };
        app.seed_fieldtypes()?;
        let loaded = app.registry.load_stored(&stored_doctypes(&app.database)?)?;
        if !loaded.is_empty() {
            app.database.migrate()?;
        }
        let report = app.patches.run_pending(&app)?;
        info!(
            doctypes = doctypes + loaded.len(),
            patches = report.applied_count(),
            "app opened"
        );
        Ok(app)
    }
}

impl AppBuilder {
    /// Lists the schema changes [`AppBuilder::open`] would apply, without
    /// applying them. Entities saved as `DocType` records are included once
    /// the bootstrap tables exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` for a broken definition, or the first
    /// storage failure.
    pub fn plan_migration(self) -> CoreResult<MigrationReport> {
        let Self {
            config,
            registry,
            definitions,
            ..
        } = self;
        for definition in definitions {
            registry.register(definition)?;
        }
        let registry = Arc::new(registry);
        registry.validate_all()?;
        let database = Database::open(&config, Arc::clone(&registry))?;
        if database.backend().table_exists(DOCTYPE)?
            && database.backend().table_exists(DOCFIELD)?
        {
            registry.load_stored(&stored_doctypes(&database)?)?;
        }
        database.plan_migration()
    }
}

/// Registry, database and document cache of one application.
pub struct App {
    config: Config,
    registry: Arc<MetaRegistry>,
    database: Database,
    docs: RwLock<IndexMap<String, IndexMap<String, SharedDoc>>>,
    docs_bus: Arc<Observable>,
    patches: PatchRunner,
    meta_reloads: Mutex<Vec<String>>,
}

impl App {
    /// Starts building an app. The registry starts with the built-in
    /// entities.
    #[must_use]
    pub fn builder(config: Config) -> AppBuilder {
        let registry = MetaRegistry::with_builtins(RegistrySettings {
            is_server: config.is_server,
            float_precision: config.float_precision,
        });
        registry.register_controller(DOCTYPE, reload_saved_doctype);
        AppBuilder {
            config,
            registry,
            definitions: Vec::new(),
            patches: PatchRunner::new(),
        }
    }

    /// Configuration the app was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metadata registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetaRegistry> {
        &self.registry
    }

    /// Persistence layer.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Registered patches.
    #[must_use]
    pub fn patches(&self) -> &PatchRunner {
        &self.patches
    }

    /// Receives the `change` events of every cached document.
    #[must_use]
    pub fn docs_bus(&self) -> &Arc<Observable> {
        &self.docs_bus
    }

    /// Resolved meta of a doctype.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown doctype.
    pub fn get_meta(&self, doctype: &str) -> CoreResult<Arc<Meta>> {
        self.registry.get_meta(doctype)
    }

    /// Re-reads a doctype definition and migrates its table.
    ///
    /// A stored `DocType` record replaces the registered definition.
    /// Cached documents of the doctype are dropped.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` for a broken definition, or a migration
    /// failure; `CoreError::TransactionOpen` when a table must be rebuilt
    /// while a transaction is open.
    pub fn reload_meta(&self, doctype: &str) -> CoreResult<()> {
        if self.database.exists(DOCTYPE, doctype)? {
            let record = self.database.get(DOCTYPE, doctype)?;
            self.registry.register(MetaDefinition::from_record(&record)?)?;
        } else {
            self.registry.reload(doctype);
        }
        self.registry.get_meta(doctype)?;
        let report = self.database.migrate()?;
        self.docs.write().shift_remove(doctype);
        info!(doctype, %report, "meta reloaded");
        Ok(())
    }

    /// Runs `f` in a database transaction, then reloads the doctypes whose
    /// definitions were saved in it.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, of the commit, or of a reload.
    pub fn transaction<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce() -> CoreResult<T>,
    {
        let result = self.database.transaction(f);
        self.settle_meta_reloads(result.is_ok())?;
        result
    }

    /// Remembers a doctype whose saved definition must be reloaded once the
    /// running transaction has committed.
    pub(crate) fn queue_meta_reload(&self, doctype: &str) {
        let mut queued = self.meta_reloads.lock();
        if !queued.iter().any(|queued| queued == doctype) {
            queued.push(doctype.to_string());
        }
    }

    /// Runs the queued meta reloads after a commit, or drops them after a
    /// rollback. Inside a caller's transaction they stay queued.
    pub(crate) fn settle_meta_reloads(&self, committed: bool) -> CoreResult<()> {
        if self.database.backend().in_transaction() {
            return Ok(());
        }
        let queued = std::mem::take(&mut *self.meta_reloads.lock());
        if committed {
            for doctype in &queued {
                self.reload_meta(doctype)?;
            }
        }
        Ok(())
    }

    /// A document from the cache, loaded and cached on a miss.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no such record exists.
    pub fn get_doc(&self, doctype: &str, name: &str) -> CoreResult<SharedDoc> {
        if let Some(doc) = self.cached(doctype, name) {
            return Ok(doc);
        }
        let doc = Document::load(self, doctype, name)?;
        Ok(self.add_to_cache(doc))
    }

    /// The document of a single doctype.
    ///
    /// # Errors
    ///
    /// As [`App::get_doc`].
    pub fn get_single(&self, doctype: &str) -> CoreResult<SharedDoc> {
        self.get_doc(doctype, doctype)
    }

    /// A new, uncached document.
    ///
    /// # Errors
    ///
    /// As [`Document::new`].
    pub fn new_doc(&self, doctype: &str, data: &JsonValue) -> CoreResult<Document> {
        Document::new(&self.registry, doctype, data)
    }

    /// A new empty document with a provisional random name, cached so that
    /// it can be shared before it is inserted.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown doctype.
    pub fn get_new_doc(&self, doctype: &str) -> CoreResult<SharedDoc> {
        let mut doc = self.new_doc(doctype, &JsonValue::Null)?;
        if doc.name().is_empty() {
            doc.set_raw(standard::NAME, Value::from(random_name()));
            doc.sync_child_links();
        }
        Ok(self.add_to_cache(doc))
    }

    /// Builds and inserts a document.
    ///
    /// # Errors
    ///
    /// As [`Document::new`] and [`Document::insert`].
    pub fn insert_doc(&self, doctype: &str, data: &JsonValue) -> CoreResult<Document> {
        let mut doc = self.new_doc(doctype, data)?;
        doc.insert(self)?;
        Ok(doc)
    }

    /// Writes `data` as a record: updates it when a record with its name
    /// exists, inserts it otherwise.
    ///
    /// # Errors
    ///
    /// As [`Document::update`] and [`Document::insert`].
    pub fn sync_doc(&self, doctype: &str, data: &JsonValue) -> CoreResult<Document> {
        let meta = self.registry.get_meta(doctype)?;
        let name = if meta.is_single() {
            doctype.to_string()
        } else {
            data.get(standard::NAME)
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        if !name.is_empty() && self.database.exists(doctype, &name)? {
            let mut doc = Document::load(self, doctype, &name)?;
            let mut changes = data.clone();
            if let Some(object) = changes.as_object_mut() {
                object.remove(standard::NAME);
            }
            doc.update_values(&changes)?;
            doc.update(self)?;
            self.replace_cached(&doc);
            Ok(doc)
        } else {
            self.insert_doc(doctype, data)
        }
    }

    /// Deletes a stored document.
    ///
    /// # Errors
    ///
    /// As [`Document::delete`].
    pub fn delete_doc(&self, doctype: &str, name: &str) -> CoreResult<()> {
        let mut doc = Document::load(self, doctype, name)?;
        doc.delete(self)
    }

    /// Renames a stored document.
    ///
    /// # Errors
    ///
    /// As [`Document::rename`].
    pub fn rename_doc(&self, doctype: &str, old_name: &str, new_name: &str) -> CoreResult<Document> {
        let mut doc = Document::load(self, doctype, old_name)?;
        doc.rename(self, new_name)?;
        self.replace_cached(&doc);
        Ok(doc)
    }

    /// A new document with the values of `doc`.
    ///
    /// Name, submission state and audit fields are not copied; child rows
    /// get new names.
    ///
    /// # Errors
    ///
    /// As [`Document::new`].
    pub fn get_duplicate(&self, doc: &Document) -> CoreResult<Document> {
        let mut data = doc.to_json();
        if let Some(object) = data.as_object_mut() {
            strip_identity(object);
            for value in object.values_mut() {
                match value {
                    JsonValue::Array(rows) => {
                        for row in rows.iter_mut().filter_map(JsonValue::as_object_mut) {
                            strip_identity(row);
                        }
                    }
                    JsonValue::Object(row) if row.contains_key("parentfield") => {
                        strip_identity(row);
                    }
                    _ => {}
                }
            }
        }
        self.new_doc(doc.doctype(), &data)
    }

    /// Whether a cached document has unsaved changes.
    #[must_use]
    pub fn is_dirty(&self, doctype: &str, name: &str) -> bool {
        self.cached(doctype, name)
            .is_some_and(|doc| doc.lock().is_dirty())
    }

    /// Caches a document and forwards its `change` events to
    /// [`App::docs_bus`]. An entry with the same name is replaced.
    pub fn add_to_cache(&self, doc: Document) -> SharedDoc {
        let bus = Arc::clone(&self.docs_bus);
        doc.events()
            .on("change", move |event| bus.trigger("change", event));
        let doctype = doc.doctype().to_string();
        let name = doc.name().to_string();
        let shared = Arc::new(Mutex::new(doc));
        self.docs
            .write()
            .entry(doctype.clone())
            .or_default()
            .insert(name.clone(), Arc::clone(&shared));
        debug!(%doctype, %name, "cached document");
        shared
    }

    /// Drops a document from the cache.
    pub fn remove_from_cache(&self, doctype: &str, name: &str) {
        if let Some(docs) = self.docs.write().get_mut(doctype) {
            docs.shift_remove(name);
        }
    }

    /// Names of the cached documents of a doctype.
    #[must_use]
    pub fn cached_docs(&self, doctype: &str) -> Vec<String> {
        self.docs
            .read()
            .get(doctype)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Moves a cache entry to a new name.
    pub(crate) fn rename_cached(&self, doctype: &str, old_name: &str, new_name: &str) {
        let mut docs = self.docs.write();
        if let Some(entries) = docs.get_mut(doctype) {
            if let Some(doc) = entries.shift_remove(old_name) {
                entries.insert(new_name.to_string(), doc);
            }
        }
    }

    /// Refreshes a cached copy after it was written through another handle.
    fn replace_cached(&self, doc: &Document) {
        if let Some(cached) = self.cached(doc.doctype(), doc.name()) {
            let record = doc.get_valid_dict(true);
            let mut cached = cached.lock();
            if cached.sync_values(&record, self).is_err() {
                drop(cached);
                self.remove_from_cache(doc.doctype(), doc.name());
            }
        }
    }

    fn cached(&self, doctype: &str, name: &str) -> Option<SharedDoc> {
        self.docs
            .read()
            .get(doctype)
            .and_then(|docs| docs.get(name))
            .cloned()
    }

    fn seed_fieldtypes(&self) -> CoreResult<()> {
        self.database.transaction(|| {
            for (fieldtype, column) in self.registry.fieldtypes() {
                if self.database.exists(FIELDTYPE, fieldtype.as_str())? {
                    continue;
                }
                let column = column.map(|c| c.to_string());
                self.insert_doc(
                    FIELDTYPE,
                    &json!({ "name": fieldtype.as_str(), "column_type": column }),
                )?;
            }
            Ok(())
        })
    }
}

fn stored_doctypes(database: &Database) -> CoreResult<Vec<Record>> {
    database
        .get_all(DOCTYPE, &Query::new().fields([standard::NAME]))?
        .iter()
        .filter_map(|row| row.get(standard::NAME).and_then(Value::as_str))
        .map(|name| database.get(DOCTYPE, name))
        .collect()
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("doctypes", &self.registry.doctypes().len())
            .field("cached", &self.docs.read().values().map(IndexMap::len).sum::<usize>())
            .finish()
    }
}

/// Saving a `DocType` record reloads and migrates the doctype it describes
/// once the save has committed.
fn reload_saved_doctype(hook: Hook, doc: &mut Document, app: &App) -> CoreResult<()> {
    if hook == Hook::AfterSave {
        app.queue_meta_reload(doc.name());
    }
    Ok(())
}

fn strip_identity(object: &mut serde_json::Map<String, JsonValue>) {
    for fieldname in [
        standard::NAME,
        standard::SUBMITTED,
        "owner",
        "creation",
        "modified",
        "modified_by",
        "parent",
    ] {
        object.remove(fieldname);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::meta::{FieldDefinition, Naming};

    pub(crate) fn builder() -> AppBuilder {
        App::builder(Config::new())
            .definition(
                MetaDefinition::new("Customer")
                    .field(
                        FieldDefinition::new("customer_name", FieldType::Data)
                            .required()
                            .label("Customer Name"),
                    )
                    .keyword_fields(["customer_name"]),
            )
            .definition(
                MetaDefinition::new("InvoiceItem")
                    .child()
                    .field(FieldDefinition::new("item", FieldType::Data).required().label("Item"))
                    .field(FieldDefinition::new("qty", FieldType::Float).default_value(1))
                    .field(FieldDefinition::new("rate", FieldType::Currency))
                    .field(FieldDefinition::new("amount", FieldType::Currency).read_only()),
            )
            .definition(
                MetaDefinition::new("Invoice")
                    .submittable()
                    .naming(Naming::Series("INV-".to_string()))
                    .field(
                        FieldDefinition::new("customer", FieldType::Data)
                            .required()
                            .label("Customer"),
                    )
                    .field(
                        FieldDefinition::new("status", FieldType::Select)
                            .options("Draft\nPaid")
                            .default_value("Draft"),
                    )
                    .field(
                        FieldDefinition::new("items", FieldType::Table)
                            .childtype("InvoiceItem")
                            .label("Items"),
                    )
                    .field(FieldDefinition::new("total", FieldType::Currency).read_only())
                    .keyword_fields(["customer", "status"]),
            )
            .definition(
                MetaDefinition::new("Ticket")
                    .naming(Naming::Autoincrement)
                    .field(FieldDefinition::new("title", FieldType::Data)),
            )
            .definition(
                MetaDefinition::new("ShopSettings")
                    .single()
                    .field(FieldDefinition::new("shop_name", FieldType::Data))
                    .field(FieldDefinition::new("open_days", FieldType::Int).default_value(5)),
            )
            .formula("InvoiceItem", "amount", |row, _| {
                Value::from(row.get_float("qty").unwrap_or(0.0) * row.get_float("rate").unwrap_or(0.0))
            })
            .formula("Invoice", "total", |doc, _| {
                Value::from(
                    doc.table("items")
                        .iter()
                        .filter_map(|row| row.get_float("amount"))
                        .sum::<f64>(),
                )
            })
    }

    pub(crate) fn app() -> App {
        builder().open().unwrap()
    }

    #[test]
    fn open_migrates_and_seeds_field_types() {
        let app = app();
        let backend = app.database().backend();
        for table in ["Customer", "Invoice", "InvoiceItem", "Ticket", "SingleValue", "DocType"] {
            assert!(backend.table_exists(table).unwrap(), "{table}");
        }
        assert!(!backend.table_exists("ShopSettings").unwrap());
        assert!(app.database().exists(FIELDTYPE, "Currency").unwrap());
        assert_eq!(
            app.database().get_value(FIELDTYPE, "Int", "column_type").unwrap(),
            Value::from("INTEGER")
        );
    }

    #[test]
    fn plan_migration_applies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.db");
        let with_path = || {
            let mut builder = builder();
            builder.config.database_path = Some(path.clone());
            builder
        };

        let plan = with_path().plan_migration().unwrap();
        assert!(!plan.is_up_to_date());
        assert!(plan.tables_created() >= 5);
        assert!(with_path().plan_migration().unwrap().tables_created() >= 5);

        drop(with_path().open().unwrap());
        assert!(with_path().plan_migration().unwrap().is_up_to_date());
    }

    #[test]
    fn broken_definitions_fail_to_open() {
        let err = builder()
            .definition(MetaDefinition::new("Broken").based_on("Nowhere"))
            .open()
            .unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
    }

    #[test]
    fn get_doc_is_cache_first() {
        let app = app();
        let doc = app
            .insert_doc("Customer", &json!({"name": "ACME", "customer_name": "Acme"}))
            .unwrap();
        let first = app.get_doc("Customer", doc.name()).unwrap();
        let second = app.get_doc("Customer", "ACME").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(app.cached_docs("Customer"), ["ACME"]);

        first.lock().set("customer_name", "Acme Ltd").unwrap();
        assert!(app.is_dirty("Customer", "ACME"));
        app.remove_from_cache("Customer", "ACME");
        assert!(app.cached_docs("Customer").is_empty());
        assert!(!app.is_dirty("Customer", "ACME"));
    }

    #[test]
    fn new_docs_are_rekeyed_on_insert() {
        let app = app();
        let shared = app.get_new_doc("Invoice").unwrap();
        let provisional = shared.lock().name().to_string();
        assert_eq!(provisional.len(), 10);
        assert_eq!(app.cached_docs("Invoice"), [provisional.clone()]);

        {
            let mut doc = shared.lock();
            doc.set("customer", "ACME").unwrap();
            doc.insert(&app).unwrap();
        }
        assert_eq!(app.cached_docs("Invoice"), ["INV-1001"]);
        assert!(Arc::ptr_eq(&shared, &app.get_doc("Invoice", "INV-1001").unwrap()));
    }

    #[test]
    fn cached_changes_reach_the_bus() {
        let app = app();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        app.docs_bus().on("change", move |event| {
            sink.lock().push(event.fieldname.clone().unwrap_or_default());
            Ok(())
        });
        let shared = app.get_new_doc("Customer").unwrap();
        shared.lock().set("customer_name", "Bolt").unwrap();
        assert_eq!(*seen.lock(), ["customer_name"]);
    }

    #[test]
    fn sync_doc_inserts_then_updates() {
        let app = app();
        let doc = app
            .sync_doc("Customer", &json!({"name": "C1", "customer_name": "First"}))
            .unwrap();
        let cached = app.get_doc("Customer", doc.name()).unwrap();
        let doc = app
            .sync_doc("Customer", &json!({"name": "C1", "customer_name": "Second"}))
            .unwrap();
        assert_eq!(doc.get_str("customer_name"), "Second");
        assert_eq!(cached.lock().get_str("customer_name"), "Second");
        assert_eq!(app.database().count("Customer", &Default::default()).unwrap(), 1);
    }

    #[test]
    fn duplicate_copies_values_but_not_identity() {
        let app = app();
        let original = app
            .insert_doc(
                "Invoice",
                &json!({"customer": "ACME", "items": [{"item": "Widget", "qty": 2, "rate": 5}]}),
            )
            .unwrap();
        let mut copy = app.get_duplicate(&original).unwrap();
        assert!(copy.is_new());
        assert_eq!(copy.get_str("customer"), "ACME");
        assert!(copy.get("owner").is_null());
        assert_ne!(copy.table("items")[0].name(), original.table("items")[0].name());
        copy.insert(&app).unwrap();
        assert_eq!(copy.name(), "INV-1002");
        assert_eq!(copy.get_float("total"), Some(10.0));
    }

    #[test]
    fn rename_and_delete_through_the_app() {
        let app = app();
        app.insert_doc("Customer", &json!({"name": "OLD", "customer_name": "Old"}))
            .unwrap();
        let cached = app.get_doc("Customer", "OLD").unwrap();
        let renamed = app.rename_doc("Customer", "OLD", "NEW").unwrap();
        assert_eq!(renamed.name(), "NEW");
        assert_eq!(app.cached_docs("Customer"), ["NEW"]);
        assert_eq!(cached.lock().name(), "NEW");

        app.delete_doc("Customer", "NEW").unwrap();
        assert!(app.cached_docs("Customer").is_empty());
        assert!(matches!(
            app.get_doc("Customer", "NEW").unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[test]
    fn singles_come_from_the_cache() {
        let app = app();
        let settings = app.get_single("ShopSettings").unwrap();
        assert_eq!(settings.lock().get_int("open_days"), Some(5));
        settings.lock().set("shop_name", "Corner").unwrap();
        settings.lock().save(&app).unwrap();
        assert_eq!(
            app.database()
                .get_value("ShopSettings", "ShopSettings", "shop_name")
                .unwrap(),
            Value::from("Corner")
        );
    }

    #[test]
    fn saved_doctype_records_become_tables() {
        let app = app();
        app.insert_doc(
            DOCTYPE,
            &json!({
                "name": "Note",
                "label": "Note",
                "fields": [{"label": "Body", "fieldtype": "Text"}]
            }),
        )
        .unwrap();
        assert!(app.registry().is_registered("Note"));
        assert!(app.database().backend().table_exists("Note").unwrap());

        let note = app.insert_doc("Note", &json!({"body": "hello"})).unwrap();
        assert_eq!(note.get_str("body"), "hello");
    }

    #[test]
    fn doctypes_saved_in_a_transaction_load_after_commit() {
        let app = app();
        app.transaction(|| {
            app.insert_doc(
                DOCTYPE,
                &json!({
                    "name": "Memo",
                    "label": "Memo",
                    "fields": [{"label": "Body", "fieldtype": "Text"}]
                }),
            )?;
            assert!(!app.database().backend().table_exists("Memo")?);
            Ok(())
        })
        .unwrap();
        assert!(app.registry().is_registered("Memo"));
        assert!(app.database().backend().table_exists("Memo").unwrap());

        let _ = app.transaction(|| -> CoreResult<()> {
            app.insert_doc(
                DOCTYPE,
                &json!({
                    "name": "Draft",
                    "label": "Draft",
                    "fields": [{"label": "Body", "fieldtype": "Text"}]
                }),
            )?;
            Err(CoreError::validation("abandon"))
        });
        assert!(!app.database().backend().table_exists("Draft").unwrap());
        assert!(!app.database().exists(DOCTYPE, "Draft").unwrap());
    }
}
