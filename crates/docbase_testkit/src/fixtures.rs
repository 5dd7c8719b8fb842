//! Test fixtures and application helpers.
//!
//! Every fixture opens an [`App`] over the same small invoicing schema:
//!
//! | doctype        | kind            | naming     |
//! |----------------|-----------------|------------|
//! | `Customer`     | regular         | provided   |
//! | `Item`         | regular         | provided   |
//! | `InvoiceItem`  | child           | random     |
//! | `SalesInvoice` | submittable     | `SINV-`    |
//! | `Note`         | regular         | autoincr.  |
//! | `ShopSettings` | single          |            |

use docbase_core::{
    App, AppBuilder, Config, CoreResult, Document, FieldDefinition, FieldType, MetaDefinition,
    Naming, Value,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The sample schema.
#[must_use]
pub fn sample_definitions() -> Vec<MetaDefinition> {
    vec![
        MetaDefinition::new("Customer")
            .field(
                FieldDefinition::new("customer_name", FieldType::Data)
                    .required()
                    .label("Customer Name"),
            )
            .field(FieldDefinition::new("email", FieldType::Data).validator("email"))
            .keyword_fields(["customer_name"]),
        MetaDefinition::new("Item")
            .field(FieldDefinition::new("item_name", FieldType::Data).required())
            .field(FieldDefinition::new("rate", FieldType::Currency)),
        MetaDefinition::new("InvoiceItem")
            .child()
            .field(
                FieldDefinition::new("item", FieldType::Link)
                    .target("Item")
                    .required()
                    .label("Item"),
            )
            .field(FieldDefinition::new("qty", FieldType::Float).default_value(1))
            .field(FieldDefinition::new("rate", FieldType::Currency))
            .field(FieldDefinition::new("amount", FieldType::Currency).read_only()),
        MetaDefinition::new("SalesInvoice")
            .label("Sales Invoice")
            .submittable()
            .naming(Naming::Series("SINV-".to_string()))
            .field(
                FieldDefinition::new("customer", FieldType::Link)
                    .target("Customer")
                    .required()
                    .label("Customer"),
            )
            .field(FieldDefinition::new("date", FieldType::Date))
            .field(
                FieldDefinition::new("status", FieldType::Select)
                    .options("Draft\nUnpaid\nPaid")
                    .default_value("Draft"),
            )
            .field(
                FieldDefinition::new("items", FieldType::Table)
                    .childtype("InvoiceItem")
                    .label("Items"),
            )
            .field(FieldDefinition::new("total", FieldType::Currency).read_only())
            .keyword_fields(["customer", "status"]),
        MetaDefinition::new("Note")
            .naming(Naming::Autoincrement)
            .field(FieldDefinition::new("title", FieldType::Data).required())
            .field(FieldDefinition::new("content", FieldType::Text)),
        MetaDefinition::new("ShopSettings")
            .single()
            .field(FieldDefinition::new("shop_name", FieldType::Data))
            .field(FieldDefinition::new("open_days", FieldType::Int).default_value(5)),
    ]
}

/// An [`AppBuilder`] carrying the sample schema and its formulas.
#[must_use]
pub fn sample_builder(config: Config) -> AppBuilder {
    App::builder(config)
        .definitions(sample_definitions())
        .formula("InvoiceItem", "amount", |row, _| {
            Value::from(row.get_float("qty").unwrap_or(0.0) * row.get_float("rate").unwrap_or(0.0))
        })
        .formula("SalesInvoice", "total", |doc, _| {
            Value::from(
                doc.table("items")
                    .iter()
                    .filter_map(|row| row.get_float("amount"))
                    .sum::<f64>(),
            )
        })
}

/// A test application with automatic cleanup.
pub struct TestApp {
    /// The application.
    pub app: App,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestApp {
    /// Opens the sample schema over an in-memory database.
    pub fn memory() -> Self {
        Self::with_config(Config::new())
    }

    /// Opens the sample schema over an in-memory database with `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            app: sample_builder(config.in_memory())
                .open()
                .expect("Failed to open in-memory app"),
            temp_dir: None,
        }
    }

    /// Opens the sample schema over a database file in a temporary
    /// directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("site.db");
        let app = sample_builder(Config::new().database_path(&path))
            .open()
            .expect("Failed to open file app");
        Self {
            app,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("site.db"))
    }

    /// Closes the application and opens the same file again, with a
    /// builder derived from the sample one.
    ///
    /// Panics for in-memory apps.
    pub fn reopen_with<F>(self, customize: F) -> CoreResult<Self>
    where
        F: FnOnce(AppBuilder) -> AppBuilder,
    {
        let Self { app, temp_dir } = self;
        let temp_dir = temp_dir.expect("Only file-based apps can be reopened");
        drop(app);
        let path = temp_dir.path().join("site.db");
        let app = customize(sample_builder(Config::new().database_path(&path))).open()?;
        Ok(Self {
            app,
            temp_dir: Some(temp_dir),
        })
    }

    /// Closes the application and opens the same file again.
    pub fn reopen(self) -> Self {
        self.reopen_with(|builder| builder)
            .expect("Failed to reopen app")
    }

    /// Inserts the customers `ACME` and `GLOBEX` and the items `WIDGET`
    /// (rate 2.5) and `GADGET` (rate 10).
    pub fn seed(&self) {
        for (name, customer_name) in [("ACME", "Acme Corp"), ("GLOBEX", "Globex")] {
            self.app
                .insert_doc("Customer", &json!({"name": name, "customer_name": customer_name}))
                .expect("Failed to seed customer");
        }
        for (name, rate) in [("WIDGET", 2.5), ("GADGET", 10.0)] {
            self.app
                .insert_doc("Item", &json!({"name": name, "item_name": name, "rate": rate}))
                .expect("Failed to seed item");
        }
    }

    /// Builds (but does not insert) a sales invoice for `customer` with one
    /// line per `(item, qty, rate)`.
    pub fn invoice(&self, customer: &str, lines: &[(&str, f64, f64)]) -> Document {
        let items: Vec<_> = lines
            .iter()
            .map(|(item, qty, rate)| json!({"item": item, "qty": qty, "rate": rate}))
            .collect();
        self.app
            .new_doc("SalesInvoice", &json!({"customer": customer, "items": items}))
            .expect("Failed to build invoice")
    }
}

impl std::ops::Deref for TestApp {
    type Target = App;

    fn deref(&self) -> &Self::Target {
        &self.app
    }
}

/// Runs a test with a seeded in-memory application.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_testkit::fixtures::with_seeded_app;
///
/// #[test]
/// fn my_test() {
///     with_seeded_app(|app| {
///         assert!(app.database().exists("Customer", "ACME").unwrap());
///     });
/// }
/// ```
pub fn with_seeded_app<F, R>(f: F) -> R
where
    F: FnOnce(&App) -> R,
{
    let test_app = TestApp::memory();
    test_app.seed();
    f(&test_app.app)
}

/// Runs a test with a file-backed application and its database path.
pub fn with_file_app<F, R>(f: F) -> R
where
    F: FnOnce(&App, &Path) -> R,
{
    let test_app = TestApp::file();
    let path = test_app.path().expect("File app should have a path");
    f(&test_app.app, &path)
}
