//! Load, save, submit, delete and rename.

use super::{DocFlags, Document, Hook};
use crate::context::App;
use crate::database::Record;
use crate::error::{CoreError, CoreResult};
use crate::meta::standard;
use crate::util::now_timestamp;
use docbase_storage::Value;
use tracing::debug;

/// Values a save assigns before it writes.
const STAMPED: [&str; 5] = [standard::NAME, "owner", "creation", "modified_by", "modified"];

/// Values of [`STAMPED`] and the state flags as they were before a save.
struct Stamps {
    values: Vec<(&'static str, Value)>,
    dirty: bool,
    not_inserted: bool,
}

impl Document {
    /// Loads a stored document.
    ///
    /// Fields of a single that were never saved get their defaults.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no such record exists.
    pub fn load(app: &App, doctype: &str, name: &str) -> CoreResult<Self> {
        let record = app.database().get(doctype, name)?;
        let mut doc = Self::from_record(app.registry(), doctype, &record)?;
        if doc.meta.is_single() {
            doc.fill_missing_defaults();
        }
        Ok(doc)
    }

    /// Replaces the document's values with the stored ones.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the record is gone.
    pub fn reload(&mut self, app: &App) -> CoreResult<()> {
        let record = app.database().get(self.doctype(), self.name())?;
        self.sync_values(&record, app)
    }

    /// Inserts a new document or updates a stored one.
    ///
    /// # Errors
    ///
    /// As [`Document::insert`] and [`Document::update`].
    pub fn save(&mut self, app: &App) -> CoreResult<()> {
        if self.not_inserted {
            self.insert(app)
        } else {
            self.update(app)
        }
    }

    /// Names, validates and inserts the document in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Mandatory` for missing required values, any
    /// error raised by a `validate` or `before_insert` hook, and
    /// `CoreError::Validation` when the name is taken. Nothing is written
    /// then.
    pub fn insert(&mut self, app: &App) -> CoreResult<()> {
        let provisional = self.name().to_string();
        let stamps = self.stamps();
        let result = app.database().transaction(|| {
            self.set_name(app)?;
            self.set_standard_values(app);
            self.presave(app)?;
            self.trigger(Hook::BeforeInsert, app)?;
            let stored = app.database().insert(self.doctype(), &self.get_valid_dict(true))?;
            self.sync_values(&stored, app)?;
            self.trigger(Hook::AfterInsert, app)?;
            self.trigger(Hook::AfterSave, app)
        });
        self.settle(app, stamps, result)?;
        if !provisional.is_empty() && provisional != self.name() {
            app.rename_cached(self.doctype(), &provisional, self.name());
        }
        debug!(doctype = self.doctype(), name = self.name(), "inserted");
        Ok(())
    }

    /// Validates and writes a stored document in one transaction.
    ///
    /// In server mode the write is refused when the stored `modified`
    /// differs from the document's.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Conflict` for a stale document, plus the errors
    /// of [`Document::insert`].
    pub fn update(&mut self, app: &App) -> CoreResult<()> {
        let stamps = self.stamps();
        let result = app.database().transaction(|| {
            self.compare_with_stored(app)?;
            self.presave(app)?;
            self.trigger(Hook::BeforeUpdate, app)?;
            let flags = self.flags;
            if flags.submit_action {
                self.trigger(Hook::BeforeSubmit, app)?;
            }
            if flags.revert_action {
                self.trigger(Hook::BeforeRevert, app)?;
            }
            self.update_modified(app);
            let stored = app.database().update(self.doctype(), &self.get_valid_dict(true))?;
            self.sync_values(&stored, app)?;
            self.trigger(Hook::AfterUpdate, app)?;
            self.trigger(Hook::AfterSave, app)?;
            if flags.submit_action {
                self.trigger(Hook::AfterSubmit, app)?;
            }
            if flags.revert_action {
                self.trigger(Hook::AfterRevert, app)?;
            }
            Ok(())
        });
        self.flags = DocFlags::default();
        self.settle(app, stamps, result)?;
        debug!(doctype = self.doctype(), name = self.name(), "updated");
        Ok(())
    }

    /// Marks the document submitted and updates it.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` when the doctype is not
    /// submittable, plus the errors of [`Document::update`].
    pub fn submit(&mut self, app: &App) -> CoreResult<()> {
        self.ensure_submittable()?;
        self.set(standard::SUBMITTED, 1)?;
        self.update(app)
    }

    /// Clears the submitted flag and updates the document.
    ///
    /// # Errors
    ///
    /// As [`Document::submit`].
    pub fn revert(&mut self, app: &App) -> CoreResult<()> {
        self.ensure_submittable()?;
        self.set(standard::SUBMITTED, 0)?;
        self.update(app)
    }

    fn ensure_submittable(&self) -> CoreResult<()> {
        if self.meta.is_submittable() {
            Ok(())
        } else {
            Err(CoreError::invalid_value(format!(
                "{} is not submittable",
                self.doctype()
            )))
        }
    }

    /// Deletes the stored document and drops it from the cache.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for a missing record, any error raised
    /// by `before_delete`, and `CoreError::Database` when other records
    /// still link to it.
    pub fn delete(&mut self, app: &App) -> CoreResult<()> {
        app.database().transaction(|| {
            self.trigger(Hook::BeforeDelete, app)?;
            app.database().delete(self.doctype(), self.name())?;
            self.trigger(Hook::AfterDelete, app)
        })?;
        app.remove_from_cache(self.doctype(), self.name());
        self.not_inserted = true;
        debug!(doctype = self.doctype(), name = self.name(), "deleted");
        Ok(())
    }

    /// Renames the stored document.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` for singles or an empty name and
    /// `CoreError::Validation` when `new_name` is taken.
    pub fn rename(&mut self, app: &App, new_name: &str) -> CoreResult<()> {
        let old_name = self.name().to_string();
        app.database().transaction(|| {
            self.trigger(Hook::BeforeRename, app)?;
            let stored = app.database().rename(self.doctype(), &old_name, new_name)?;
            self.sync_values(&stored, app)?;
            self.trigger(Hook::AfterRename, app)
        })?;
        app.rename_cached(self.doctype(), &old_name, new_name);
        Ok(())
    }

    /// Takes over a stored record: `before_sync`, values, clean state,
    /// `after_sync`.
    ///
    /// # Errors
    ///
    /// Returns any error raised by a sync hook.
    pub fn sync_values(&mut self, record: &Record, app: &App) -> CoreResult<()> {
        self.trigger(Hook::BeforeSync, app)?;
        self.load_record(record)?;
        self.dirty = false;
        self.not_inserted = false;
        self.trigger(Hook::AfterSync, app)
    }

    /// Stamps the audit fields of a document about to be inserted.
    ///
    /// Only in server mode: `owner` and `creation` are filled when empty,
    /// `modified_by` and `modified` always, and `submitted` defaults to 0.
    pub fn set_standard_values(&mut self, app: &App) {
        if !self.registry.is_server() {
            return;
        }
        if self.meta.is_submittable() && self.get(standard::SUBMITTED).is_null() {
            self.set_raw(standard::SUBMITTED, Value::Int(0));
        }
        if !self.meta.has_field("owner") {
            return;
        }
        let now = now_timestamp();
        let user = app.config().session_user.as_str();
        if self.get("owner").is_empty() {
            self.set_raw("owner", Value::from(user));
        }
        if self.get("creation").is_empty() {
            self.set_raw("creation", Value::from(now.as_str()));
        }
        self.set_raw("modified_by", Value::from(user));
        self.set_raw("modified", Value::from(now));
    }

    /// Stamps `modified` and `modified_by` (server mode only).
    pub fn update_modified(&mut self, app: &App) {
        if !self.registry.is_server() || !self.meta.has_field("modified") {
            return;
        }
        self.set_raw("modified_by", Value::from(app.config().session_user.as_str()));
        self.set_raw("modified", Value::from(now_timestamp()));
    }

    /// Joins the keyword field values into `keywords`.
    pub fn set_keywords(&mut self) {
        if !self.meta.has_field("keywords") {
            return;
        }
        let keywords = self
            .meta
            .keyword_fields()
            .iter()
            .map(|fieldname| self.get_str(fieldname))
            .collect::<Vec<_>>()
            .join(",");
        self.set_raw("keywords", Value::from(keywords));
    }

    fn stamps(&self) -> Stamps {
        Stamps {
            values: STAMPED
                .iter()
                .filter(|fieldname| self.meta.has_field(fieldname))
                .map(|fieldname| (*fieldname, self.get(fieldname).clone()))
                .collect(),
            dirty: self.dirty,
            not_inserted: self.not_inserted,
        }
    }

    /// Finishes a save: queued meta reloads run after a commit, and a
    /// rolled back save gets its identity and audit values back so it can
    /// be retried.
    fn settle(&mut self, app: &App, stamps: Stamps, result: CoreResult<()>) -> CoreResult<()> {
        let committed = result.is_ok();
        if !committed {
            for (fieldname, value) in stamps.values {
                self.set_raw(fieldname, value);
            }
            self.dirty = stamps.dirty;
            self.not_inserted = stamps.not_inserted;
        }
        app.settle_meta_reloads(committed)?;
        result
    }

    /// Keywords, child links, formulas, the `validate` hook and the
    /// mandatory check.
    fn presave(&mut self, app: &App) -> CoreResult<()> {
        self.set_keywords();
        self.sync_child_links();
        self.apply_formula(None);
        self.round_floats();
        self.trigger(Hook::Validate, app)?;
        self.validate_insert(None, true)
    }

    /// Refuses stale writes and derives the submit / revert flags.
    fn compare_with_stored(&mut self, app: &App) -> CoreResult<()> {
        let db = app.database();
        if self.registry.is_server() && self.meta.has_field("modified") {
            let stored = db.get_value(self.doctype(), self.name(), "modified")?;
            if stored.to_text() != self.get_str("modified") {
                return Err(CoreError::conflict(self.doctype(), self.name()));
            }
        }
        let mut flags = DocFlags::default();
        if self.meta.is_submittable() {
            let was = db
                .get_value(self.doctype(), self.name(), standard::SUBMITTED)?
                .as_bool();
            let is = self.get_bool(standard::SUBMITTED);
            flags.submit_action = !was && is;
            flags.revert_action = was && !is;
        }
        self.flags = flags;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::app;
    use crate::database::Filters;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn invoice(app: &App) -> Document {
        app.new_doc(
            "Invoice",
            &json!({
                "customer": "ACME",
                "items": [{"item": "Widget", "qty": 2, "rate": 10}, {"item": "Bolt", "qty": 1, "rate": 0.5}]
            }),
        )
        .unwrap()
    }

    fn recorder(doc: &Document, hooks: &[Hook]) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for hook in hooks {
            let seen = Arc::clone(&seen);
            doc.events().on(hook.as_str(), move |event| {
                seen.lock().push(event.name.clone());
                Ok(())
            });
        }
        seen
    }

    #[test]
    fn insert_names_stamps_and_stores() {
        let app = app();
        let mut doc = invoice(&app);
        doc.insert(&app).unwrap();

        assert!(!doc.is_new());
        assert!(!doc.is_dirty());
        assert_eq!(doc.name(), "INV-1001");
        assert_eq!(doc.get_str("owner"), "Administrator");
        assert!(!doc.get_str("creation").is_empty());
        assert_eq!(doc.get_int("submitted"), Some(0));
        assert_eq!(doc.get_str("keywords"), "ACME,Draft");
        assert_eq!(doc.get_float("total"), Some(20.5));

        let stored = Document::load(&app, "Invoice", "INV-1001").unwrap();
        assert_eq!(stored.table("items").len(), 2);
        assert_eq!(stored.table("items")[1].get_str("item"), "Bolt");
        assert_eq!(stored.table("items")[1].get_str("parent"), "INV-1001");
        assert_eq!(stored.get_float("total"), Some(20.5));
    }

    #[test]
    fn missing_mandatory_values_write_nothing() {
        let app = app();
        let mut doc = app.new_doc("Invoice", &json!({"items": [{"qty": 1}]})).unwrap();
        let err = doc.insert(&app).unwrap_err();
        match &err {
            CoreError::Mandatory { message, fields } => {
                assert!(message.starts_with("Value missing for"));
                assert!(fields.contains(&"customer".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(doc.is_new());
        assert_eq!(app.database().count("Invoice", &Filters::new()).unwrap(), 0);
    }

    #[test]
    fn hooks_run_in_order() {
        let app = app();
        let mut doc = invoice(&app);
        let seen = recorder(
            &doc,
            &[
                Hook::Validate,
                Hook::BeforeInsert,
                Hook::BeforeSync,
                Hook::AfterSync,
                Hook::AfterInsert,
                Hook::AfterSave,
            ],
        );
        doc.insert(&app).unwrap();
        assert_eq!(
            *seen.lock(),
            [
                "validate",
                "before_insert",
                "before_sync",
                "after_sync",
                "after_insert",
                "after_save"
            ]
        );
    }

    #[test]
    fn failing_hook_rolls_back() {
        let app = app();
        let mut doc = invoice(&app);
        doc.events().on("after_insert", |_| Err(CoreError::validation("no thanks")));
        assert!(doc.insert(&app).unwrap_err().is_validation());
        assert!(!app.database().exists("Invoice", "INV-1001").unwrap());
    }

    fn fail_once(doc: &Document, hook: Hook) {
        let failures = Arc::new(Mutex::new(1));
        doc.events().on(hook.as_str(), move |_| {
            let mut failures = failures.lock();
            if *failures == 0 {
                return Ok(());
            }
            *failures -= 1;
            Err(CoreError::validation("try again"))
        });
    }

    #[test]
    fn failed_insert_can_be_retried() {
        let app = app();
        let mut doc = invoice(&app);
        let provisional = doc.name().to_string();
        fail_once(&doc, Hook::AfterInsert);

        assert!(doc.insert(&app).is_err());
        assert!(doc.is_new());
        assert_eq!(doc.name(), provisional);
        assert!(doc.get_str("modified").is_empty());

        doc.insert(&app).unwrap();
        assert_eq!(doc.name(), "INV-1001");
        assert!(app.database().exists("Invoice", "INV-1001").unwrap());
    }

    #[test]
    fn failed_update_can_be_retried() {
        let app = app();
        let mut doc = invoice(&app);
        doc.insert(&app).unwrap();
        let modified = doc.get_str("modified").to_string();
        fail_once(&doc, Hook::AfterSave);

        doc.set("customer", "Globex").unwrap();
        assert!(doc.update(&app).is_err());
        assert_eq!(doc.get_str("modified"), modified);
        assert!(doc.is_dirty());
        assert_eq!(
            app.database().get_value("Invoice", "INV-1001", "customer").unwrap(),
            Value::from("ACME")
        );

        doc.update(&app).unwrap();
        assert_eq!(
            app.database().get_value("Invoice", "INV-1001", "customer").unwrap(),
            Value::from("Globex")
        );
    }

    #[test]
    fn stale_update_is_a_conflict() {
        let app = app();
        let mut doc = invoice(&app);
        doc.insert(&app).unwrap();

        let mut other = Document::load(&app, "Invoice", doc.name()).unwrap();
        other.set("customer", "Bolt Ltd").unwrap();
        app.database()
            .set_value("Invoice", doc.name(), "modified", "2000-01-01 00:00:00.000000")
            .unwrap();
        let err = other.update(&app).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert_eq!(err.status_code(), 409);
        assert_eq!(
            app.database().get_value("Invoice", doc.name(), "customer").unwrap(),
            Value::from("ACME")
        );
    }

    #[test]
    fn update_reconciles_children() {
        let app = app();
        let mut doc = invoice(&app);
        doc.insert(&app).unwrap();
        doc.remove_row("items", 0).unwrap();
        doc.append("items", &json!({"item": "Nut", "qty": 4, "rate": 1})).unwrap();
        doc.save(&app).unwrap();

        let stored = Document::load(&app, "Invoice", doc.name()).unwrap();
        let items: Vec<_> = stored.table("items").iter().map(|r| r.get_str("item")).collect();
        assert_eq!(items, ["Bolt", "Nut"]);
        assert_eq!(stored.get_float("total"), Some(4.5));
    }

    #[test]
    fn submit_and_revert_fire_their_hooks() {
        let app = app();
        let mut doc = invoice(&app);
        doc.insert(&app).unwrap();
        let seen = recorder(
            &doc,
            &[Hook::BeforeSubmit, Hook::AfterSubmit, Hook::BeforeRevert, Hook::AfterRevert],
        );
        doc.submit(&app).unwrap();
        assert!(doc.get_bool("submitted"));
        assert_eq!(doc.flags(), DocFlags::default());
        doc.revert(&app).unwrap();
        assert!(!doc.get_bool("submitted"));
        assert_eq!(
            *seen.lock(),
            ["before_submit", "after_submit", "before_revert", "after_revert"]
        );

        let mut customer = app.new_doc("Customer", &json!({"customer_name": "Acme"})).unwrap();
        customer.insert(&app).unwrap();
        assert!(matches!(
            customer.submit(&app).unwrap_err(),
            CoreError::InvalidValue { .. }
        ));
    }

    #[test]
    fn delete_and_rename() {
        let app = app();
        let mut doc = invoice(&app);
        doc.insert(&app).unwrap();
        doc.rename(&app, "INV-X").unwrap();
        assert_eq!(doc.name(), "INV-X");
        assert_eq!(doc.table("items")[0].get_str("parent"), "INV-X");
        assert!(app.database().exists("Invoice", "INV-X").unwrap());

        doc.delete(&app).unwrap();
        assert!(!app.database().exists("Invoice", "INV-X").unwrap());
        assert!(matches!(
            Document::load(&app, "Invoice", "INV-X").unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[test]
    fn singles_save_and_load_with_defaults() {
        let app = app();
        let mut settings = Document::load(&app, "ShopSettings", "ShopSettings").unwrap();
        assert_eq!(settings.get_int("open_days"), Some(5));
        settings.set("shop_name", "Corner Shop").unwrap();
        settings.save(&app).unwrap();

        let stored = Document::load(&app, "ShopSettings", "ShopSettings").unwrap();
        assert_eq!(stored.get_str("shop_name"), "Corner Shop");
        assert_eq!(stored.get_int("open_days"), Some(5));
    }

    #[test]
    fn reload_discards_local_changes() {
        let app = app();
        let mut doc = invoice(&app);
        doc.insert(&app).unwrap();
        doc.set("customer", "Someone Else").unwrap();
        assert!(doc.is_dirty());
        doc.reload(&app).unwrap();
        assert!(!doc.is_dirty());
        assert_eq!(doc.get_str("customer"), "ACME");
    }
}
