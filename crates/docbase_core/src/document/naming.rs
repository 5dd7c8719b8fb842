//! Record naming.

use super::Document;
use crate::context::App;
use crate::database::{Database, Filters, Record};
use crate::error::CoreResult;
use crate::meta::{standard, Meta, Naming, NUMBER_SERIES};
use crate::util::{now_timestamp, random_name};
use docbase_storage::Value;
use std::sync::Arc;
use tracing::debug;

/// First value of a new number series; the first name issued is one more.
pub const SERIES_START: i64 = 1000;

impl Document {
    /// Assigns the record name.
    ///
    /// Singles are named after their doctype. In server mode
    /// `autoincrement` and `series:` doctypes are always (re)numbered;
    /// otherwise a provided name is kept and a random one assigned when
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be read or advanced.
    pub fn set_name(&mut self, app: &App) -> CoreResult<()> {
        let meta = Arc::clone(&self.meta);
        if meta.is_single() {
            self.set_raw(standard::NAME, Value::from(meta.name()));
            return Ok(());
        }
        if self.registry.is_server() {
            let name = match meta.naming() {
                Naming::Autoincrement => Some(next_autoincrement(app.database(), &meta)?),
                Naming::Series(prefix) => Some(next_in_series(app, prefix)?),
                Naming::Random => None,
            };
            if let Some(name) = name {
                debug!(doctype = meta.name(), %name, "named record");
                self.set_raw(standard::NAME, Value::from(name));
                self.sync_child_links();
                return Ok(());
            }
        }
        if self.name().is_empty() {
            self.set_raw(standard::NAME, Value::from(random_name()));
            self.sync_child_links();
        }
        Ok(())
    }
}

/// Highest numeric name plus one, zero-padded to 9 digits.
pub(crate) fn next_autoincrement(db: &Database, meta: &Meta) -> CoreResult<String> {
    let (sql, params) = db.select(meta, "max(CAST(name AS INTEGER)) AS last", Filters::new())?;
    let last = db
        .backend()
        .query(&sql, &params)?
        .first()
        .and_then(|row| row.get("last"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    Ok(format!("{:09}", last.max(0) + 1))
}

/// Advances the `NumberSeries` counter of `prefix`, creating it at
/// [`SERIES_START`] when absent, and returns `prefix` + the new value.
pub(crate) fn next_in_series(app: &App, prefix: &str) -> CoreResult<String> {
    let db = app.database();
    db.transaction(|| {
        if !db.exists(NUMBER_SERIES, prefix)? {
            let now = now_timestamp();
            let user = app.config().session_user.as_str();
            let mut record = Record::default();
            for (fieldname, value) in [
                (standard::NAME, Value::from(prefix)),
                ("current_value", Value::Int(SERIES_START)),
                ("owner", Value::from(user)),
                ("modified_by", Value::from(user)),
                ("creation", Value::from(now.as_str())),
                ("modified", Value::from(now.as_str())),
                ("keywords", Value::from(prefix)),
            ] {
                record.values.insert(fieldname.to_string(), value);
            }
            db.insert(NUMBER_SERIES, &record)?;
        }
        let current = db
            .get_value(NUMBER_SERIES, prefix, "current_value")?
            .as_i64()
            .unwrap_or(SERIES_START);
        let next = current + 1;
        db.set_value(NUMBER_SERIES, prefix, "current_value", next)?;
        Ok(format!("{prefix}{next}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::app;
    use serde_json::json;

    #[test]
    fn series_starts_after_the_seed_value() {
        let app = app();
        assert_eq!(next_in_series(&app, "INV-").unwrap(), "INV-1001");
        assert_eq!(next_in_series(&app, "INV-").unwrap(), "INV-1002");
        assert_eq!(next_in_series(&app, "PO-").unwrap(), "PO-1001");
        assert_eq!(
            app.database()
                .get_value(NUMBER_SERIES, "INV-", "current_value")
                .unwrap(),
            Value::Int(1002)
        );
    }

    #[test]
    fn autoincrement_pads_to_nine_digits() {
        let app = app();
        let mut first = app.new_doc("Ticket", &json!({"title": "one"})).unwrap();
        first.insert(&app).unwrap();
        assert_eq!(first.name(), "000000001");
        let mut second = app.new_doc("Ticket", &json!({"name": "x", "title": "two"})).unwrap();
        second.insert(&app).unwrap();
        assert_eq!(second.name(), "000000002");
    }

    #[test]
    fn provided_names_are_kept_and_empty_ones_randomised() {
        let app = app();
        let mut named = app.new_doc("Customer", &json!({"name": "ACME", "customer_name": "Acme"})).unwrap();
        named.set_name(&app).unwrap();
        assert_eq!(named.name(), "ACME");

        let mut unnamed = app.new_doc("Customer", &json!({"customer_name": "Bolt"})).unwrap();
        unnamed.set_name(&app).unwrap();
        assert_eq!(unnamed.name().len(), 10);

        let mut settings = app.new_doc("ShopSettings", &json!({})).unwrap();
        settings.set_name(&app).unwrap();
        assert_eq!(settings.name(), "ShopSettings");
    }

    #[test]
    fn series_names_relink_children() {
        let app = app();
        let mut invoice = app
            .new_doc(
                "Invoice",
                &json!({"customer": "ACME", "items": [{"item": "Widget", "qty": 1, "rate": 2}]}),
            )
            .unwrap();
        invoice.set_name(&app).unwrap();
        assert!(invoice.name().starts_with("INV-"));
        assert_eq!(invoice.table("items")[0].get_str("parent"), invoice.name());
    }
}
