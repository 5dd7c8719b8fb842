//! Schema-aware records.
//!
//! A [`Document`] is one record of a doctype: an ordered field map bound to
//! the doctype's [`Meta`], with dirty tracking, child records for `Table` and
//! `Form` fields, formula evaluation and a save lifecycle.
//!
//! Children are owned by their parent. They are read through
//! [`Document::table`] / [`Document::form`] and changed through the parent
//! ([`Document::set_child_value`], [`Document::append`], ...), so a change to
//! a child always re-runs the parent's formulas and marks the parent dirty.
//!
//! ```rust,ignore
//! let mut invoice = app.new_doc("Invoice", &json!({
//!     "customer": "ACME",
//!     "items": [{"item": "Widget", "qty": 2, "rate": 10.0}],
//! }))?;
//! invoice.set_child_value("items", 0, "qty", 3)?;
//! assert_eq!(invoice.table("items")[0].get_float("amount"), Some(30.0));
//! invoice.insert(&app)?;
//! ```

mod formula;
mod hooks;
mod lifecycle;
mod mutate;
mod naming;
mod validate;

pub use hooks::{Controller, Hook};

use crate::database::Record;
use crate::error::{CoreError, CoreResult};
use crate::meta::{standard, Field, FieldType, Meta, MetaRegistry};
use crate::observable::{Container, Event, Observable};
use crate::util::random_name;
use docbase_storage::{Row, Value};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;

/// Flags set while a document is being updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocFlags {
    /// The update moves the document to submitted.
    pub submit_action: bool,
    /// The update moves the document back from submitted.
    pub revert_action: bool,
}

/// One record of a doctype.
#[derive(Clone)]
pub struct Document {
    meta: Arc<Meta>,
    registry: Arc<MetaRegistry>,
    values: Container,
    tables: IndexMap<String, Vec<Document>>,
    forms: IndexMap<String, Option<Document>>,
    dirty: bool,
    not_inserted: bool,
    flags: DocFlags,
}

impl Document {
    /// Creates a new, not yet inserted document.
    ///
    /// Defaults are applied first (literal, computed, empty children, then
    /// the doctype's fixed filters), then `data` is ingested. Child rows get
    /// a random name unless one is given and a 1-based `idx`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown doctype,
    /// `CoreError::InvalidField` for a key that is not a field and
    /// `CoreError::InvalidValue` for a value that cannot be stored in its
    /// field.
    pub fn new(registry: &Arc<MetaRegistry>, doctype: &str, data: &JsonValue) -> CoreResult<Self> {
        let meta = registry.get_meta(doctype)?;
        let mut doc = Self::empty(meta, Arc::clone(registry));
        doc.set_defaults();
        let object = as_object(data)?;
        for (key, value) in &object {
            doc.ingest(key, value)?;
        }
        doc.apply_formula_with(None, true);
        doc.round_floats();
        Ok(doc)
    }

    /// Builds a stored document from a persisted record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown doctype.
    pub fn from_record(registry: &Arc<MetaRegistry>, doctype: &str, record: &Record) -> CoreResult<Self> {
        let meta = registry.get_meta(doctype)?;
        let mut doc = Self::empty(meta, Arc::clone(registry));
        doc.load_record(record)?;
        doc.not_inserted = false;
        Ok(doc)
    }

    fn empty(meta: Arc<Meta>, registry: Arc<MetaRegistry>) -> Self {
        let mut values = Container::new();
        for fieldname in meta.valid_fieldnames(false) {
            values.set_raw(fieldname, Value::Null);
        }
        if meta.is_single() {
            values.set_raw(standard::NAME, Value::from(meta.name()));
        }
        let mut tables = IndexMap::new();
        let mut forms = IndexMap::new();
        for field in meta.structural_fields() {
            match field.fieldtype {
                FieldType::Form => {
                    forms.insert(field.fieldname.clone(), None);
                }
                _ => {
                    tables.insert(field.fieldname.clone(), Vec::new());
                }
            }
        }
        Self {
            meta,
            registry,
            values,
            tables,
            forms,
            dirty: false,
            not_inserted: true,
            flags: DocFlags::default(),
        }
    }

    fn set_defaults(&mut self) {
        let meta = Arc::clone(&self.meta);
        for field in meta.fields() {
            if field.fieldtype.is_structural() || !self.get(&field.fieldname).is_null() {
                continue;
            }
            let default = match (field.default_fn(), &field.default) {
                (Some(compute), _) => compute(self),
                (None, Some(literal)) => literal.clone(),
                (None, None) => continue,
            };
            let default = self.cast(field, default).unwrap_or(Value::Null);
            self.values.set_raw(&field.fieldname, default);
        }
        for (fieldname, value) in meta.filters() {
            self.values.set_raw(fieldname, value.clone());
        }
    }

    /// Fills fields of a stored single that were never saved.
    pub(crate) fn fill_missing_defaults(&mut self) {
        self.set_defaults();
    }

    fn ingest(&mut self, key: &str, value: &JsonValue) -> CoreResult<()> {
        if key == "doctype" {
            return Ok(());
        }
        let meta = Arc::clone(&self.meta);
        let field = meta
            .get_field(key)
            .ok_or_else(|| CoreError::invalid_field(meta.name(), key))?;

        match field.fieldtype {
            FieldType::Table => {
                let rows = match value {
                    JsonValue::Null => Vec::new(),
                    JsonValue::Array(rows) => rows
                        .iter()
                        .enumerate()
                        .map(|(i, row)| self.make_child(field, row, i + 1))
                        .collect::<CoreResult<Vec<_>>>()?,
                    _ => {
                        return Err(CoreError::invalid_value(format!(
                            "\"{}\" expects a list of rows",
                            field.display_label()
                        )))
                    }
                };
                self.tables.insert(key.to_string(), rows);
            }
            FieldType::Form => {
                let child = match value {
                    JsonValue::Null => None,
                    JsonValue::Object(_) => Some(self.make_child(field, value, 1)?),
                    _ => {
                        return Err(CoreError::invalid_value(format!(
                            "\"{}\" expects an object",
                            field.display_label()
                        )))
                    }
                };
                self.forms.insert(key.to_string(), child);
            }
            _ => {
                let value = self.cast(field, Value::from_json(value))?;
                self.values.set_raw(key, value);
            }
        }
        Ok(())
    }

    pub(crate) fn make_child(&self, field: &Field, data: &JsonValue, idx: usize) -> CoreResult<Document> {
        let child_doctype = field.child_doctype().ok_or_else(|| {
            CoreError::invalid_value(format!("\"{}\" has no child doctype", field.fieldname))
        })?;
        let mut child = Document::new(&self.registry, child_doctype, data)?;
        if child.get(standard::NAME).is_empty() {
            child.values.set_raw(standard::NAME, Value::from(random_name()));
        }
        if child.get("idx").is_empty() {
            child.values.set_raw("idx", Value::Int(idx as i64));
        }
        child.values.set_raw("parent", Value::from(self.name()));
        child.values.set_raw("parenttype", Value::from(self.doctype()));
        child.values.set_raw("parentfield", Value::from(field.fieldname.as_str()));
        child.not_inserted = self.not_inserted;
        Ok(child)
    }

    /// Coerces a value to the column type of a field.
    pub(crate) fn cast(&self, field: &Field, value: Value) -> CoreResult<Value> {
        match self.meta.column_type(&field.fieldname) {
            Some(column) => column.cast(value).map_err(|text| {
                CoreError::invalid_value(format!(
                    "Invalid value \"{text}\" for \"{}\"",
                    field.display_label()
                ))
            }),
            None => Ok(value),
        }
    }

    /// Replaces every value and child with the content of a record.
    pub(crate) fn load_record(&mut self, record: &Record) -> CoreResult<()> {
        let meta = Arc::clone(&self.meta);
        for fieldname in meta.valid_fieldnames(false) {
            let value = record.values.get(fieldname).cloned().unwrap_or(Value::Null);
            let value = match meta.get_field(fieldname) {
                Some(field) => self.cast(field, value.clone()).unwrap_or(value),
                None => value,
            };
            self.values.set_raw(fieldname, value);
        }
        if meta.is_single() {
            self.values.set_raw(standard::NAME, Value::from(meta.name()));
        }

        for field in meta.structural_fields() {
            let Some(child_doctype) = field.child_doctype() else {
                continue;
            };
            let rows = record
                .children
                .get(&field.fieldname)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let children = rows
                .iter()
                .map(|row| Document::from_row(&self.registry, child_doctype, row))
                .collect::<CoreResult<Vec<_>>>()?;
            if field.fieldtype == FieldType::Form {
                self.forms
                    .insert(field.fieldname.clone(), children.into_iter().next());
            } else {
                self.tables.insert(field.fieldname.clone(), children);
            }
        }
        Ok(())
    }

    fn from_row(registry: &Arc<MetaRegistry>, doctype: &str, row: &Row) -> CoreResult<Self> {
        Self::from_record(registry, doctype, &Record::new(row.clone()))
    }

    /// The resolved meta.
    #[must_use]
    pub fn meta(&self) -> &Arc<Meta> {
        &self.meta
    }

    /// The registry the document was built from.
    #[must_use]
    pub fn registry(&self) -> &Arc<MetaRegistry> {
        &self.registry
    }

    /// Entity kind.
    #[must_use]
    pub fn doctype(&self) -> &str {
        self.meta.name()
    }

    /// Record identifier; empty until named.
    #[must_use]
    pub fn name(&self) -> &str {
        self.values.value(standard::NAME).as_str().unwrap_or("")
    }

    /// Value of a scalar field, `Null` when unset.
    #[must_use]
    pub fn get(&self, fieldname: &str) -> &Value {
        self.values.value(fieldname)
    }

    /// Value rendered as text.
    #[must_use]
    pub fn get_str(&self, fieldname: &str) -> String {
        self.get(fieldname).to_text()
    }

    /// Value as an integer.
    #[must_use]
    pub fn get_int(&self, fieldname: &str) -> Option<i64> {
        self.get(fieldname).as_i64()
    }

    /// Value as a float.
    #[must_use]
    pub fn get_float(&self, fieldname: &str) -> Option<f64> {
        self.get(fieldname).as_f64()
    }

    /// Value as a check flag.
    #[must_use]
    pub fn get_bool(&self, fieldname: &str) -> bool {
        self.get(fieldname).as_bool()
    }

    /// Rows of a `Table` field (empty for anything else).
    #[must_use]
    pub fn table(&self, fieldname: &str) -> &[Document] {
        self.tables.get(fieldname).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Value of a `Form` field.
    #[must_use]
    pub fn form(&self, fieldname: &str) -> Option<&Document> {
        self.forms.get(fieldname).and_then(Option::as_ref)
    }

    /// A child by 0-based position; position 0 of a `Form` field is its value.
    #[must_use]
    pub fn child(&self, fieldname: &str, index: usize) -> Option<&Document> {
        match self.forms.get(fieldname) {
            Some(form) if index == 0 => form.as_ref(),
            Some(_) => None,
            None => self.table(fieldname).get(index),
        }
    }

    pub(crate) fn child_mut(&mut self, fieldname: &str, index: usize) -> Option<&mut Document> {
        match self.forms.get_mut(fieldname) {
            Some(form) if index == 0 => form.as_mut(),
            Some(_) => None,
            None => self.tables.get_mut(fieldname)?.get_mut(index),
        }
    }

    /// Every child with the structural field it belongs to.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Document)> {
        let tables = self
            .tables
            .iter()
            .flat_map(|(field, rows)| rows.iter().map(move |row| (field.as_str(), row)));
        let forms = self
            .forms
            .iter()
            .filter_map(|(field, form)| form.as_ref().map(|doc| (field.as_str(), doc)));
        tables.chain(forms)
    }

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = &mut Document> {
        self.tables
            .values_mut()
            .flat_map(|rows| rows.iter_mut())
            .chain(self.forms.values_mut().filter_map(Option::as_mut))
    }

    /// Changed since it was loaded or last saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Not yet inserted.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.not_inserted
    }

    /// Update flags.
    #[must_use]
    pub fn flags(&self) -> DocFlags {
        self.flags
    }

    /// The document's event hub (field changes and lifecycle hooks).
    #[must_use]
    pub fn events(&self) -> &Observable {
        self.values.events()
    }

    pub(crate) fn event(&self, name: &str) -> Event {
        let docname = Some(self.name().to_string()).filter(|n| !n.is_empty());
        Event::new(name).record(self.doctype(), docname)
    }

    pub(crate) fn set_raw(&mut self, fieldname: &str, value: Value) {
        self.values.set_raw(fieldname, value);
    }

    /// Valid scalar fields plus, with `with_children`, the child rows.
    #[must_use]
    pub fn get_valid_dict(&self, with_children: bool) -> Record {
        let values: Row = self
            .meta
            .valid_fieldnames(false)
            .iter()
            .map(|name| (name.clone(), self.get(name).clone()))
            .collect();
        let mut record = Record::new(values);
        if with_children {
            for (fieldname, rows) in &self.tables {
                record.children.insert(
                    fieldname.clone(),
                    rows.iter().map(|row| row.get_valid_dict(false).values).collect(),
                );
            }
            for (fieldname, form) in &self.forms {
                record.children.insert(
                    fieldname.clone(),
                    form.iter().map(|doc| doc.get_valid_dict(false).values).collect(),
                );
            }
        }
        record
    }

    /// JSON object of the valid fields, children included.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut object = Map::new();
        if self.meta.is_single() {
            object.insert(standard::NAME.to_string(), JsonValue::from(self.name()));
        }
        for fieldname in self.meta.valid_fieldnames(true) {
            let value = if let Some(rows) = self.tables.get(fieldname) {
                JsonValue::Array(rows.iter().map(Document::to_json).collect())
            } else if let Some(form) = self.forms.get(fieldname) {
                form.as_ref().map_or(JsonValue::Null, Document::to_json)
            } else {
                self.get(fieldname).to_json()
            };
            object.insert(fieldname.clone(), value);
        }
        object.insert("doctype".to_string(), JsonValue::from(self.doctype()));
        JsonValue::Object(object)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("doctype", &self.doctype())
            .field("name", &self.name())
            .field("dirty", &self.dirty)
            .field("new", &self.not_inserted)
            .finish()
    }
}

fn as_object(data: &JsonValue) -> CoreResult<Map<String, JsonValue>> {
    match data {
        JsonValue::Object(map) => Ok(map.clone()),
        JsonValue::Null => Ok(Map::new()),
        other => Err(CoreError::invalid_value(format!(
            "document data must be an object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FieldDefinition, MetaDefinition, RegistrySettings};
    use serde_json::json;

    pub(crate) fn registry() -> Arc<MetaRegistry> {
        let registry = MetaRegistry::with_builtins(RegistrySettings::default());
        registry
            .register(
                MetaDefinition::new("InvoiceItem")
                    .child()
                    .field(FieldDefinition::new("item", FieldType::Data).required().label("Item"))
                    .field(FieldDefinition::new("qty", FieldType::Float).default_value(1))
                    .field(FieldDefinition::new("rate", FieldType::Currency))
                    .field(FieldDefinition::new("amount", FieldType::Currency).read_only()),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Address")
                    .child()
                    .field(FieldDefinition::new("city", FieldType::Data).required().label("City")),
            )
            .unwrap();
        registry
            .register(
                MetaDefinition::new("Invoice")
                    .submittable()
                    .field(
                        FieldDefinition::new("customer", FieldType::Data)
                            .required()
                            .label("Customer"),
                    )
                    .field(
                        FieldDefinition::new("status", FieldType::Select)
                            .options("Draft\nPaid")
                            .default_value("Draft")
                            .label("Status"),
                    )
                    .field(
                        FieldDefinition::new("items", FieldType::Table)
                            .childtype("InvoiceItem")
                            .label("Items"),
                    )
                    .field(
                        FieldDefinition::new("billing", FieldType::Form)
                            .childtype("Address")
                            .label("Billing"),
                    )
                    .field(FieldDefinition::new("email", FieldType::Data).validator("email"))
                    .field(FieldDefinition::new("total", FieldType::Currency).read_only()),
            )
            .unwrap();
        registry.register_formula("InvoiceItem", "amount", |row, _parent| {
            Value::from(row.get_float("qty").unwrap_or(0.0) * row.get_float("rate").unwrap_or(0.0))
        });
        registry.register_formula("Invoice", "total", |doc, _| {
            Value::from(
                doc.table("items")
                    .iter()
                    .filter_map(|row| row.get_float("amount"))
                    .sum::<f64>(),
            )
        });
        Arc::new(registry)
    }

    #[test]
    fn construction_applies_defaults_and_children() {
        let registry = registry();
        let doc = Document::new(
            &registry,
            "Invoice",
            &json!({
                "customer": "ACME",
                "items": [{"item": "Widget", "rate": 2.5}, {"item": "Bolt", "qty": 4, "rate": "0.25"}]
            }),
        )
        .unwrap();

        assert!(doc.is_new());
        assert!(!doc.is_dirty());
        assert_eq!(doc.get_str("status"), "Draft");
        assert_eq!(doc.table("items").len(), 2);
        assert!(doc.form("billing").is_none());

        let first = &doc.table("items")[0];
        assert_eq!(first.get_int("idx"), Some(1));
        assert_eq!(first.get_str("parentfield"), "items");
        assert_eq!(first.get_str("parenttype"), "Invoice");
        assert_eq!(first.name().len(), 10);
        assert_eq!(first.get_float("qty"), Some(1.0));
        assert_eq!(first.get_float("amount"), Some(2.5));
        assert_eq!(doc.table("items")[1].get_float("amount"), Some(1.0));
        assert_eq!(doc.get_float("total"), Some(3.5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let registry = registry();
        let err = Document::new(&registry, "Invoice", &json!({"nope": 1})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidField { .. }));

        let err = Document::new(&registry, "Invoice", &json!({"items": [{"bogus": 1}]})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidField { .. }));
    }

    #[test]
    fn wrong_shapes_are_invalid_values() {
        let registry = registry();
        assert!(matches!(
            Document::new(&registry, "Invoice", &json!({"items": "x"})).unwrap_err(),
            CoreError::InvalidValue { .. }
        ));
        assert!(matches!(
            Document::new(&registry, "InvoiceItem", &json!({"qty": "many"})).unwrap_err(),
            CoreError::InvalidValue { .. }
        ));
        assert!(Document::new(&registry, "Invoice", &json!([1, 2])).is_err());
    }

    #[test]
    fn valid_dict_and_json_projection() {
        let registry = registry();
        let doc = Document::new(
            &registry,
            "Invoice",
            &json!({
                "name": "INV-1",
                "customer": "ACME",
                "billing": {"city": "Oslo"},
                "items": [{"item": "Widget", "qty": 2, "rate": 3}]
            }),
        )
        .unwrap();

        let record = doc.get_valid_dict(true);
        assert_eq!(record.values.get("customer"), Some(&Value::from("ACME")));
        assert!(record.values.contains_key("modified"));
        assert!(!record.values.contains_key("items"));
        assert_eq!(record.children["items"].len(), 1);
        assert_eq!(record.children["billing"][0].get("parent"), Some(&Value::from("INV-1")));

        let json = doc.to_json();
        assert_eq!(json["doctype"], "Invoice");
        assert_eq!(json["items"][0]["amount"], 6.0);
        assert_eq!(json["billing"]["city"], "Oslo");
        assert_eq!(json["total"], 6.0);
    }

    #[test]
    fn from_record_is_not_new() {
        let registry = registry();
        let mut values = Row::new();
        values.insert("name".into(), Value::from("INV-9"));
        values.insert("customer".into(), Value::from("ACME"));
        let mut item = Row::new();
        item.insert("name".into(), Value::from("row1"));
        item.insert("item".into(), Value::from("Widget"));
        item.insert("qty".into(), Value::from("3"));
        let mut record = Record::new(values);
        record.children.insert("items".into(), vec![item]);

        let doc = Document::from_record(&registry, "Invoice", &record).unwrap();
        assert!(!doc.is_new());
        assert_eq!(doc.name(), "INV-9");
        assert_eq!(doc.table("items")[0].get_float("qty"), Some(3.0));
        assert!(!doc.table("items")[0].is_new());
        assert_eq!(doc.child("items", 0).map(Document::name), Some("row1"));
        assert!(doc.child("items", 1).is_none());
    }
}
