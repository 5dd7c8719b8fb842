//! Field assignment and child row management.

use super::Document;
use crate::error::{CoreError, CoreResult};
use crate::meta::{standard, Field, FieldType};
use crate::observable::Event;
use docbase_storage::Value;
use serde_json::Value as JsonValue;
use std::sync::Arc;

impl Document {
    /// Assigns a scalar field.
    ///
    /// Nothing happens when the cast value equals the current one.
    /// Otherwise the value is validated, `before_change` fires with the old
    /// value still in place, the value is stored and formulas are re-run
    /// before `after_change` and `change` fire.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidField` for an unknown field,
    /// `CoreError::InvalidValue` for a structural field or a value that does
    /// not fit, and any error raised by a validator or a `before_change`
    /// listener.
    pub fn set(&mut self, fieldname: &str, value: impl Into<Value>) -> CoreResult<()> {
        let meta = Arc::clone(&self.meta);
        let field = scalar_field(&meta, fieldname)?;
        let value = self.cast(field, value.into())?;
        if self.get(fieldname) == &value {
            return Ok(());
        }
        self.check_field(field, &value)?;

        let old = self.get(fieldname).clone();
        let event = self
            .event("before_change")
            .field(fieldname, old.clone(), value.clone());
        self.events().trigger("before_change", &event)?;
        self.dirty = true;
        self.set_raw(fieldname, value);
        self.apply_change(fieldname, old)
    }

    /// Assigns several fields from a JSON object, in key order.
    ///
    /// Structural keys replace the whole child list (or form value).
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Document::set`], [`Document::set_table`]
    /// or [`Document::set_form`].
    pub fn update_values(&mut self, data: &JsonValue) -> CoreResult<()> {
        let JsonValue::Object(object) = data else {
            return Err(CoreError::invalid_value(format!(
                "document data must be an object, got {data}"
            )));
        };
        for (key, value) in object {
            if key == "doctype" {
                continue;
            }
            let fieldtype = self
                .meta
                .get_field(key)
                .map(|field| field.fieldtype.clone())
                .ok_or_else(|| CoreError::invalid_field(self.doctype(), key.as_str()))?;
            match (fieldtype, value) {
                (FieldType::Table, JsonValue::Array(rows)) => self.set_table(key, rows)?,
                (FieldType::Table, JsonValue::Null) => self.set_table(key, &[])?,
                (FieldType::Form, JsonValue::Null) => self.set_form(key, None)?,
                (FieldType::Form, data) => self.set_form(key, Some(data))?,
                (_, value) => self.set(key, Value::from_json(value))?,
            }
        }
        Ok(())
    }

    /// Replaces every row of a `Table` field.
    ///
    /// Rows are numbered 1..n in the given order.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` when the field is not a table, or
    /// the error of building a row.
    pub fn set_table(&mut self, fieldname: &str, rows: &[JsonValue]) -> CoreResult<()> {
        let meta = Arc::clone(&self.meta);
        let field = structural_field(&meta, fieldname, FieldType::Table)?;
        let rows = rows
            .iter()
            .enumerate()
            .map(|(i, row)| self.make_child(field, row, i + 1))
            .collect::<CoreResult<Vec<_>>>()?;
        self.tables.insert(fieldname.to_string(), rows);
        self.renumber(fieldname);
        self.dirty = true;
        self.apply_change(fieldname, Value::Null)
    }

    /// Replaces the value of a `Form` field; `None` clears it.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` when the field is not a form, or
    /// the error of building the child.
    pub fn set_form(&mut self, fieldname: &str, data: Option<&JsonValue>) -> CoreResult<()> {
        let meta = Arc::clone(&self.meta);
        let field = structural_field(&meta, fieldname, FieldType::Form)?;
        let child = data
            .map(|data| self.make_child(field, data, 1))
            .transpose()?;
        self.forms.insert(fieldname.to_string(), child);
        self.dirty = true;
        self.apply_change(fieldname, Value::Null)
    }

    /// Appends a row to a `Table` field and returns its 0-based position.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` when the field is not a table, or
    /// the error of building the row.
    pub fn append(&mut self, fieldname: &str, data: &JsonValue) -> CoreResult<usize> {
        let meta = Arc::clone(&self.meta);
        let field = structural_field(&meta, fieldname, FieldType::Table)?;
        let position = self.table(fieldname).len();
        let mut row = self.make_child(field, data, position + 1)?;
        row.dirty = true;
        self.tables.entry(fieldname.to_string()).or_default().push(row);
        self.dirty = true;
        self.apply_change(fieldname, Value::Null)?;
        Ok(position)
    }

    /// Removes a row of a `Table` field and renumbers the rest.
    ///
    /// The row is deleted from storage on the next save.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` when the field is not a table or
    /// has no row at `index`.
    pub fn remove_row(&mut self, fieldname: &str, index: usize) -> CoreResult<Document> {
        let meta = Arc::clone(&self.meta);
        structural_field(&meta, fieldname, FieldType::Table)?;
        let rows = self.tables.entry(fieldname.to_string()).or_default();
        if index >= rows.len() {
            return Err(missing_row(fieldname, index));
        }
        let removed = rows.remove(index);
        self.renumber(fieldname);
        self.dirty = true;
        self.apply_change(fieldname, Value::Null)?;
        Ok(removed)
    }

    /// Assigns a field of a child row through its owner.
    ///
    /// The row and the owner are both marked dirty and the owner's
    /// formulas run with the structural field as the changed field.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` for a missing row, plus every
    /// error [`Document::set`] can return for the row's field.
    pub fn set_child_value(
        &mut self,
        fieldname: &str,
        index: usize,
        child_field: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let row = self
            .child_mut(fieldname, index)
            .ok_or_else(|| missing_row(fieldname, index))?;
        let child_meta = Arc::clone(&row.meta);
        let field = scalar_field(&child_meta, child_field)?;
        let value = row.cast(field, value.into())?;
        if row.get(child_field) == &value {
            return Ok(());
        }
        row.check_field(field, &value)?;

        let old = row.get(child_field).clone();
        let event = row
            .event("before_change")
            .field(child_field, old.clone(), value.clone());
        row.events().trigger("before_change", &event)?;
        row.set_raw(child_field, value.clone());
        row.dirty = true;
        let after = row.event("after_change").field(child_field, old, value);
        row.events().trigger("after_change", &after)?;

        self.dirty = true;
        self.apply_change(fieldname, Value::Null)
    }

    /// Rewrites `parent`, `parenttype`, `parentfield` and `idx` of every
    /// child from its current position.
    pub fn sync_child_links(&mut self) {
        let name = Value::from(self.name());
        let doctype = Value::from(self.doctype());
        for (fieldname, rows) in &mut self.tables {
            for (i, row) in rows.iter_mut().enumerate() {
                link_child(row, &name, &doctype, fieldname, i + 1);
            }
        }
        for (fieldname, form) in &mut self.forms {
            if let Some(child) = form {
                link_child(child, &name, &doctype, fieldname, 1);
            }
        }
    }

    fn renumber(&mut self, fieldname: &str) {
        if let Some(rows) = self.tables.get_mut(fieldname) {
            for (i, row) in rows.iter_mut().enumerate() {
                row.set_raw("idx", Value::Int(i as i64 + 1));
            }
        }
    }

    /// Recomputes formulas and rounding after `fieldname` changed, then
    /// fires `after_change` and `change`.
    fn apply_change(&mut self, fieldname: &str, old: Value) -> CoreResult<()> {
        self.apply_formula(Some(fieldname));
        self.round_floats();
        let event: Event = self
            .event("after_change")
            .field(fieldname, old, self.get(fieldname).clone());
        self.events().trigger("after_change", &event)?;
        self.events().trigger("change", &event.renamed("change"))
    }
}

fn link_child(child: &mut Document, parent: &Value, parenttype: &Value, parentfield: &str, idx: usize) {
    child.set_raw("parent", parent.clone());
    child.set_raw("parenttype", parenttype.clone());
    child.set_raw("parentfield", Value::from(parentfield));
    child.set_raw("idx", Value::Int(idx as i64));
}

fn scalar_field<'a>(meta: &'a crate::meta::Meta, fieldname: &str) -> CoreResult<&'a Field> {
    let field = meta
        .get_field(fieldname)
        .ok_or_else(|| CoreError::invalid_field(meta.name(), fieldname))?;
    if field.fieldtype.is_structural() {
        return Err(CoreError::invalid_value(format!(
            "\"{}\" holds child records; assign it with set_table or set_form",
            field.display_label()
        )));
    }
    if meta.is_single() && fieldname == standard::NAME {
        return Err(CoreError::invalid_field(meta.name(), fieldname));
    }
    Ok(field)
}

fn structural_field<'a>(
    meta: &'a crate::meta::Meta,
    fieldname: &str,
    expected: FieldType,
) -> CoreResult<&'a Field> {
    let field = meta
        .get_field(fieldname)
        .ok_or_else(|| CoreError::invalid_field(meta.name(), fieldname))?;
    if field.fieldtype != expected {
        return Err(CoreError::invalid_value(format!(
            "\"{}\" is not a {expected} field",
            field.display_label()
        )));
    }
    Ok(field)
}

fn missing_row(fieldname: &str, index: usize) -> CoreError {
    CoreError::invalid_value(format!("\"{fieldname}\" has no row {}", index + 1))
}
