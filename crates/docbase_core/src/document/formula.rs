//! Formula evaluation and float rounding.

use super::Document;
use crate::meta::{Field, FieldType};
use crate::rounding::round_number;
use docbase_storage::Value;
use std::sync::Arc;

impl Document {
    /// Recomputes formula fields; returns true if any value changed.
    ///
    /// `Form` children are evaluated first, then `Table` rows, then the
    /// document's own fields, so a parent formula sees fresh child values.
    /// A formula runs when its field is read-only, when `changed` is one of
    /// its dependencies, or, outside server mode, when the field is empty.
    pub fn apply_formula(&mut self, changed: Option<&str>) -> bool {
        let fill_empty = !self.registry.is_server();
        self.apply_formula_with(changed, fill_empty)
    }

    pub(crate) fn apply_formula_with(&mut self, changed: Option<&str>, fill_empty: bool) -> bool {
        if !self.meta.has_formula() {
            return false;
        }
        let meta = Arc::clone(&self.meta);
        let mut any = false;

        let structural = meta
            .form_fields()
            .into_iter()
            .chain(meta.table_fields());
        for parentfield in structural {
            let Some(child_meta) = parentfield
                .child_doctype()
                .and_then(|child| self.registry.get_meta(child).ok())
            else {
                continue;
            };
            let formula_fields = child_meta.formula_fields();
            if formula_fields.is_empty() {
                continue;
            }
            for index in 0..self.child_count(&parentfield.fieldname) {
                for field in &formula_fields {
                    let value = match self.child(&parentfield.fieldname, index) {
                        Some(row) if should_apply(field, row, changed, fill_empty) => {
                            evaluate(field, row, Some(self))
                        }
                        _ => continue,
                    };
                    if let Some(row) = self.child_mut(&parentfield.fieldname, index) {
                        if !value.is_null() && row.get(&field.fieldname) != &value {
                            row.set_raw(&field.fieldname, value);
                            row.dirty = true;
                            any = true;
                        }
                    }
                }
            }
        }

        for field in meta.formula_fields() {
            if !should_apply(field, self, changed, fill_empty) {
                continue;
            }
            let value = evaluate(field, self, None);
            if !value.is_null() && self.get(&field.fieldname) != &value {
                self.set_raw(&field.fieldname, value);
                any = true;
            }
        }
        any
    }

    fn child_count(&self, fieldname: &str) -> usize {
        match self.forms.get(fieldname) {
            Some(form) => usize::from(form.is_some()),
            None => self.table(fieldname).len(),
        }
    }

    /// Rounds float, currency and percent fields of this document and its
    /// children to their precision.
    pub fn round_floats(&mut self) {
        let meta = Arc::clone(&self.meta);
        let default_precision = self.registry.float_precision();
        for field in meta.fields() {
            if !field.fieldtype.is_float() {
                continue;
            }
            let Some(number) = self.get(&field.fieldname).as_f64() else {
                continue;
            };
            let rounded = Value::Float(round_number(
                number,
                Some(field.precision.unwrap_or(default_precision)),
            ));
            if self.get(&field.fieldname) != &rounded {
                self.set_raw(&field.fieldname, rounded);
            }
        }
        for child in self.children_mut() {
            child.round_floats();
        }
    }
}

fn should_apply(field: &Field, doc: &Document, changed: Option<&str>, fill_empty: bool) -> bool {
    field.read_only
        || changed.is_some_and(|c| field.formula_depends_on.iter().any(|dep| dep == c))
        || (fill_empty && doc.get(&field.fieldname).is_empty())
}

fn evaluate(field: &Field, doc: &Document, parent: Option<&Document>) -> Value {
    let Some(formula) = field.formula() else {
        return Value::Null;
    };
    let value = formula(doc, parent);
    if matches!(field.fieldtype, FieldType::Float | FieldType::Currency) {
        if let Some(number) = value.as_f64() {
            let precision = field
                .precision
                .unwrap_or_else(|| doc.registry.float_precision());
            return Value::Float(round_number(number, Some(precision)));
        }
    }
    value
}
