//! Record writes.

use super::filter::Filters;
use super::record::Record;
use super::schema::{quoted, SINGLE_VALUE};
use super::Database;
use crate::change_feed::ChangeType;
use crate::error::{CoreError, CoreResult};
use crate::meta::{standard, Meta};
use crate::util::random_name;
use docbase_storage::{Row, Value};

impl Database {
    /// Inserts a record and its child rows, returning the stored record.
    ///
    /// The doctype's fixed filters overwrite the matching values. A single
    /// doctype replaces its stored values instead.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the name is taken,
    /// `CoreError::InvalidValue` for a missing name or a value that does not
    /// fit its column, and `CoreError::Database` for constraint failures.
    pub fn insert(&self, doctype: &str, record: &Record) -> CoreResult<Record> {
        let meta = self.registry.get_meta(doctype)?;
        self.transaction(|| {
            let mut values = record.values.clone();
            apply_fixed(&meta, &mut values);
            let name = if meta.is_single() {
                self.update_single(&meta, &values)?;
                self.update_children(&meta, meta.name(), record)?;
                meta.name().to_string()
            } else {
                let name = record_name(&meta, &values)?;
                if self.row_exists(meta.base_doctype(), &name)? {
                    return Err(CoreError::duplicate(doctype, &name));
                }
                self.insert_one(&meta, &values)?;
                self.insert_children(&meta, &name, record)?;
                name
            };
            self.trigger_change(&meta, &name, ChangeType::Insert, None)?;
            self.get(doctype, &name)
        })
    }

    /// Writes every value of a record and reconciles its child rows.
    ///
    /// Child rows are matched by name: existing ones are updated, new ones
    /// inserted, and rows of the parent no longer present are deleted.
    /// Structural fields absent from `record.children` are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when the record does not exist.
    pub fn update(&self, doctype: &str, record: &Record) -> CoreResult<Record> {
        let meta = self.registry.get_meta(doctype)?;
        self.transaction(|| {
            let mut values = record.values.clone();
            apply_fixed(&meta, &mut values);
            let name = if meta.is_single() {
                self.update_single(&meta, &values)?;
                meta.name().to_string()
            } else {
                let name = record_name(&meta, &values)?;
                if !self.exists(doctype, &name)? {
                    return Err(CoreError::not_found(doctype, name));
                }
                self.update_one(&meta, &values)?;
                name
            };
            self.update_children(&meta, &name, record)?;
            self.trigger_change(&meta, &name, ChangeType::Update, None)?;
            self.get(doctype, &name)
        })
    }

    /// Inserts one row into the doctype's table. Null values are left to
    /// the column default.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` for a value that does not fit its
    /// column.
    pub fn insert_one(&self, meta: &Meta, values: &Row) -> CoreResult<()> {
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for (fieldname, value) in column_values(meta, values)? {
            if value.is_null() {
                continue;
            }
            columns.push(fieldname);
            params.push(value);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        self.backend.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                quoted(meta.base_doctype()),
                columns.join(", ")
            ),
            &params,
        )?;
        Ok(())
    }

    /// Updates the columns present in `values` of the row named by
    /// `values["name"]`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no row was changed.
    pub fn update_one(&self, meta: &Meta, values: &Row) -> CoreResult<()> {
        let name = record_name(meta, values)?;
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (fieldname, value) in column_values(meta, values)? {
            if fieldname == standard::NAME {
                continue;
            }
            assignments.push(format!("{fieldname} = ?"));
            params.push(value);
        }
        if assignments.is_empty() {
            return Ok(());
        }
        params.push(Value::from(name.as_str()));
        let changed = self.backend.execute(
            &format!(
                "UPDATE {} SET {} WHERE name = ?",
                quoted(meta.base_doctype()),
                assignments.join(", ")
            ),
            &params,
        )?;
        if changed == 0 {
            return Err(CoreError::not_found(meta.name(), name));
        }
        Ok(())
    }

    /// Inserts the child rows of `record` under `parent`.
    ///
    /// # Errors
    ///
    /// Returns the first failing insert.
    pub fn insert_children(&self, meta: &Meta, parent: &str, record: &Record) -> CoreResult<()> {
        for field in meta.structural_fields() {
            let Some(child_doctype) = field.child_doctype() else {
                continue;
            };
            let child = self.registry.get_meta(child_doctype)?;
            for (i, row) in record.rows(&field.fieldname).iter().enumerate() {
                let row = linked_row(row, parent, meta.name(), &field.fieldname, i);
                self.insert_one(&child, &row)?;
            }
        }
        Ok(())
    }

    /// Upserts the child rows of `record` by name and deletes the other
    /// rows of each structural field it carries.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement.
    pub fn update_children(&self, meta: &Meta, parent: &str, record: &Record) -> CoreResult<()> {
        for field in meta.structural_fields() {
            let Some(child_doctype) = field.child_doctype() else {
                continue;
            };
            let Some(rows) = record.children.get(&field.fieldname) else {
                continue;
            };
            let child = self.registry.get_meta(child_doctype)?;
            let mut keep = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let row = linked_row(row, parent, meta.name(), &field.fieldname, i);
                let name = record_name(&child, &row)?;
                if self.row_exists(child.base_doctype(), &name)? {
                    self.update_one(&child, &row)?;
                } else {
                    self.insert_one(&child, &row)?;
                }
                keep.push(Value::from(name));
            }

            let mut sql = format!(
                "DELETE FROM {} WHERE parent = ? AND parenttype = ? AND parentfield = ?",
                quoted(child.base_doctype())
            );
            let mut params = vec![
                Value::from(parent),
                Value::from(meta.name()),
                Value::from(field.fieldname.as_str()),
            ];
            if !keep.is_empty() {
                sql.push_str(&format!(" AND name NOT IN ({})", vec!["?"; keep.len()].join(", ")));
                params.extend(keep);
            }
            self.backend.execute(&sql, &params)?;
        }
        Ok(())
    }

    /// Replaces the stored values of a single doctype: every prior row is
    /// cleared, then the non-null values are written.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidValue` for a value that does not fit its
    /// column.
    pub fn update_single(&self, meta: &Meta, values: &Row) -> CoreResult<()> {
        let values = column_values(meta, values)?;
        self.backend.execute(
            &format!("DELETE FROM {SINGLE_VALUE} WHERE parent = ?"),
            &[Value::from(meta.name())],
        )?;
        for (fieldname, value) in values {
            self.insert_single_value(meta, fieldname, &value)?;
        }
        Ok(())
    }

    /// Replaces only the listed fields of a single doctype.
    fn set_single_values(&self, meta: &Meta, values: &Row) -> CoreResult<()> {
        for (fieldname, value) in column_values(meta, values)? {
            self.backend.execute(
                &format!("DELETE FROM {SINGLE_VALUE} WHERE parent = ? AND fieldname = ?"),
                &[Value::from(meta.name()), Value::from(fieldname.as_str())],
            )?;
            self.insert_single_value(meta, fieldname, &value)?;
        }
        Ok(())
    }

    fn insert_single_value(&self, meta: &Meta, fieldname: String, value: &Value) -> CoreResult<()> {
        if fieldname == standard::NAME || value.is_null() {
            return Ok(());
        }
        self.backend.execute(
            &format!("INSERT INTO {SINGLE_VALUE} (name, parent, fieldname, value) VALUES (?, ?, ?, ?)"),
            &[
                Value::from(random_name()),
                Value::from(meta.name()),
                Value::from(fieldname),
                Value::from(value.to_text()),
            ],
        )?;
        Ok(())
    }

    /// Updates one field of one record.
    ///
    /// # Errors
    ///
    /// As [`Database::set_values`].
    pub fn set_value(
        &self,
        doctype: &str,
        name: &str,
        fieldname: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let mut values = Row::new();
        values.insert(fieldname.to_string(), value.into());
        self.set_values(doctype, name, &values)
    }

    /// Updates several fields of one record without loading it.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidField` for a field that is not a column
    /// (or is `name`) and `CoreError::NotFound` for a missing record.
    pub fn set_values(&self, doctype: &str, name: &str, values: &Row) -> CoreResult<()> {
        let meta = self.registry.get_meta(doctype)?;
        for fieldname in values.keys() {
            if fieldname == standard::NAME || meta.column_type(fieldname).is_none() {
                return Err(CoreError::invalid_field(doctype, fieldname.as_str()));
            }
        }
        self.transaction(|| {
            let name = if meta.is_single() {
                self.set_single_values(&meta, values)?;
                meta.name().to_string()
            } else {
                if !self.exists(doctype, name)? {
                    return Err(CoreError::not_found(doctype, name));
                }
                let mut row = values.clone();
                row.insert(standard::NAME.to_string(), Value::from(name));
                self.update_one(&meta, &row)?;
                name.to_string()
            };
            self.trigger_change(&meta, &name, ChangeType::Update, None)
        })
    }

    /// Deletes a record and its child rows.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for a missing record and
    /// `CoreError::Database` when other records still link to it.
    pub fn delete(&self, doctype: &str, name: &str) -> CoreResult<()> {
        let meta = self.registry.get_meta(doctype)?;
        self.transaction(|| {
            let name = if meta.is_single() {
                self.backend.execute(
                    &format!("DELETE FROM {SINGLE_VALUE} WHERE parent = ?"),
                    &[Value::from(meta.name())],
                )?;
                meta.name()
            } else {
                if !self.exists(doctype, name)? {
                    return Err(CoreError::not_found(doctype, name));
                }
                self.backend.execute(
                    &format!("DELETE FROM {} WHERE name = ?", quoted(meta.base_doctype())),
                    &[Value::from(name)],
                )?;
                name
            };
            self.delete_children(&meta, name)?;
            self.trigger_change(&meta, name, ChangeType::Delete, None)
        })
    }

    /// Deletes several records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns the first failure; nothing is deleted then.
    pub fn delete_many(&self, doctype: &str, names: &[String]) -> CoreResult<usize> {
        self.transaction(|| {
            for name in names {
                self.delete(doctype, name)?;
            }
            Ok(names.len())
        })
    }

    /// Deletes the records of a doctype matching `filters`.
    ///
    /// # Errors
    ///
    /// As [`Database::delete_many`].
    pub fn delete_where(&self, doctype: &str, filters: &Filters) -> CoreResult<usize> {
        let names = self.names(doctype, filters)?;
        self.delete_many(doctype, &names)
    }

    fn delete_children(&self, meta: &Meta, parent: &str) -> CoreResult<()> {
        for field in meta.structural_fields() {
            let Some(child_doctype) = field.child_doctype() else {
                continue;
            };
            let child = self.registry.get_meta(child_doctype)?;
            self.backend.execute(
                &format!(
                    "DELETE FROM {} WHERE parent = ? AND parenttype = ? AND parentfield = ?",
                    quoted(child.base_doctype())
                ),
                &[
                    Value::from(parent),
                    Value::from(meta.name()),
                    Value::from(field.fieldname.as_str()),
                ],
            )?;
        }
        Ok(())
    }

    /// Renames a record. Links to it follow through `ON UPDATE CASCADE`;
    /// child rows are re-pointed at the new name.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for a missing record,
    /// `CoreError::Validation` when the new name is taken and
    /// `CoreError::InvalidValue` for singles or an empty name.
    pub fn rename(&self, doctype: &str, old_name: &str, new_name: &str) -> CoreResult<Record> {
        let meta = self.table_meta(doctype)?;
        if new_name.trim().is_empty() {
            return Err(CoreError::invalid_value("New name cannot be empty"));
        }
        self.transaction(|| {
            if !self.exists(doctype, old_name)? {
                return Err(CoreError::not_found(doctype, old_name));
            }
            if self.row_exists(meta.base_doctype(), new_name)? {
                return Err(CoreError::duplicate(doctype, new_name));
            }
            self.backend.execute(
                &format!("UPDATE {} SET name = ? WHERE name = ?", quoted(meta.base_doctype())),
                &[Value::from(new_name), Value::from(old_name)],
            )?;
            for field in meta.structural_fields() {
                let Some(child_doctype) = field.child_doctype() else {
                    continue;
                };
                let child = self.registry.get_meta(child_doctype)?;
                self.backend.execute(
                    &format!(
                        "UPDATE {} SET parent = ? WHERE parent = ? AND parenttype = ?",
                        quoted(child.base_doctype())
                    ),
                    &[Value::from(new_name), Value::from(old_name), Value::from(meta.name())],
                )?;
            }
            self.trigger_change(&meta, new_name, ChangeType::Rename, Some(old_name))?;
            self.get(doctype, new_name)
        })
    }

    /// Whether `table` has a row named `name`, ignoring fixed filters.
    fn row_exists(&self, table: &str, name: &str) -> CoreResult<bool> {
        let rows = self.backend.query(
            &format!("SELECT name FROM {} WHERE name = ?", quoted(table)),
            &[Value::from(name)],
        )?;
        Ok(!rows.is_empty())
    }
}

fn apply_fixed(meta: &Meta, values: &mut Row) {
    for (fieldname, value) in meta.filters() {
        values.insert(fieldname.clone(), value.clone());
    }
}

fn record_name(meta: &Meta, values: &Row) -> CoreResult<String> {
    match values.get(standard::NAME).and_then(Value::as_str) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(CoreError::invalid_value(format!(
            "{} record has no name",
            meta.name()
        ))),
    }
}

/// `(column, cast value)` for every column of `meta` present in `values`.
fn column_values(meta: &Meta, values: &Row) -> CoreResult<Vec<(String, Value)>> {
    let mut out = Vec::new();
    for (fieldname, column) in meta.columns() {
        let Some(value) = values.get(fieldname) else {
            continue;
        };
        let value = column.cast(value.clone()).map_err(|text| {
            CoreError::invalid_value(format!(
                "Invalid value \"{text}\" for \"{}\"",
                meta.label_of(fieldname)
            ))
        })?;
        out.push((fieldname.to_string(), value));
    }
    Ok(out)
}

/// A child row pointed at its parent, with a name and a 1-based `idx`.
fn linked_row(row: &Row, parent: &str, parenttype: &str, parentfield: &str, i: usize) -> Row {
    let mut row = row.clone();
    row.insert("parent".into(), Value::from(parent));
    row.insert("parenttype".into(), Value::from(parenttype));
    row.insert("parentfield".into(), Value::from(parentfield));
    if row.get("idx").map_or(true, Value::is_null) {
        row.insert("idx".into(), Value::Int(i as i64 + 1));
    }
    if row.get(standard::NAME).map_or(true, Value::is_empty) {
        row.insert(standard::NAME.into(), Value::from(random_name()));
    }
    row
}
