//! Record reads.

use super::filter::Filters;
use super::query::Query;
use super::record::Record;
use super::schema::{quoted, SINGLE_VALUE};
use super::Database;
use crate::error::{CoreError, CoreResult};
use crate::meta::{standard, FieldType, Meta};
use docbase_storage::{Row, Value};
use std::sync::Arc;

impl Database {
    /// Loads one record with its child rows.
    ///
    /// Singles are assembled from their `SingleValue` rows, each value cast
    /// back to its column type.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no such record exists.
    pub fn get(&self, doctype: &str, name: &str) -> CoreResult<Record> {
        let meta = self.registry.get_meta(doctype)?;
        let mut record = if meta.is_single() {
            self.get_single(&meta)?
        } else {
            let fields = meta.valid_fieldnames(false).join(", ");
            let filters = Filters::new().eq(standard::NAME, name);
            let (sql, params) = self.select(&meta, &fields, filters)?;
            let row = self
                .backend
                .query(&sql, &params)?
                .into_iter()
                .next()
                .ok_or_else(|| CoreError::not_found(doctype, name))?;
            Record::new(row)
        };
        let parent = record.name().to_string();
        self.load_children(&meta, &parent, &mut record)?;
        Ok(record)
    }

    fn get_single(&self, meta: &Meta) -> CoreResult<Record> {
        let rows = self.backend.query(
            &format!("SELECT fieldname, value FROM {SINGLE_VALUE} WHERE parent = ?"),
            &[Value::from(meta.name())],
        )?;
        let mut values = Row::new();
        values.insert(standard::NAME.to_string(), Value::from(meta.name()));
        for (fieldname, column) in meta.columns() {
            if fieldname == standard::NAME {
                continue;
            }
            let stored = rows
                .iter()
                .find(|row| row.get("fieldname").and_then(Value::as_str) == Some(fieldname))
                .and_then(|row| row.get("value").cloned())
                .unwrap_or(Value::Null);
            let value = column.cast(stored.clone()).unwrap_or(stored);
            values.insert(fieldname.to_string(), value);
        }
        Ok(Record::new(values))
    }

    fn load_children(&self, meta: &Meta, parent: &str, record: &mut Record) -> CoreResult<()> {
        for field in meta.structural_fields() {
            let Some(child_doctype) = field.child_doctype() else {
                continue;
            };
            let child = self.registry.get_meta(child_doctype)?;
            let sql = format!(
                "SELECT {} FROM {} WHERE parent = ? AND parenttype = ? AND parentfield = ? ORDER BY idx ASC",
                child.valid_fieldnames(false).join(", "),
                quoted(child.base_doctype())
            );
            let mut rows = self.backend.query(
                &sql,
                &[
                    Value::from(parent),
                    Value::from(meta.name()),
                    Value::from(field.fieldname.as_str()),
                ],
            )?;
            if field.fieldtype == FieldType::Form {
                rows.truncate(1);
            }
            record.children.insert(field.fieldname.clone(), rows);
        }
        Ok(())
    }

    /// Lists rows of a doctype.
    ///
    /// Without explicit fields the projection is `name` plus the keyword
    /// fields. The doctype's fixed filters always apply.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidFilter` for a malformed query and
    /// `CoreError::InvalidValue` for a single doctype.
    pub fn get_all(&self, doctype: &str, query: &Query) -> CoreResult<Vec<Row>> {
        let meta = self.table_meta(doctype)?;
        let (sql, params) =
            query.to_sql(&quoted(meta.base_doctype()), &default_fields(&meta), meta.filters())?;
        Ok(self.backend.query(&sql, &params)?)
    }

    /// The first row matching a query.
    ///
    /// # Errors
    ///
    /// As [`Database::get_all`].
    pub fn get_one(&self, doctype: &str, query: &Query) -> CoreResult<Option<Row>> {
        let query = query.clone().limit(1);
        Ok(self.get_all(doctype, &query)?.into_iter().next())
    }

    /// Whether a record exists. A single exists once any value was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the doctype is unknown or the query fails.
    pub fn exists(&self, doctype: &str, name: &str) -> CoreResult<bool> {
        let meta = self.registry.get_meta(doctype)?;
        if meta.is_single() {
            let rows = self.backend.query(
                &format!("SELECT name FROM {SINGLE_VALUE} WHERE parent = ? LIMIT 1"),
                &[Value::from(meta.name())],
            )?;
            return Ok(!rows.is_empty());
        }
        let filters = Filters::new().eq(standard::NAME, name);
        let (sql, params) = self.select(&meta, standard::NAME, filters)?;
        Ok(!self.backend.query(&sql, &params)?.is_empty())
    }

    /// One field of one record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for a missing record and
    /// `CoreError::InvalidField` for a field that is not a column.
    pub fn get_value(&self, doctype: &str, name: &str, fieldname: &str) -> CoreResult<Value> {
        let meta = self.registry.get_meta(doctype)?;
        if meta.column_type(fieldname).is_none() {
            return Err(CoreError::invalid_field(doctype, fieldname));
        }
        if meta.is_single() {
            return Ok(self.get_single(&meta)?.get(fieldname).clone());
        }
        let filters = Filters::new().eq(standard::NAME, name);
        let (sql, params) = self.select(&meta, fieldname, filters)?;
        self.backend
            .query(&sql, &params)?
            .into_iter()
            .next()
            .and_then(|mut row| row.shift_remove(fieldname))
            .ok_or_else(|| CoreError::not_found(doctype, name))
    }

    /// Number of rows matching `filters`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidFilter` for malformed filters.
    pub fn count(&self, doctype: &str, filters: &Filters) -> CoreResult<u64> {
        let meta = self.table_meta(doctype)?;
        let (sql, params) = self.select(&meta, "count(*) AS total", filters.clone())?;
        let total = self
            .backend
            .query(&sql, &params)?
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(total).unwrap_or(0))
    }

    /// Names of every record of a doctype, fixed filters applied.
    pub(crate) fn names(&self, doctype: &str, filters: &Filters) -> CoreResult<Vec<String>> {
        let meta = self.table_meta(doctype)?;
        let (sql, params) = self.select(&meta, standard::NAME, filters.clone())?;
        Ok(self
            .backend
            .query(&sql, &params)?
            .into_iter()
            .filter_map(|row| row.get(standard::NAME).and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// `SELECT <fields> FROM <base table> WHERE <filters + fixed filters>`.
    pub(crate) fn select(
        &self,
        meta: &Meta,
        fields: &str,
        mut filters: Filters,
    ) -> CoreResult<(String, Vec<Value>)> {
        filters.apply_fixed(meta.filters());
        let condition = filters.to_sql()?;
        Ok((
            format!(
                "SELECT {fields} FROM {}{}",
                quoted(meta.base_doctype()),
                condition.where_clause()
            ),
            condition.params,
        ))
    }

    pub(crate) fn table_meta(&self, doctype: &str) -> CoreResult<Arc<Meta>> {
        let meta = self.registry.get_meta(doctype)?;
        if meta.is_single() {
            return Err(CoreError::invalid_value(format!(
                "{doctype} is a single doctype and has no table"
            )));
        }
        Ok(meta)
    }
}

fn default_fields(meta: &Meta) -> Vec<String> {
    let mut fields = vec![standard::NAME.to_string()];
    for fieldname in meta.keyword_fields() {
        if !fields.contains(fieldname) && meta.column_type(fieldname).is_some() {
            fields.push(fieldname.clone());
        }
    }
    fields
}
