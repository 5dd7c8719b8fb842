//! Table layout derived from metadata.

use crate::error::CoreResult;
use crate::meta::{standard, ColumnType, Meta, MetaRegistry};
use docbase_storage::Value;
use std::sync::Arc;

/// Key/value table holding the fields of single doctypes.
pub const SINGLE_VALUE: &str = "SingleValue";

pub(crate) const SINGLE_VALUE_DDL: &str = "CREATE TABLE IF NOT EXISTS SingleValue (\
     name TEXT PRIMARY KEY NOT NULL, \
     parent TEXT NOT NULL, \
     fieldname TEXT NOT NULL, \
     value TEXT)";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    pub default: Option<String>,
}

impl ColumnSpec {
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.as_sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY NOT NULL");
        } else if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }

    /// `ALTER TABLE .. ADD COLUMN` and table copies cannot fill a
    /// `NOT NULL` column without a default.
    pub fn addable(&self) -> Self {
        Self {
            not_null: self.not_null && self.default.is_some(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ForeignKeySpec {
    pub column: String,
    pub table: String,
}

impl ForeignKeySpec {
    pub fn to_sql(&self) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {}(name) ON UPDATE CASCADE ON DELETE RESTRICT",
            self.column,
            quoted(&self.table)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexSpec {
    pub name: String,
    pub column: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn to_sql(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            quoted(table),
            self.column
        )
    }
}

/// The full target layout of one table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableSpec {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Layout of `table` as the union of the metas stored in it.
    ///
    /// Only the meta that owns the table (the one named like it) puts
    /// `NOT NULL` on its required columns; views through `based_on` share
    /// rows that never set their fields.
    pub fn build(registry: &MetaRegistry, table: &str, metas: &[Arc<Meta>]) -> CoreResult<Self> {
        let mut spec = Self {
            table: table.to_string(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        };
        for meta in metas {
            let owner = meta.name() == table;
            for (fieldname, column_type) in meta.columns() {
                if spec.columns.iter().any(|c| c.name == fieldname) {
                    continue;
                }
                let Some(field) = meta.get_field(fieldname) else {
                    continue;
                };
                let primary_key = fieldname == standard::NAME;
                spec.columns.push(ColumnSpec {
                    name: fieldname.to_string(),
                    column_type,
                    primary_key,
                    not_null: owner && field.required && !primary_key,
                    default: field.default.as_ref().and_then(sql_literal),
                });

                if let Some(target) = field.link_target() {
                    let target_meta = registry.get_meta(target)?;
                    if !target_meta.is_single() {
                        spec.foreign_keys.push(ForeignKeySpec {
                            column: fieldname.to_string(),
                            table: target_meta.base_doctype().to_string(),
                        });
                    }
                }
                if field.indexed || field.unique {
                    spec.indexes.push(IndexSpec {
                        name: format!("idx_{table}_{fieldname}"),
                        column: fieldname.to_string(),
                        unique: field.unique,
                    });
                }
            }
        }
        Ok(spec)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `CREATE TABLE` statement under another name.
    pub fn create_sql(&self, name: &str) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnSpec::to_sql).collect();
        parts.extend(self.foreign_keys.iter().map(ForeignKeySpec::to_sql));
        format!("CREATE TABLE {} ({})", quoted(name), parts.join(", "))
    }
}

/// Quotes a table name; doctype names may collide with SQL keywords.
pub(crate) fn quoted(table: &str) -> String {
    format!("\"{}\"", table.replace('"', "\"\""))
}

/// Renders a literal default for DDL; text is single-quoted.
pub(crate) fn sql_literal(value: &Value) -> Option<String> {
    match value {
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) if f.is_finite() => Some(f.to_string()),
        Value::Text(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        _ => None,
    }
}
