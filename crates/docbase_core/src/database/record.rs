//! The exchange type between documents and storage.

use crate::meta::standard;
use docbase_storage::{Row, Value};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

static NULL: Value = Value::Null;

/// A stored record: scalar columns plus the child rows of each structural
/// field (a `Form` field holds at most one row).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// Column values, in valid-field order.
    pub values: Row,
    /// Child rows keyed by the structural field they belong to.
    pub children: IndexMap<String, Vec<Row>>,
}

impl Record {
    /// Creates a record without children.
    #[must_use]
    pub fn new(values: Row) -> Self {
        Self {
            values,
            children: IndexMap::new(),
        }
    }

    /// The `name` column, empty when absent.
    #[must_use]
    pub fn name(&self) -> &str {
        self.get(standard::NAME).as_str().unwrap_or("")
    }

    /// A column value, `Null` when absent.
    #[must_use]
    pub fn get(&self, fieldname: &str) -> &Value {
        self.values.get(fieldname).unwrap_or(&NULL)
    }

    /// Rows of a structural field.
    #[must_use]
    pub fn rows(&self, fieldname: &str) -> &[Row] {
        self.children.get(fieldname).map(Vec::as_slice).unwrap_or(&[])
    }

    /// JSON object with child rows nested under their field.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut object = row_to_json(&self.values);
        for (fieldname, rows) in &self.children {
            object.insert(
                fieldname.clone(),
                JsonValue::Array(rows.iter().map(|row| JsonValue::Object(row_to_json(row))).collect()),
            );
        }
        JsonValue::Object(object)
    }
}

/// Converts a row into a JSON object.
#[must_use]
pub fn row_to_json(row: &Row) -> Map<String, JsonValue> {
    row.iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_and_json() {
        let mut values = Row::new();
        values.insert("name".into(), Value::from("T-1"));
        values.insert("qty".into(), Value::Int(2));
        let mut record = Record::new(values);
        let mut row = Row::new();
        row.insert("name".into(), Value::from("r1"));
        record.children.insert("items".into(), vec![row]);

        assert_eq!(record.name(), "T-1");
        assert_eq!(record.get("missing"), &Value::Null);
        assert_eq!(record.rows("items").len(), 1);
        assert!(record.rows("other").is_empty());
        assert_eq!(
            record.to_json(),
            serde_json::json!({"name": "T-1", "qty": 2, "items": [{"name": "r1"}]})
        );
    }
}
