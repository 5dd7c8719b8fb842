//! Structured filters and their SQL translation.
//!
//! A filter maps a fieldname either to a literal (equality) or to a
//! sequence of operator/operand pairs that combine with `AND`:
//!
//! ```rust
//! use docbase_core::database::Filters;
//! use docbase_core::Value;
//! use serde_json::json;
//!
//! let filters = Filters::from_json(&json!({
//!     "status": "Open",
//!     "age": [">=", 18, "<=", 65],
//! }))
//! .unwrap();
//! let condition = filters.to_sql().unwrap();
//! assert_eq!(condition.sql, "status = ? AND age >= ? AND age <= ?");
//! assert_eq!(condition.params, vec![Value::from("Open"), Value::Int(18), Value::Int(65)]);
//! ```
//!
//! Every operand is bound as a parameter; fieldnames must be plain
//! identifiers.

use crate::error::{CoreError, CoreResult};
use crate::util::is_identifier;
use docbase_storage::Value;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    /// `is set` / `is not set`.
    Is,
}

impl Op {
    /// SQL spelling of the operator.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Between => "BETWEEN",
            Self::Is => "IS",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for Op {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "=" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "like" => Self::Like,
            "not like" => Self::NotLike,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "between" => Self::Between,
            "is" => Self::Is,
            _ => return Err(CoreError::invalid_filter(format!("unknown operator \"{s}\""))),
        })
    }
}

/// The condition on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// `field = value`; `Null` means `IS NULL`, a list means `IN`.
    Eq(Value),
    /// Operator/operand pairs joined with `AND`.
    Ops(Vec<(Op, Value)>),
}

/// A WHERE clause body with its bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    /// Conditions joined with `AND`; empty when there are none.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

impl Condition {
    /// Returns `" WHERE ..."` or an empty string.
    #[must_use]
    pub fn where_clause(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

/// Ordered field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    entries: IndexMap<String, FilterValue>,
}

impl Filters {
    /// No conditions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an equality condition.
    #[must_use]
    pub fn eq(mut self, fieldname: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .insert(fieldname.into(), FilterValue::Eq(value.into()));
        self
    }

    /// Adds an operator condition; several on one field combine with `AND`.
    #[must_use]
    pub fn op(mut self, fieldname: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.push(fieldname.into(), op, value.into());
        self
    }

    fn push(&mut self, fieldname: String, op: Op, value: Value) {
        let entry = self
            .entries
            .entry(fieldname)
            .or_insert_with(|| FilterValue::Ops(Vec::new()));
        if let FilterValue::Eq(existing) = entry {
            let existing = std::mem::take(existing);
            *entry = FilterValue::Ops(vec![(Op::Eq, existing)]);
        }
        if let FilterValue::Ops(ops) = entry {
            ops.push((op, value));
        }
    }

    /// Sets a condition, replacing any existing one on the field.
    pub fn insert(&mut self, fieldname: impl Into<String>, condition: FilterValue) {
        self.entries.insert(fieldname.into(), condition);
    }

    /// Adds a doctype's fixed `field = value` constraints, which win over
    /// conditions on the same fields.
    pub fn apply_fixed(&mut self, fixed: &IndexMap<String, Value>) {
        for (fieldname, value) in fixed {
            self.entries
                .insert(fieldname.clone(), FilterValue::Eq(value.clone()));
        }
    }

    /// Condition on a field.
    #[must_use]
    pub fn get(&self, fieldname: &str) -> Option<&FilterValue> {
        self.entries.get(fieldname)
    }

    /// Whether there are no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of constrained fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Constrained fields in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Parses a JSON filter.
    ///
    /// Accepts an object (`{"field": literal}` or `{"field": [op, operand,
    /// ...]}`), a list of `[field, op, operand]` triples, or `null`. A list
    /// value whose first element is not an operator is an `in` list.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidFilter` for anything else.
    pub fn from_json(json: &JsonValue) -> CoreResult<Self> {
        let mut filters = Self::new();
        match json {
            JsonValue::Null => {}
            JsonValue::Object(object) => {
                for (fieldname, value) in object {
                    filters.add_json(fieldname, value)?;
                }
            }
            JsonValue::Array(triples) => {
                for triple in triples {
                    match triple.as_array().map(Vec::as_slice) {
                        Some([JsonValue::String(field), JsonValue::String(op), operand]) => {
                            let op: Op = op.parse()?;
                            filters.push(field.clone(), op, Value::from_json(operand));
                        }
                        _ => {
                            return Err(CoreError::invalid_filter(format!(
                                "expected [field, operator, value], got {triple}"
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(CoreError::invalid_filter(format!(
                    "filters must be an object, got {other}"
                )))
            }
        }
        Ok(filters)
    }

    fn add_json(&mut self, fieldname: &str, value: &JsonValue) -> CoreResult<()> {
        match value {
            JsonValue::Object(_) => Err(CoreError::invalid_filter(format!(
                "\"{fieldname}\": objects are not valid operands"
            ))),
            JsonValue::Array(items) => {
                let starts_with_op = matches!(
                    items.first(),
                    Some(JsonValue::String(first)) if first.parse::<Op>().is_ok()
                );
                if !starts_with_op {
                    self.entries.insert(
                        fieldname.to_string(),
                        FilterValue::Eq(Value::from_json(value)),
                    );
                    return Ok(());
                }
                if items.len() % 2 != 0 {
                    return Err(CoreError::invalid_filter(format!(
                        "\"{fieldname}\": operator without operand"
                    )));
                }
                for pair in items.chunks(2) {
                    let op = match &pair[0] {
                        JsonValue::String(op) => op.parse()?,
                        other => {
                            return Err(CoreError::invalid_filter(format!(
                                "\"{fieldname}\": expected an operator, got {other}"
                            )))
                        }
                    };
                    self.push(fieldname.to_string(), op, Value::from_json(&pair[1]));
                }
                Ok(())
            }
            scalar => {
                self.entries
                    .insert(fieldname.to_string(), FilterValue::Eq(Value::from_json(scalar)));
                Ok(())
            }
        }
    }

    /// Translates the filters into a condition with bound parameters.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidFilter` for a fieldname that is not an
    /// identifier or an operand of the wrong shape.
    pub fn to_sql(&self) -> CoreResult<Condition> {
        let mut parts = Vec::new();
        let mut params = Vec::new();
        for (fieldname, condition) in &self.entries {
            if !is_identifier(fieldname) {
                return Err(CoreError::invalid_filter(format!(
                    "invalid field name \"{fieldname}\""
                )));
            }
            match condition {
                FilterValue::Eq(Value::Null) => parts.push(format!("{fieldname} IS NULL")),
                FilterValue::Eq(list @ Value::List(_)) => {
                    parts.push(render(fieldname, Op::In, list, &mut params)?);
                }
                FilterValue::Eq(value) => {
                    parts.push(format!("{fieldname} = ?"));
                    params.push(value.clone());
                }
                FilterValue::Ops(ops) => {
                    for (op, operand) in ops {
                        parts.push(render(fieldname, *op, operand, &mut params)?);
                    }
                }
            }
        }
        Ok(Condition {
            sql: parts.join(" AND "),
            params,
        })
    }
}

fn render(fieldname: &str, op: Op, operand: &Value, params: &mut Vec<Value>) -> CoreResult<String> {
    match op {
        Op::In | Op::NotIn => {
            let items = match operand {
                Value::List(items) => items.clone(),
                Value::Text(text) => text
                    .split(',')
                    .map(|item| Value::from(item.trim()))
                    .filter(|item| !item.is_empty())
                    .collect(),
                other => vec![other.clone()],
            };
            if items.is_empty() {
                return Ok(if op == Op::In { "1 = 0" } else { "1 = 1" }.to_string());
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            params.extend(items);
            Ok(format!("{fieldname} {op} ({placeholders})"))
        }
        Op::Between => match operand.as_list() {
            Some([low, high]) => {
                params.push(low.clone());
                params.push(high.clone());
                Ok(format!("{fieldname} BETWEEN ? AND ?"))
            }
            _ => Err(CoreError::invalid_filter(format!(
                "\"{fieldname}\": between expects two values"
            ))),
        },
        Op::Is => match operand.to_text().trim().to_ascii_lowercase().as_str() {
            "set" => Ok(format!("({fieldname} IS NOT NULL AND {fieldname} != '')")),
            "not set" => Ok(format!("({fieldname} IS NULL OR {fieldname} = '')")),
            other => Err(CoreError::invalid_filter(format!(
                "\"{fieldname}\": is expects \"set\" or \"not set\", got \"{other}\""
            ))),
        },
        Op::Like | Op::NotLike => {
            let text = operand.to_text();
            let pattern = if text.contains('%') {
                text
            } else {
                format!("%{text}%")
            };
            params.push(Value::Text(pattern));
            Ok(format!("{fieldname} {op} ?"))
        }
        Op::Eq if operand.is_null() => Ok(format!("{fieldname} IS NULL")),
        Op::Ne if operand.is_null() => Ok(format!("{fieldname} IS NOT NULL")),
        _ => {
            if operand.as_list().is_some() {
                return Err(CoreError::invalid_filter(format!(
                    "\"{fieldname}\": {op} expects a single value"
                )));
            }
            params.push(operand.clone());
            Ok(format!("{fieldname} {op} ?"))
        }
    }
}
