//! Entity definitions as declared by applications or stored as `DocType` rows.

use super::field::FieldDefinition;
use super::fieldtype::FieldType;
use crate::database::Record;
use crate::error::{CoreError, CoreResult};
use docbase_storage::{Row, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// How new records of an entity get their identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Naming {
    /// Keep a caller-supplied name, else a random 10-character token.
    #[default]
    Random,
    /// Last identifier plus one, zero-padded to 9 digits.
    Autoincrement,
    /// `PREFIX` followed by a persisted running counter.
    Series(String),
}

impl fmt::Display for Naming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::Autoincrement => f.write_str("autoincrement"),
            Self::Series(prefix) => write!(f, "series:{prefix}"),
        }
    }
}

impl FromStr for Naming {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" | "random" => Ok(Self::Random),
            "autoincrement" => Ok(Self::Autoincrement),
            _ => match s.strip_prefix("series:") {
                Some(prefix) if !prefix.is_empty() => Ok(Self::Series(prefix.to_string())),
                _ => Err(CoreError::schema(format!("unknown naming policy \"{s}\""))),
            },
        }
    }
}

impl Serialize for Naming {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Naming {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Declarative description of an entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaDefinition {
    /// Entity kind identifier.
    pub name: String,
    /// Human readable label.
    pub label: Option<String>,
    /// Free text description.
    pub description: Option<String>,
    /// Declared fields in order.
    pub fields: Vec<FieldDefinition>,
    /// Exactly one record, stored in `SingleValue`.
    pub is_single: bool,
    /// Only exists under a parent's `Table`/`Form` field.
    pub is_child: bool,
    /// Nested-set tree entity (`lft`/`rgt`).
    pub is_tree: bool,
    /// Carries a `submitted` flag with submit/revert hooks.
    pub is_submittable: bool,
    /// Entity whose table and fields this one extends.
    pub based_on: Option<String>,
    /// Fixed field values applied to every query and write.
    pub filters: IndexMap<String, Value>,
    /// Fields concatenated into the `keywords` column.
    pub keyword_fields: Vec<String>,
    /// Naming policy.
    pub naming: Naming,
    /// Field shown as the record title.
    pub title_field: Option<String>,
}

impl MetaDefinition {
    /// Creates an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Marks the entity as a singleton.
    #[must_use]
    pub fn single(mut self) -> Self {
        self.is_single = true;
        self
    }

    /// Marks the entity as a child entity.
    #[must_use]
    pub fn child(mut self) -> Self {
        self.is_child = true;
        self
    }

    /// Marks the entity as a tree.
    #[must_use]
    pub fn tree(mut self) -> Self {
        self.is_tree = true;
        self
    }

    /// Marks the entity as submittable.
    #[must_use]
    pub fn submittable(mut self) -> Self {
        self.is_submittable = true;
        self
    }

    /// Extends another entity.
    #[must_use]
    pub fn based_on(mut self, base: impl Into<String>) -> Self {
        self.based_on = Some(base.into());
        self
    }

    /// Adds a fixed filter.
    #[must_use]
    pub fn filter(mut self, fieldname: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(fieldname.into(), value.into());
        self
    }

    /// Sets the keyword fields.
    #[must_use]
    pub fn keyword_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keyword_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the naming policy.
    #[must_use]
    pub fn naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    /// Sets the title field.
    #[must_use]
    pub fn title_field(mut self, fieldname: impl Into<String>) -> Self {
        self.title_field = Some(fieldname.into());
        self
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn get_field(&self, fieldname: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.fieldname == fieldname)
    }

    /// Merges `derived` over this (base) definition.
    ///
    /// Base fields keep their order; a field redeclared by `derived` takes
    /// every property it sets but may not change the fieldtype. Fields only
    /// `derived` declares are appended. Structural flags come from the base.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` if an inherited field changes fieldtype.
    pub fn merged_with(&self, derived: &MetaDefinition) -> CoreResult<MetaDefinition> {
        let mut fields = Vec::with_capacity(self.fields.len() + derived.fields.len());
        for base_field in &self.fields {
            match derived.get_field(&base_field.fieldname) {
                Some(over) => {
                    if over.fieldtype != base_field.fieldtype {
                        return Err(CoreError::schema(format!(
                            "{}: inherited field \"{}\" cannot change type from {} to {}",
                            derived.name, base_field.fieldname, base_field.fieldtype, over.fieldtype
                        )));
                    }
                    fields.push(overlay_field(base_field, over));
                }
                None => fields.push(base_field.clone()),
            }
        }
        for field in &derived.fields {
            if self.get_field(&field.fieldname).is_none() {
                fields.push(field.clone());
            }
        }

        Ok(MetaDefinition {
            name: derived.name.clone(),
            label: derived.label.clone().or_else(|| self.label.clone()),
            description: derived.description.clone().or_else(|| self.description.clone()),
            fields,
            is_single: self.is_single,
            is_child: self.is_child,
            is_tree: self.is_tree,
            is_submittable: self.is_submittable,
            based_on: Some(self.based_on.clone().unwrap_or_else(|| self.name.clone())),
            filters: if derived.filters.is_empty() {
                self.filters.clone()
            } else {
                derived.filters.clone()
            },
            keyword_fields: if derived.keyword_fields.is_empty() {
                self.keyword_fields.clone()
            } else {
                derived.keyword_fields.clone()
            },
            naming: if derived.naming == Naming::Random {
                self.naming.clone()
            } else {
                derived.naming.clone()
            },
            title_field: derived.title_field.clone().or_else(|| self.title_field.clone()),
        })
    }

    /// Builds a definition from a stored `DocType` record and its
    /// `fields` child rows.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Schema` if the naming policy or filters are malformed.
    pub fn from_record(record: &Record) -> CoreResult<Self> {
        let values = &record.values;
        let text = |key: &str| -> Option<String> {
            values
                .get(key)
                .map(Value::to_text)
                .filter(|s| !s.is_empty())
        };
        let flag = |key: &str| values.get(key).is_some_and(Value::as_bool);

        let filters = match text("filters") {
            Some(json) => {
                let parsed: IndexMap<String, Value> = serde_json::from_str(&json)
                    .map_err(|e| CoreError::schema(format!("invalid filters: {e}")))?;
                parsed
            }
            None => IndexMap::new(),
        };

        let fields = record
            .children
            .get("fields")
            .map(|rows| rows.iter().map(field_from_row).collect())
            .unwrap_or_default();

        Ok(Self {
            name: text("name").unwrap_or_default(),
            label: text("label"),
            description: text("description"),
            fields,
            is_single: flag("is_single"),
            is_child: flag("is_child"),
            is_tree: flag("is_tree"),
            is_submittable: flag("is_submittable"),
            based_on: text("based_on"),
            filters,
            keyword_fields: text("keyword_fields")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            naming: text("naming").unwrap_or_default().parse()?,
            title_field: text("title_field"),
        })
    }
}

fn overlay_field(base: &FieldDefinition, over: &FieldDefinition) -> FieldDefinition {
    FieldDefinition {
        fieldname: base.fieldname.clone(),
        fieldtype: base.fieldtype.clone(),
        label: over.label.clone().or_else(|| base.label.clone()),
        required: base.required || over.required,
        read_only: base.read_only || over.read_only,
        hidden: base.hidden || over.hidden,
        default: over.default.clone().or_else(|| base.default.clone()),
        options: over.options.clone().or_else(|| base.options.clone()),
        childtype: over.childtype.clone().or_else(|| base.childtype.clone()),
        target: over.target.clone().or_else(|| base.target.clone()),
        precision: over.precision.or(base.precision),
        indexed: base.indexed || over.indexed,
        unique: base.unique || over.unique,
        formula_depends_on: if over.formula_depends_on.is_empty() {
            base.formula_depends_on.clone()
        } else {
            over.formula_depends_on.clone()
        },
        validator: over.validator.clone().or_else(|| base.validator.clone()),
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn field_from_row(row: &Row) -> FieldDefinition {
    let text = |key: &str| -> Option<String> {
        row.get(key).map(Value::to_text).filter(|s| !s.is_empty())
    };
    let flag = |key: &str| row.get(key).is_some_and(Value::as_bool);

    FieldDefinition {
        fieldname: text("fieldname").unwrap_or_default(),
        fieldtype: text("fieldtype")
            .map(|s| FieldType::from(s.as_str()))
            .unwrap_or_default(),
        label: text("label"),
        required: flag("required"),
        read_only: flag("read_only"),
        hidden: flag("hidden"),
        default: row.get("default_value").filter(|v| !v.is_empty()).cloned(),
        options: text("options"),
        childtype: text("childtype"),
        target: text("target"),
        precision: row
            .get("precision")
            .and_then(Value::as_i64)
            .and_then(|p| u32::try_from(p).ok()),
        indexed: flag("indexed"),
        unique: flag("is_unique"),
        formula_depends_on: text("formula_depends_on")
            .map(|s| split_list(&s))
            .unwrap_or_default(),
        validator: text("validator"),
    }
}
