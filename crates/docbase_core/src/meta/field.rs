//! Field definitions.

use super::fieldtype::FieldType;
use crate::document::Document;
use docbase_storage::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Computes a field from its record and, for child rows, the owning record.
pub type Formula = Arc<dyn Fn(&Document, Option<&Document>) -> Value + Send + Sync>;

/// Computes a default value for a freshly constructed record.
pub type DefaultFn = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

/// Validates a non-empty value; `Err` carries the user-facing message.
pub type ValidatorFn = Arc<dyn Fn(&Value, &Document) -> Result<(), String> + Send + Sync>;

/// Declarative description of one field.
///
/// This is plain data: it deserializes from JSON/TOML definitions and from
/// stored `DocField` rows. Behaviour (formulas, computed defaults,
/// validators) is attached by name through the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldDefinition {
    /// Column / key name, unique within the entity.
    pub fieldname: String,
    /// Field kind.
    pub fieldtype: FieldType,
    /// Human readable label; falls back to the fieldname.
    pub label: Option<String>,
    /// Value must be non-empty on save.
    pub required: bool,
    /// Not editable by users; formulas always recompute read-only fields.
    pub read_only: bool,
    /// Hidden from default listings.
    pub hidden: bool,
    /// Literal default, also used as the column default.
    pub default: Option<Value>,
    /// Newline separated choices for `Select`; child entity for
    /// `Table`/`Form`; target entity for `Link`.
    pub options: Option<String>,
    /// Child entity for `Table`/`Form` (preferred over `options`).
    pub childtype: Option<String>,
    /// Target entity for `Link` (preferred over `options`).
    pub target: Option<String>,
    /// Digits after the decimal point for float kinds.
    pub precision: Option<u32>,
    /// Create a secondary index on the column.
    pub indexed: bool,
    /// Create a unique index on the column.
    pub unique: bool,
    /// Fields whose change triggers recomputation of this field's formula.
    pub formula_depends_on: Vec<String>,
    /// Name of a registered validator.
    pub validator: Option<String>,
}

impl FieldDefinition {
    /// Creates a field of the given kind.
    pub fn new(fieldname: impl Into<String>, fieldtype: FieldType) -> Self {
        Self {
            fieldname: fieldname.into(),
            fieldtype,
            ..Self::default()
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Marks the field mandatory.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Hides the field from default listings.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Sets a literal default.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets `options` (select choices or child/target entity).
    #[must_use]
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Sets the child entity of a structural field.
    #[must_use]
    pub fn childtype(mut self, doctype: impl Into<String>) -> Self {
        self.childtype = Some(doctype.into());
        self
    }

    /// Sets the target entity of a link.
    #[must_use]
    pub fn target(mut self, doctype: impl Into<String>) -> Self {
        self.target = Some(doctype.into());
        self
    }

    /// Sets the float precision.
    #[must_use]
    pub fn precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    /// Requests a secondary index.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Requests a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the fields this field's formula depends on.
    #[must_use]
    pub fn depends_on<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.formula_depends_on = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Attaches a registered validator by name.
    #[must_use]
    pub fn validator(mut self, name: impl Into<String>) -> Self {
        self.validator = Some(name.into());
        self
    }

    /// Label, or the fieldname when no label is set.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.fieldname)
    }

    /// Child entity of a `Table`/`Form` field.
    #[must_use]
    pub fn child_doctype(&self) -> Option<&str> {
        if !self.fieldtype.is_structural() {
            return None;
        }
        self.childtype.as_deref().or(self.options.as_deref())
    }

    /// Target entity of a `Link` field.
    #[must_use]
    pub fn link_target(&self) -> Option<&str> {
        if self.fieldtype != FieldType::Link {
            return None;
        }
        self.target
            .as_deref()
            .or(self.options.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Choices of a `Select` field.
    #[must_use]
    pub fn select_options(&self) -> Vec<&str> {
        self.options
            .as_deref()
            .map(|o| {
                o.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A field of a resolved [`Meta`](super::Meta): its definition plus the
/// functions the registry attached to it.
#[derive(Clone)]
pub struct Field {
    definition: FieldDefinition,
    pub(crate) formula: Option<Formula>,
    pub(crate) default_fn: Option<DefaultFn>,
    pub(crate) validator_fn: Option<ValidatorFn>,
}

impl Field {
    pub(crate) fn new(definition: FieldDefinition) -> Self {
        Self {
            definition,
            formula: None,
            default_fn: None,
            validator_fn: None,
        }
    }

    /// The declarative part.
    #[must_use]
    pub fn definition(&self) -> &FieldDefinition {
        &self.definition
    }

    /// The formula, if one is registered.
    #[must_use]
    pub fn formula(&self) -> Option<&Formula> {
        self.formula.as_ref()
    }

    /// Whether a formula is registered.
    #[must_use]
    pub fn has_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// The computed default, if one is registered.
    #[must_use]
    pub fn default_fn(&self) -> Option<&DefaultFn> {
        self.default_fn.as_ref()
    }

    /// The validator, if one is attached.
    #[must_use]
    pub fn validator_fn(&self) -> Option<&ValidatorFn> {
        self.validator_fn.as_ref()
    }
}

impl Deref for Field {
    type Target = FieldDefinition;

    fn deref(&self) -> &Self::Target {
        &self.definition
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("fieldname", &self.definition.fieldname)
            .field("fieldtype", &self.definition.fieldtype)
            .field("formula", &self.formula.is_some())
            .field("default_fn", &self.default_fn.is_some())
            .field("validator", &self.definition.validator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let field = FieldDefinition::new("status", FieldType::Select)
            .label("Status")
            .required()
            .options("Open\nClosed\n")
            .default_value("Open");

        assert!(field.required);
        assert_eq!(field.display_label(), "Status");
        assert_eq!(field.select_options(), vec!["Open", "Closed"]);
        assert_eq!(field.default, Some(Value::from("Open")));
    }

    #[test]
    fn structural_and_link_targets() {
        let table = FieldDefinition::new("items", FieldType::Table).options("InvoiceItem");
        assert_eq!(table.child_doctype(), Some("InvoiceItem"));

        let link = FieldDefinition::new("customer", FieldType::Link).target("Customer");
        assert_eq!(link.link_target(), Some("Customer"));
        assert_eq!(link.child_doctype(), None);

        let plain = FieldDefinition::new("title", FieldType::Data).options("ignored");
        assert_eq!(plain.link_target(), None);
        assert_eq!(plain.display_label(), "title");
    }

    #[test]
    fn deserializes_with_defaults() {
        let field: FieldDefinition = serde_json::from_str(
            r#"{"fieldname": "qty", "fieldtype": "Int", "required": true, "default": 1}"#,
        )
        .unwrap();
        assert_eq!(field.fieldtype, FieldType::Int);
        assert_eq!(field.default, Some(Value::Int(1)));
        assert!(!field.unique);
        assert!(field.formula_depends_on.is_empty());
    }
}
