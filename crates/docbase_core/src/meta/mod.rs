//! Metadata registry.
//!
//! Entity kinds ("doctypes") are described by [`MetaDefinition`]s. The
//! [`MetaRegistry`] validates them, merges `based_on` inheritance, adds the
//! implicit standard fields and attaches registered functions, producing an
//! immutable, shared [`Meta`] per doctype.
//!
//! ```rust
//! use docbase_core::meta::{FieldDefinition, FieldType, MetaDefinition, MetaRegistry, RegistrySettings};
//!
//! let registry = MetaRegistry::with_builtins(RegistrySettings::default());
//! registry
//!     .register(
//!         MetaDefinition::new("ToDo")
//!             .field(FieldDefinition::new("subject", FieldType::Data).required()),
//!     )
//!     .unwrap();
//!
//! let meta = registry.get_meta("ToDo").unwrap();
//! let valid: Vec<&str> = meta
//!     .valid_fields(false)
//!     .iter()
//!     .map(|f| f.fieldname.as_str())
//!     .collect();
//! assert_eq!(
//!     valid,
//!     ["name", "owner", "modified_by", "creation", "modified", "keywords", "subject"]
//! );
//! ```

mod builtin;
mod definition;
mod field;
mod fieldtype;
mod registry;
pub mod standard;

pub use builtin::{DOCFIELD, DOCTYPE, FIELDTYPE, NUMBER_SERIES, PATCH_RUN};
pub use definition::{MetaDefinition, Naming};
pub use field::{DefaultFn, Field, FieldDefinition, Formula, ValidatorFn};
pub use fieldtype::{ColumnType, FieldType, TypeMap};
pub use registry::{MetaRegistry, RegistrySettings};

use crate::document::Controller;
use docbase_storage::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// A resolved entity definition.
///
/// Built once by the [`MetaRegistry`] and shared behind an `Arc`; every
/// derived field set is computed at construction.
pub struct Meta {
    definition: MetaDefinition,
    fields: Vec<Field>,
    all: IndexMap<String, Field>,
    valid: Vec<String>,
    valid_with_children: Vec<String>,
    columns: IndexMap<String, ColumnType>,
    keyword_fields: Vec<String>,
    has_formula: bool,
    controller: Option<Arc<dyn Controller>>,
}

impl Meta {
    /// Assembles a meta from resolved parts.
    ///
    /// `fields` are the declared fields (with the identifier first when the
    /// entity has one), `implicit` the remaining standard fields.
    pub(crate) fn assemble(
        definition: MetaDefinition,
        fields: Vec<Field>,
        implicit: Vec<Field>,
        type_map: &TypeMap,
        has_formula: bool,
        controller: Option<Arc<dyn Controller>>,
    ) -> Self {
        let mut all = IndexMap::new();
        for field in implicit.iter().chain(fields.iter()) {
            all.insert(field.fieldname.clone(), field.clone());
        }

        fn push(list: &mut Vec<String>, name: &str) {
            if !list.iter().any(|existing| existing == name) {
                list.push(name.to_string());
            }
        }

        let mut valid: Vec<String> = Vec::new();
        if let Some(name) = fields.iter().find(|f| f.fieldname == standard::NAME) {
            push(&mut valid, &name.fieldname);
        }
        for field in &implicit {
            push(&mut valid, &field.fieldname);
        }
        for field in &fields {
            if type_map.column_type(&field.fieldtype).is_some() {
                push(&mut valid, &field.fieldname);
            }
        }
        let mut valid_with_children = valid.clone();
        for field in &fields {
            if field.fieldtype.is_structural() {
                push(&mut valid_with_children, &field.fieldname);
            }
        }

        let columns = valid
            .iter()
            .filter_map(|name| {
                let field = all.get(name)?;
                type_map
                    .column_type(&field.fieldtype)
                    .map(|column| (name.clone(), column))
            })
            .collect();

        let keyword_fields = if !definition.keyword_fields.is_empty() {
            definition.keyword_fields.clone()
        } else {
            let required: Vec<String> = fields
                .iter()
                .filter(|f| {
                    f.required && !f.fieldtype.is_structural() && f.fieldname != standard::NAME
                })
                .map(|f| f.fieldname.clone())
                .collect();
            if required.is_empty() {
                vec![standard::NAME.to_string()]
            } else {
                required
            }
        };

        Self {
            definition,
            fields,
            all,
            valid,
            valid_with_children,
            columns,
            keyword_fields,
            has_formula,
            controller,
        }
    }

    /// Entity kind identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Label, or the name when none is set.
    #[must_use]
    pub fn label(&self) -> &str {
        self.definition.label.as_deref().unwrap_or(&self.definition.name)
    }

    /// The merged definition this meta was built from.
    #[must_use]
    pub fn definition(&self) -> &MetaDefinition {
        &self.definition
    }

    /// Singleton entity.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.definition.is_single
    }

    /// Child entity.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.definition.is_child
    }

    /// Tree entity.
    #[must_use]
    pub fn is_tree(&self) -> bool {
        self.definition.is_tree
    }

    /// Submittable entity.
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        self.definition.is_submittable
    }

    /// The entity this one extends.
    #[must_use]
    pub fn based_on(&self) -> Option<&str> {
        self.definition.based_on.as_deref()
    }

    /// Entity whose table stores records of this one.
    #[must_use]
    pub fn base_doctype(&self) -> &str {
        self.based_on().unwrap_or(&self.definition.name)
    }

    /// Fixed field values applied to every query and write.
    #[must_use]
    pub fn filters(&self) -> &IndexMap<String, Value> {
        &self.definition.filters
    }

    /// Naming policy.
    #[must_use]
    pub fn naming(&self) -> &Naming {
        &self.definition.naming
    }

    /// Field used as the record title.
    #[must_use]
    pub fn title_field(&self) -> &str {
        self.definition
            .title_field
            .as_deref()
            .unwrap_or(standard::NAME)
    }

    /// Declared fields in declaration order, identifier first.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a declared or implicit field.
    #[must_use]
    pub fn get_field(&self, fieldname: &str) -> Option<&Field> {
        self.all.get(fieldname)
    }

    /// Returns true if the field exists.
    #[must_use]
    pub fn has_field(&self, fieldname: &str) -> bool {
        self.all.contains_key(fieldname)
    }

    /// Label of a field, or the fieldname.
    #[must_use]
    pub fn label_of<'a>(&'a self, fieldname: &'a str) -> &'a str {
        self.get_field(fieldname)
            .map_or(fieldname, |field| field.display_label())
    }

    /// Fieldnames backed by a column; with `with_children`, structural
    /// fields are appended.
    #[must_use]
    pub fn valid_fieldnames(&self, with_children: bool) -> &[String] {
        if with_children {
            &self.valid_with_children
        } else {
            &self.valid
        }
    }

    /// Fields backed by a column, see [`Meta::valid_fieldnames`].
    #[must_use]
    pub fn valid_fields(&self, with_children: bool) -> Vec<&Field> {
        self.valid_fieldnames(with_children)
            .iter()
            .filter_map(|name| self.all.get(name))
            .collect()
    }

    /// `Table` fields in declaration order.
    #[must_use]
    pub fn table_fields(&self) -> Vec<&Field> {
        self.fields
            .iter()
            .filter(|f| f.fieldtype == FieldType::Table)
            .collect()
    }

    /// `Form` fields in declaration order.
    #[must_use]
    pub fn form_fields(&self) -> Vec<&Field> {
        self.fields
            .iter()
            .filter(|f| f.fieldtype == FieldType::Form)
            .collect()
    }

    /// `Table` and `Form` fields in declaration order.
    #[must_use]
    pub fn structural_fields(&self) -> Vec<&Field> {
        self.fields
            .iter()
            .filter(|f| f.fieldtype.is_structural())
            .collect()
    }

    /// Fields with a registered formula.
    #[must_use]
    pub fn formula_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.has_formula()).collect()
    }

    /// Whether this entity or any entity below it has a formula.
    #[must_use]
    pub fn has_formula(&self) -> bool {
        self.has_formula
    }

    /// Fields concatenated into `keywords`.
    ///
    /// Falls back to the required scalar fields, then to `name`.
    #[must_use]
    pub fn keyword_fields(&self) -> &[String] {
        &self.keyword_fields
    }

    /// Column type of a valid field.
    #[must_use]
    pub fn column_type(&self, fieldname: &str) -> Option<ColumnType> {
        self.columns.get(fieldname).copied()
    }

    /// `(fieldname, column type)` of every column, in column order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, col)| (name.as_str(), *col))
    }

    /// The registered lifecycle controller.
    #[must_use]
    pub fn controller(&self) -> Option<&Arc<dyn Controller>> {
        self.controller.as_ref()
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meta")
            .field("name", &self.definition.name)
            .field("based_on", &self.definition.based_on)
            .field("valid", &self.valid_with_children)
            .field("has_formula", &self.has_formula)
            .field("controller", &self.controller.is_some())
            .finish()
    }
}
