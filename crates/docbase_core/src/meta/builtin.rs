//! Entities every registry starts with.
//!
//! `DocType` and its `DocField` rows describe entities stored in the
//! database; `FieldType` lists the known field kinds so `DocField.fieldtype`
//! can reference them. `NumberSeries` backs series naming and `PatchRun`
//! records executed patches.

use super::definition::MetaDefinition;
use super::field::FieldDefinition;
use super::fieldtype::FieldType;
use crate::document::Document;
use crate::util::fieldname_from_label;
use docbase_storage::Value;

/// Stored entity definitions.
pub const DOCTYPE: &str = "DocType";
/// Field rows of a stored `DocType`.
pub const DOCFIELD: &str = "DocField";
/// Known field kinds.
pub const FIELDTYPE: &str = "FieldType";
/// Running counters of series naming.
pub const NUMBER_SERIES: &str = "NumberSeries";
/// Executed patches.
pub const PATCH_RUN: &str = "PatchRun";

pub(crate) fn definitions() -> Vec<MetaDefinition> {
    vec![fieldtype(), docfield(), doctype(), number_series(), patch_run()]
}

fn fieldtype() -> MetaDefinition {
    MetaDefinition::new(FIELDTYPE)
        .label("Field Type")
        .field(FieldDefinition::new("column_type", FieldType::Data).label("Column Type"))
        .keyword_fields(["name"])
}

fn doctype() -> MetaDefinition {
    MetaDefinition::new(DOCTYPE)
        .label("DocType")
        .field(FieldDefinition::new("label", FieldType::Data).label("Label"))
        .field(FieldDefinition::new("description", FieldType::Text).label("Description"))
        .field(FieldDefinition::new("is_single", FieldType::Check).label("Is Single").default_value(0))
        .field(FieldDefinition::new("is_child", FieldType::Check).label("Is Child").default_value(0))
        .field(FieldDefinition::new("is_tree", FieldType::Check).label("Is Tree").default_value(0))
        .field(
            FieldDefinition::new("is_submittable", FieldType::Check)
                .label("Is Submittable")
                .default_value(0),
        )
        .field(FieldDefinition::new("based_on", FieldType::Data).label("Based On"))
        .field(FieldDefinition::new("filters", FieldType::Code).label("Filters"))
        .field(FieldDefinition::new("keyword_fields", FieldType::SmallText).label("Keyword Fields"))
        .field(FieldDefinition::new("naming", FieldType::Data).label("Naming"))
        .field(FieldDefinition::new("title_field", FieldType::Data).label("Title Field"))
        .field(
            FieldDefinition::new("fields", FieldType::Table)
                .label("Fields")
                .childtype(DOCFIELD),
        )
        .keyword_fields(["name", "label"])
}

fn docfield() -> MetaDefinition {
    MetaDefinition::new(DOCFIELD)
        .label("Fields")
        .child()
        .field(FieldDefinition::new("label", FieldType::Data).label("Label").required())
        .field(
            FieldDefinition::new("fieldtype", FieldType::Link)
                .label("Type")
                .required()
                .target(FIELDTYPE)
                .default_value("Data"),
        )
        .field(
            FieldDefinition::new("fieldname", FieldType::Data)
                .label("Name")
                .required()
                .depends_on(["label"]),
        )
        .field(FieldDefinition::new("required", FieldType::Check).label("Required?").default_value(0))
        .field(FieldDefinition::new("read_only", FieldType::Check).label("Read Only").default_value(0))
        .field(FieldDefinition::new("hidden", FieldType::Check).label("Hidden").default_value(0))
        .field(FieldDefinition::new("default_value", FieldType::Data).label("Default"))
        .field(FieldDefinition::new("options", FieldType::SmallText).label("Options"))
        .field(FieldDefinition::new("target", FieldType::Data).label("Target"))
        .field(FieldDefinition::new("childtype", FieldType::Data).label("Child Type"))
        .field(FieldDefinition::new("precision", FieldType::Int).label("Precision"))
        .field(FieldDefinition::new("indexed", FieldType::Check).label("Indexed").default_value(0))
        .field(FieldDefinition::new("is_unique", FieldType::Check).label("Unique").default_value(0))
        .field(
            FieldDefinition::new("formula_depends_on", FieldType::SmallText)
                .label("Formula Depends On"),
        )
        .field(FieldDefinition::new("validator", FieldType::Data).label("Validator"))
        .keyword_fields(["label", "fieldtype", "fieldname"])
}

fn number_series() -> MetaDefinition {
    MetaDefinition::new(NUMBER_SERIES)
        .label("Number Series")
        .field(
            FieldDefinition::new("current_value", FieldType::Int)
                .label("Current")
                .required()
                .default_value(1000),
        )
        .keyword_fields(["name"])
}

fn patch_run() -> MetaDefinition {
    MetaDefinition::new(PATCH_RUN)
        .label("Patch Run")
        .field(FieldDefinition::new("executed_at", FieldType::Datetime).label("Executed At"))
        .keyword_fields(["name"])
}

/// `DocField.fieldname` follows its label (`"Due Date"` -> `"due_date"`).
pub(crate) fn docfield_fieldname(doc: &Document, _parent: Option<&Document>) -> Value {
    let label = doc.get_str("label");
    if label.is_empty() {
        Value::Null
    } else {
        Value::from(fieldname_from_label(&label))
    }
}
