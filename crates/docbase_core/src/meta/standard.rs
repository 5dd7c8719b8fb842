//! Implicit fields every entity gains from its kind.

use super::definition::MetaDefinition;
use super::field::FieldDefinition;
use super::fieldtype::FieldType;

/// The primary identifier.
pub const NAME: &str = "name";

/// Submission flag of submittable entities.
pub const SUBMITTED: &str = "submitted";

/// Audit fields of top-level entities.
pub const PARENT_FIELDS: [&str; 5] = ["owner", "modified_by", "creation", "modified", "keywords"];

/// Linkage fields of child entities.
pub const CHILD_FIELDS: [&str; 4] = ["idx", "parent", "parenttype", "parentfield"];

/// Nested-set bounds of tree entities.
pub const TREE_FIELDS: [&str; 2] = ["lft", "rgt"];

/// The implicit identifier field.
pub(crate) fn name_field() -> FieldDefinition {
    FieldDefinition::new(NAME, FieldType::Data)
        .label("Name")
        .required()
        .read_only()
}

/// Implicit fields of an entity in column order, excluding `name`.
pub(crate) fn implicit_fields(def: &MetaDefinition) -> Vec<FieldDefinition> {
    let mut fields = Vec::new();

    if def.is_submittable {
        fields.push(FieldDefinition::new(SUBMITTED, FieldType::Check).label("Submitted"));
    }

    if def.is_child {
        fields.push(FieldDefinition::new("idx", FieldType::Int).label("Idx").hidden());
        for fieldname in ["parent", "parenttype", "parentfield"] {
            fields.push(FieldDefinition::new(fieldname, FieldType::Data).hidden());
        }
    } else {
        fields.push(FieldDefinition::new("owner", FieldType::Data).label("Owner"));
        fields.push(FieldDefinition::new("modified_by", FieldType::Data).label("Modified By"));
        fields.push(FieldDefinition::new("creation", FieldType::Datetime).label("Created On"));
        fields.push(FieldDefinition::new("modified", FieldType::Datetime).label("Modified On"));
        fields.push(
            FieldDefinition::new("keywords", FieldType::Text)
                .label("Keywords")
                .hidden(),
        );
    }

    if def.is_tree {
        for fieldname in TREE_FIELDS {
            fields.push(FieldDefinition::new(fieldname, FieldType::Int).hidden());
        }
    }

    fields
}

/// Returns true if `fieldname` is one of the implicit fields of `def`.
#[must_use]
pub fn is_implicit(def: &MetaDefinition, fieldname: &str) -> bool {
    (fieldname == NAME && !def.is_single)
        || implicit_fields(def)
            .iter()
            .any(|field| field.fieldname == fieldname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_fields_follow_entity_kind() {
        let names = |def: &MetaDefinition| -> Vec<String> {
            implicit_fields(def)
                .into_iter()
                .map(|f| f.fieldname)
                .collect()
        };

        let plain = MetaDefinition::new("ToDo");
        assert_eq!(names(&plain), PARENT_FIELDS.to_vec());

        let child = MetaDefinition::new("InvoiceItem").child();
        assert_eq!(names(&child), CHILD_FIELDS.to_vec());

        let tree = MetaDefinition::new("Account").tree().submittable();
        let tree_names = names(&tree);
        assert_eq!(tree_names.first().map(String::as_str), Some(SUBMITTED));
        assert_eq!(&tree_names[tree_names.len() - 2..], &["lft", "rgt"]);
    }

    #[test]
    fn single_entities_have_no_implicit_name() {
        let settings = MetaDefinition::new("Settings").single();
        assert!(!is_implicit(&settings, NAME));
        assert!(is_implicit(&settings, "modified"));
        assert!(is_implicit(&MetaDefinition::new("ToDo"), NAME));
    }
}
