//! Inspect command implementation.

use super::Format;
use crate::error::CliResult;
use docbase_core::{App, Filters, Meta};
use serde::Serialize;

/// Summary of one registered entity.
#[derive(Debug, Serialize)]
pub struct DoctypeSummary {
    /// Entity name.
    pub name: String,
    /// Display label.
    pub label: String,
    /// `regular`, `single`, `child`, `submittable` or `tree`.
    pub kind: &'static str,
    /// Backing table (the base entity for derived ones).
    pub table: String,
    /// Naming policy.
    pub naming: String,
    /// Number of declared fields.
    pub field_count: usize,
    /// Stored records; absent for singles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
    /// Field details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSummary>>,
}

/// Details of one field.
#[derive(Debug, Serialize)]
pub struct FieldSummary {
    /// Field name.
    pub fieldname: String,
    /// Field kind.
    pub fieldtype: String,
    /// Display label.
    pub label: String,
    /// SQL column type; absent for structural fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Must be non-empty on save.
    pub required: bool,
    /// Recomputed by formulas only.
    pub read_only: bool,
    /// Linked or embedded entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Runs the inspect command.
pub fn run(app: &App, doctype: Option<&str>, format: Format) -> CliResult<()> {
    let summaries = match doctype {
        Some(doctype) => vec![summarize(app, &*app.get_meta(doctype)?, true)?],
        None => app
            .registry()
            .doctypes()
            .iter()
            .map(|name| summarize(app, &*app.get_meta(name)?, false))
            .collect::<CliResult<Vec<_>>>()?,
    };

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Format::Text => {
            for summary in &summaries {
                print_text_output(summary);
            }
        }
    }
    Ok(())
}

fn summarize(app: &App, meta: &Meta, with_fields: bool) -> CliResult<DoctypeSummary> {
    let records = if meta.is_single() {
        None
    } else {
        Some(app.database().count(meta.name(), &Filters::new())?)
    };
    let fields = with_fields.then(|| {
        meta.fields()
            .iter()
            .map(|field| FieldSummary {
                fieldname: field.fieldname.clone(),
                fieldtype: field.fieldtype.to_string(),
                label: field.display_label().to_string(),
                column: meta.column_type(&field.fieldname).map(|c| c.to_string()),
                required: field.required,
                read_only: field.read_only,
                target: field
                    .child_doctype()
                    .or_else(|| field.link_target())
                    .map(str::to_string),
            })
            .collect()
    });

    Ok(DoctypeSummary {
        name: meta.name().to_string(),
        label: meta.label().to_string(),
        kind: kind(meta),
        table: meta.base_doctype().to_string(),
        naming: meta.naming().to_string(),
        field_count: meta.fields().len(),
        records,
        fields,
    })
}

fn kind(meta: &Meta) -> &'static str {
    if meta.is_single() {
        "single"
    } else if meta.is_child() {
        "child"
    } else if meta.is_submittable() {
        "submittable"
    } else if meta.is_tree() {
        "tree"
    } else {
        "regular"
    }
}

fn print_text_output(summary: &DoctypeSummary) {
    let records = summary
        .records
        .map_or_else(|| "-".to_string(), |n| n.to_string());
    println!(
        "{:<24} {:<12} {:<24} {:>4} fields {:>8} records  naming: {}",
        summary.name, summary.kind, summary.table, summary.field_count, records, summary.naming
    );

    if let Some(fields) = &summary.fields {
        println!();
        println!("  {:<24} {:<14} {:<8} {:<4} Label", "Field", "Type", "Column", "Req");
        for field in fields {
            let column = field.column.as_deref().unwrap_or("-");
            let required = if field.required { "yes" } else { "" };
            let target = field
                .target
                .as_deref()
                .map(|t| format!(" -> {t}"))
                .unwrap_or_default();
            println!(
                "  {:<24} {:<14} {:<8} {:<4} {}{}",
                field.fieldname, field.fieldtype, column, required, field.label, target
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbase_core::{Config, FieldDefinition, FieldType, MetaDefinition};
    use serde_json::json;

    fn app() -> App {
        App::builder(Config::new())
            .definition(
                MetaDefinition::new("Project")
                    .field(FieldDefinition::new("title", FieldType::Data)),
            )
            .definition(
                MetaDefinition::new("Task")
                    .field(FieldDefinition::new("subject", FieldType::Data).required())
                    .field(FieldDefinition::new("project", FieldType::Link).target("Project")),
            )
            .definition(
                MetaDefinition::new("TaskSettings")
                    .single()
                    .field(FieldDefinition::new("default_owner", FieldType::Data)),
            )
            .open()
            .unwrap()
    }

    #[test]
    fn summary_counts_records() {
        let app = app();
        app.insert_doc("Task", &json!({"subject": "Plan"})).unwrap();
        let summary = summarize(&app, &app.get_meta("Task").unwrap(), true).unwrap();
        assert_eq!(summary.kind, "regular");
        assert_eq!(summary.records, Some(1));

        let fields = summary.fields.unwrap();
        let subject = fields.iter().find(|f| f.fieldname == "subject").unwrap();
        assert!(subject.required);
        assert_eq!(subject.column.as_deref(), Some("TEXT"));
        let project = fields.iter().find(|f| f.fieldname == "project").unwrap();
        assert_eq!(project.target.as_deref(), Some("Project"));
    }

    #[test]
    fn singles_have_no_record_count() {
        let app = app();
        let summary = summarize(&app, &app.get_meta("TaskSettings").unwrap(), false).unwrap();
        assert_eq!(summary.kind, "single");
        assert!(summary.records.is_none());
        assert!(summary.fields.is_none());
    }
}
