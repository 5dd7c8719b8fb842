//! Mandatory and field-level validation.

use super::Document;
use crate::error::{CoreError, CoreResult, ErrorReport};
use crate::meta::{standard, Field, FieldType};
use docbase_storage::Value;

impl Document {
    /// Validates the document before it is written.
    ///
    /// Checks required fields of the document, of each `Table` row and of
    /// the `Form` value, then runs select options and registered validators
    /// on every filled field. With `raise`, the first problem is returned as
    /// an error; otherwise problems are recorded into `errors`.
    ///
    /// # Errors
    ///
    /// With `raise`, returns `CoreError::Mandatory` listing every missing
    /// field, or the first field-level failure.
    pub fn validate_insert(&self, errors: Option<&mut ErrorReport>, raise: bool) -> CoreResult<()> {
        let mut report = ErrorReport::new();
        let result = self
            .validate_mandatory(&mut report, raise)
            .and_then(|()| self.validate_fields(&mut report, raise));
        if let Some(errors) = errors {
            errors.merge(report);
        }
        result
    }

    /// Collect-mode validation: `(is_valid, report)`.
    #[must_use]
    pub fn validate(&self) -> (bool, ErrorReport) {
        let mut report = ErrorReport::new();
        if let Err(err) = self.validate_insert(Some(&mut report), false) {
            report.add(self.doctype(), err.to_string());
        }
        (report.is_empty(), report)
    }

    fn validate_mandatory(&self, report: &mut ErrorReport, raise: bool) -> CoreResult<()> {
        let mut lines = Vec::new();
        let mut fields = Vec::new();

        let missing = self.missing_mandatory();
        for field in &missing {
            report.add(field.fieldname.as_str(), "Is mandatory");
            fields.push(field.fieldname.clone());
        }
        if !missing.is_empty() {
            lines.push(quoted_labels(&missing));
        }

        for parentfield in self.meta.structural_fields() {
            let rows: Vec<&Document> = match parentfield.fieldtype {
                FieldType::Form => self.form(&parentfield.fieldname).into_iter().collect(),
                _ => self.table(&parentfield.fieldname).iter().collect(),
            };
            for row in rows {
                let missing = row.missing_mandatory();
                if missing.is_empty() {
                    continue;
                }
                let idx = row.get_int("idx").unwrap_or(1);
                for field in &missing {
                    report.add(
                        field.fieldname.as_str(),
                        format!("On Row {idx}: Is Mandatory"),
                    );
                    fields.push(field.fieldname.clone());
                }
                lines.push(format!(
                    "{}: Row {idx}: {}",
                    parentfield.display_label(),
                    quoted_labels(&missing)
                ));
            }
        }

        if raise && !lines.is_empty() {
            return Err(CoreError::Mandatory {
                message: format!("Value missing for {}", lines.join("\n")),
                fields,
            });
        }
        Ok(())
    }

    fn missing_mandatory(&self) -> Vec<&Field> {
        self.meta
            .fields()
            .iter()
            .filter(|field| field.required)
            .filter(|field| !(self.not_inserted && field.fieldname == standard::NAME))
            .filter(|field| match field.fieldtype {
                FieldType::Table => self.table(&field.fieldname).is_empty(),
                FieldType::Form => self.form(&field.fieldname).is_none(),
                _ => self.get(&field.fieldname).is_empty(),
            })
            .collect()
    }

    fn validate_fields(&self, report: &mut ErrorReport, raise: bool) -> CoreResult<()> {
        for field in self.meta.fields() {
            if field.fieldtype.is_structural() {
                continue;
            }
            if let Err(err) = self.check_field(field, self.get(&field.fieldname)) {
                if raise {
                    return Err(err);
                }
                report.add(field.fieldname.as_str(), err.to_string());
            }
        }
        for (parentfield, row) in self.children() {
            for field in row.meta.fields() {
                if field.fieldtype.is_structural() {
                    continue;
                }
                if let Err(err) = row.check_field(field, row.get(&field.fieldname)) {
                    if raise {
                        return Err(err);
                    }
                    let idx = row.get_int("idx").unwrap_or(1);
                    report.add(parentfield, format!("On Row {idx}: {err}"));
                }
            }
        }
        Ok(())
    }

    /// Field-level checks for one value: select options, then the
    /// registered validator. Empty values pass.
    pub(crate) fn check_field(&self, field: &Field, value: &Value) -> CoreResult<()> {
        if value.is_empty() {
            return Ok(());
        }
        if field.fieldtype == FieldType::Select {
            let options = field.select_options();
            let text = value.to_text();
            if !options.is_empty() && !options.contains(&text.as_str()) {
                return Err(CoreError::invalid_value(format!(
                    "Invalid value \"{text}\" for \"{}\". Must be one of: {}",
                    field.display_label(),
                    options.join(", ")
                )));
            }
        }
        if let Some(validator) = field.validator_fn() {
            validator(value, self).map_err(CoreError::validation)?;
        }
        Ok(())
    }
}

fn quoted_labels(fields: &[&Field]) -> String {
    fields
        .iter()
        .map(|field| format!("\"{}\"", field.display_label()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use crate::document::tests::registry;
    use crate::document::Document;
    use crate::error::{CoreError, ErrorReport};
    use serde_json::json;

    #[test]
    fn missing_title_fails_until_filled() {
        let registry = registry();
        for data in [json!({}), json!({"customer": ""})] {
            let doc = Document::new(&registry, "Invoice", &data).unwrap();
            match doc.validate_insert(None, true).unwrap_err() {
                CoreError::Mandatory { message, fields } => {
                    assert_eq!(fields, vec!["customer".to_string()]);
                    assert_eq!(message, "Value missing for \"Customer\"");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
        let doc = Document::new(&registry, "Invoice", &json!({"customer": "x"})).unwrap();
        doc.validate_insert(None, true).unwrap();
    }

    #[test]
    fn child_rows_are_checked_one_level_deep() {
        let registry = registry();
        let doc = Document::new(
            &registry,
            "Invoice",
            &json!({
                "customer": "ACME",
                "items": [{"item": "A"}, {"rate": 2}],
                "billing": {}
            }),
        )
        .unwrap();

        let err = doc.validate_insert(None, true).unwrap_err();
        let CoreError::Mandatory { message, fields } = err else {
            panic!("expected a mandatory error");
        };
        assert_eq!(fields, vec!["item".to_string(), "city".to_string()]);
        assert_eq!(
            message,
            "Value missing for Items: Row 2: \"Item\"\nBilling: Row 1: \"City\""
        );

        let mut report = ErrorReport::new();
        doc.validate_insert(Some(&mut report), false).unwrap();
        assert_eq!(report.get("item").unwrap(), ["On Row 2: Is Mandatory"]);
        assert_eq!(report.get("city").unwrap(), ["On Row 1: Is Mandatory"]);
    }

    #[test]
    fn collect_mode_reports_every_problem() {
        let registry = registry();
        let mut doc = Document::new(&registry, "Invoice", &json!({"email": "nobody"})).unwrap();
        doc.set_raw("status", "Lost".into());

        let (valid, report) = doc.validate();
        assert!(!valid);
        assert_eq!(report.get("customer").unwrap(), ["Is mandatory"]);
        assert_eq!(report.get("email").unwrap(), ["Invalid Email: nobody"]);
        assert_eq!(
            report.get("status").unwrap(),
            ["Invalid value \"Lost\" for \"Status\". Must be one of: Draft, Paid"]
        );
    }

    #[test]
    fn raise_mode_stops_at_the_first_field_error() {
        let registry = registry();
        let doc = Document::new(
            &registry,
            "Invoice",
            &json!({"customer": "ACME", "email": "nobody"}),
        )
        .unwrap();
        let err = doc.validate_insert(None, true).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(err.to_string(), "Invalid Email: nobody");
        assert_eq!(err.status_code(), 417);
    }

    #[test]
    fn builtin_validators() {
        let registry = registry();
        let doc = Document::new(&registry, "Invoice", &json!({})).unwrap();
        assert!(crate::validators::email(&"a@example.com".into(), &doc).is_ok());
        assert!(crate::validators::email(&"example.com".into(), &doc).is_err());
        assert!(crate::validators::phone(&"+47 555".into(), &doc).is_ok());
        assert!(crate::validators::phone(&"call me".into(), &doc).is_err());
    }

    #[test]
    fn name_is_not_required_before_insert() {
        let registry = registry();
        let doc = Document::new(&registry, "Invoice", &json!({"customer": "x"})).unwrap();
        assert!(doc.name().is_empty());
        let (valid, _) = doc.validate();
        assert!(valid);
    }
}
