//! Error types for docbase core.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Per-field validation messages collected while validating a document.
///
/// Keys are fieldnames (or `parentfield` for child rows), values are the
/// messages recorded against that field in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorReport {
    entries: IndexMap<String, Vec<String>>,
}

impl ErrorReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message against a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.entries
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fields with at least one message.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Messages recorded for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.entries.get(field).map(Vec::as_slice)
    }

    /// Fieldnames with messages, in recording order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterates over `(field, messages)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Moves every entry of `other` into this report.
    pub fn merge(&mut self, other: ErrorReport) {
        for (field, messages) in other.entries {
            self.entries.entry(field).or_default().extend(messages);
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(field, messages)| format!("{field}: {}", messages.join("; ")))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Errors that can occur in docbase core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("database error: {0}")]
    Database(#[from] docbase_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic user-correctable input problem.
    #[error("{message}")]
    Validation {
        /// Description of the problem.
        message: String,
    },

    /// One or more required fields are empty.
    #[error("{message}")]
    Mandatory {
        /// Human readable summary (`Value missing for ...`).
        message: String,
        /// Fieldnames that were missing, parent fields first.
        fields: Vec<String>,
    },

    /// A fieldname that is not part of the entity.
    #[error("invalid field \"{fieldname}\" for {doctype}")]
    InvalidField {
        /// Entity kind.
        doctype: String,
        /// The unknown fieldname.
        fieldname: String,
    },

    /// A value outside the allowed set, or of the wrong shape.
    #[error("{message}")]
    InvalidValue {
        /// Description of the problem.
        message: String,
    },

    /// A broken entity definition.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// A malformed structured filter or query clause.
    #[error("invalid filter: {message}")]
    InvalidFilter {
        /// Description of the problem.
        message: String,
    },

    /// Collected validation messages surfaced as one error.
    #[error("validation failed: {0}")]
    Report(ErrorReport),

    /// Record (or entity kind) not found.
    #[error("{doctype} {name} not found")]
    NotFound {
        /// Entity kind.
        doctype: String,
        /// Identifier that was looked up.
        name: String,
    },

    /// Operation not permitted for the caller.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Description of the refusal.
        message: String,
    },

    /// Optimistic concurrency check failed.
    #[error("document {doctype} {name} has been modified after loading")]
    Conflict {
        /// Entity kind.
        doctype: String,
        /// Identifier of the record.
        name: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// An operation that must own its transaction was called inside one.
    #[error("{operation} cannot run inside an open transaction")]
    TransactionOpen {
        /// The refused operation.
        operation: String,
    },
}

impl CoreError {
    /// Creates a generic validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(doctype: impl Into<String>, fieldname: impl Into<String>) -> Self {
        Self::InvalidField {
            doctype: doctype.into(),
            fieldname: fieldname.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates an invalid filter error.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            doctype: doctype.into(),
            name: name.into(),
        }
    }

    /// Creates a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            doctype: doctype.into(),
            name: name.into(),
        }
    }

    /// Creates the validation error for a name that is already taken.
    pub fn duplicate(doctype: &str, name: &str) -> Self {
        Self::validation(format!("{doctype} {name} already exists"))
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates the error for an operation refused inside a transaction.
    pub fn transaction_open(operation: impl Into<String>) -> Self {
        Self::TransactionOpen {
            operation: operation.into(),
        }
    }

    /// Returns true for the user-correctable validation family.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Mandatory { .. }
                | Self::InvalidField { .. }
                | Self::InvalidValue { .. }
                | Self::Schema { .. }
                | Self::InvalidFilter { .. }
                | Self::Report(_)
        )
    }

    /// HTTP-equivalent status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            e if e.is_validation() => 417,
            Self::NotFound { .. } => 404,
            Self::Forbidden { .. } => 403,
            Self::Conflict { .. } => 409,
            _ => 500,
        }
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "DatabaseError",
            Self::Io(_) => "IoError",
            Self::Validation { .. } => "ValidationError",
            Self::Mandatory { .. } => "MandatoryError",
            Self::InvalidField { .. } => "InvalidFieldError",
            Self::InvalidValue { .. } => "ValueError",
            Self::Schema { .. } => "SchemaError",
            Self::InvalidFilter { .. } => "InvalidFilterError",
            Self::Report(_) => "ValidationError",
            Self::NotFound { .. } => "NotFoundError",
            Self::Forbidden { .. } => "ForbiddenError",
            Self::Conflict { .. } => "ConflictError",
            Self::Config { .. } => "ConfigError",
            Self::TransactionOpen { .. } => "TransactionError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(CoreError::validation("x").status_code(), 417);
        assert_eq!(
            CoreError::Mandatory {
                message: "m".into(),
                fields: vec![]
            }
            .status_code(),
            417
        );
        assert_eq!(CoreError::invalid_field("ToDo", "x").status_code(), 417);
        assert_eq!(CoreError::not_found("ToDo", "x").status_code(), 404);
        assert_eq!(CoreError::forbidden("no").status_code(), 403);
        assert_eq!(CoreError::conflict("ToDo", "x").status_code(), 409);
        assert_eq!(
            CoreError::from(docbase_storage::StorageError::NothingToCommit).status_code(),
            500
        );
        assert_eq!(CoreError::transaction_open("rebuild").status_code(), 500);
    }

    #[test]
    fn report_collects_in_order() {
        let mut report = ErrorReport::new();
        report.add("title", "Is mandatory");
        report.add("items", "On Row 1: Is Mandatory");
        report.add("title", "too short");

        assert_eq!(report.len(), 2);
        assert_eq!(report.fields().collect::<Vec<_>>(), vec!["title", "items"]);
        assert_eq!(report.get("title").unwrap().len(), 2);
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({
                "title": ["Is mandatory", "too short"],
                "items": ["On Row 1: Is Mandatory"]
            })
        );
    }

    #[test]
    fn messages() {
        let err = CoreError::not_found("ToDo", "abc");
        assert_eq!(err.to_string(), "ToDo abc not found");
        assert_eq!(err.kind(), "NotFoundError");
    }
}
