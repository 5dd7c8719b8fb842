//! CLI errors.

use docbase_core::CoreError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Neither `--database` nor the configuration names a database.
    #[error("no database given; pass --database or set database_path in the config file")]
    MissingDatabase,

    /// The schema file is not a JSON array of definitions.
    #[error("invalid schema file {}: {source}", path.display())]
    Schema {
        /// Schema file.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A command argument is not valid JSON.
    #[error("invalid JSON argument: {0}")]
    Json(#[from] serde_json::Error),

    /// A resource request was answered with an error status.
    #[error("{kind} ({status}): {message}")]
    Request {
        /// HTTP-equivalent status.
        status: u16,
        /// Error kind.
        kind: String,
        /// Error message.
        message: String,
    },

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingDatabase | Self::Schema { .. } | Self::Json(_) => 2,
            Self::Request { status, .. } if *status == 404 => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::MissingDatabase.exit_code(), 2);
        let missing = CliError::Request {
            status: 404,
            kind: "NotFoundError".to_string(),
            message: "Customer X not found".to_string(),
        };
        assert_eq!(missing.exit_code(), 3);
        assert_eq!(missing.to_string(), "NotFoundError (404): Customer X not found");
    }
}
