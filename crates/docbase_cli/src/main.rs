//! docbase CLI
//!
//! Command-line tools for docbase databases.
//!
//! # Commands
//!
//! - `migrate` - Bring the schema in line with the metadata
//! - `inspect` - Display entity definitions and record counts
//! - `list`, `get` - Read records
//! - `create`, `update`, `delete` - Write records through the document lifecycle

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::Format;
use docbase_core::{App, AppBuilder, Config, MetaDefinition};
use error::{CliError, CliResult};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// docbase command-line database tools.
#[derive(Parser)]
#[command(name = "docbase")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database file
    #[arg(global = true, short, long)]
    database: Option<PathBuf>,

    /// TOML configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// JSON file with an array of entity definitions
    #[arg(global = true, short, long)]
    schema: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the schema in line with the metadata
    Migrate {
        /// Dry run - show what would be done
        #[arg(long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// Display entity definitions and record counts
    Inspect {
        /// Show the fields of one entity
        #[arg(long)]
        doctype: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// List records
    List {
        /// Entity kind
        doctype: String,

        /// Fields, as a JSON array or comma separated
        #[arg(long)]
        fields: Option<String>,

        /// Structured filters as JSON
        #[arg(long)]
        filters: Option<String>,

        /// Maximum number of rows
        #[arg(long)]
        limit: Option<usize>,

        /// Rows to skip
        #[arg(long)]
        offset: Option<usize>,

        /// Sort column
        #[arg(long)]
        order_by: Option<String>,

        /// Sort direction (asc, desc)
        #[arg(long)]
        order: Option<String>,
    },

    /// Print one record with its children
    Get {
        /// Entity kind
        doctype: String,
        /// Record name
        name: String,
    },

    /// Insert a record from a JSON object
    Create {
        /// Entity kind
        doctype: String,
        /// Field values
        json: String,
    },

    /// Merge a JSON object into a record and save it
    Update {
        /// Entity kind
        doctype: String,
        /// Record name
        name: String,
        /// Field values
        json: String,
    },

    /// Delete one or more records
    Delete {
        /// Entity kind
        doctype: String,
        /// Record names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let Cli {
        database,
        config,
        schema,
        command,
        ..
    } = cli;
    let app_builder = || builder(database.as_deref(), config.as_deref(), schema.as_deref());

    match command {
        Commands::Migrate { dry_run, format } => {
            commands::migrate::run(app_builder, dry_run, format)?;
        }
        Commands::Inspect { doctype, format } => {
            let app = open(app_builder()?)?;
            commands::inspect::run(&app, doctype.as_deref(), format)?;
        }
        Commands::List {
            doctype,
            fields,
            filters,
            limit,
            offset,
            order_by,
            order,
        } => {
            let app = open(app_builder()?)?;
            let pairs = [
                ("fields", fields),
                ("filters", filters),
                ("limit", limit.map(|n| n.to_string())),
                ("offset", offset.map(|n| n.to_string())),
                ("order_by", order_by),
                ("order", order),
            ];
            let pairs = pairs
                .into_iter()
                .filter_map(|(key, value)| value.map(|value| (key, value)));
            commands::resource::list(&app, doctype, pairs)?;
        }
        Commands::Get { doctype, name } => {
            let app = open(app_builder()?)?;
            commands::resource::get(&app, doctype, name)?;
        }
        Commands::Create { doctype, json } => {
            let app = open(app_builder()?)?;
            commands::resource::create(&app, doctype, &json)?;
        }
        Commands::Update { doctype, name, json } => {
            let app = open(app_builder()?)?;
            commands::resource::update(&app, doctype, name, &json)?;
        }
        Commands::Delete { doctype, names } => {
            let app = open(app_builder()?)?;
            commands::resource::delete(&app, doctype, names)?;
        }
        Commands::Version => {
            println!("docbase CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("docbase Core v{}", docbase_core::VERSION);
        }
    }

    Ok(())
}

/// Builds the application from the global options. The database path on the
/// command line wins over the one in the configuration file.
fn builder(
    database: Option<&Path>,
    config: Option<&Path>,
    schema: Option<&Path>,
) -> CliResult<AppBuilder> {
    let mut config = match config {
        Some(path) => Config::from_file(path)?,
        None => Config::new(),
    };
    if let Some(path) = database {
        config.database_path = Some(path.to_path_buf());
    }
    if config.database_path.is_none() {
        return Err(CliError::MissingDatabase);
    }
    let definitions = match schema {
        Some(path) => load_schema(path)?,
        None => Vec::new(),
    };
    debug!(
        database = ?config.database_path,
        definitions = definitions.len(),
        "building app"
    );
    Ok(App::builder(config).definitions(definitions))
}

fn load_schema(path: &Path) -> CliResult<Vec<MetaDefinition>> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| CliError::Schema {
        path: path.to_path_buf(),
        source,
    })
}

fn open(builder: AppBuilder) -> CliResult<App> {
    Ok(builder.open()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn database_is_required() {
        let err = builder(None, None, None).unwrap_err();
        assert!(matches!(err, CliError::MissingDatabase));
    }

    #[test]
    fn schema_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        std::fs::write(
            &schema,
            r#"[{"name": "ToDo", "fields": [{"fieldname": "subject", "fieldtype": "Data", "required": true}]}]"#,
        )
        .unwrap();
        let database = dir.path().join("todo.db");

        let app = open(builder(Some(&database), None, Some(&schema)).unwrap()).unwrap();
        assert!(app.registry().is_registered("ToDo"));
        assert!(database.exists());
    }

    #[test]
    fn malformed_schema_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("broken.json");
        std::fs::write(&schema, "{").unwrap();
        let err = load_schema(&schema).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
