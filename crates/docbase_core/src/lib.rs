//! # docbase Core
//!
//! Schema-driven document engine for docbase.
//!
//! This crate provides:
//! - Metadata registry: validated, cached entity definitions
//! - Documents with dirty tracking, formulas, child records and a save lifecycle
//! - Persistence over SQL: CRUD, structured filters and online migration
//! - The application context binding them together with a document cache
//! - Transport-agnostic resource handlers and one-off patches
//!
//! ## Example
//!
//! ```rust,ignore
//! use docbase_core::{App, Config, FieldDefinition, FieldType, MetaDefinition};
//! use serde_json::json;
//!
//! let app = App::builder(Config::new())
//!     .definition(
//!         MetaDefinition::new("ToDo")
//!             .field(FieldDefinition::new("subject", FieldType::Data).required())
//!             .keyword_fields(["subject"]),
//!     )
//!     .open()?;
//!
//! let mut todo = app.new_doc("ToDo", &json!({"subject": "Write docs"}))?;
//! todo.insert(&app)?;
//! assert!(app.database().exists("ToDo", todo.name())?);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod config;
mod context;
pub mod database;
mod document;
mod error;
pub mod meta;
mod observable;
pub mod patches;
pub mod resource;
pub mod rounding;
mod util;
pub mod validators;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeType};
pub use config::Config;
pub use context::{App, AppBuilder, SharedDoc};
pub use database::{Database, Filters, MigrationReport, Op, Order, Query, Record};
pub use document::{Controller, DocFlags, Document, Hook};
pub use error::{CoreError, CoreResult, ErrorReport};
pub use meta::{
    ColumnType, Field, FieldDefinition, FieldType, Meta, MetaDefinition, MetaRegistry, Naming,
    RegistrySettings,
};
pub use observable::{Container, Event, ListenerId, Observable};
pub use patches::{Patch, PatchRunReport, PatchRunner};
pub use resource::{handle, ListParams, ResourceRequest, ResourceResponse};
pub use util::{fieldname_from_label, random_name, slug};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export storage types for convenience
pub use docbase_storage::{Row, SqliteBackend, StorageBackend, StorageError, Value};
