//! # docbase Testkit
//!
//! Test utilities shared by the docbase crates.
//!
//! - [`fixtures`]: in-memory and file-backed applications over a small
//!   invoicing schema
//! - [`generators`]: proptest strategies for field names, values and records

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod generators;

pub use fixtures::{sample_builder, sample_definitions, TestApp};

/// Common imports for tests.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use docbase_core::{App, Config, CoreError, Document, Filters, Query};
    pub use proptest::prelude::*;
    pub use serde_json::json;
}
