//! CLI command implementations.

pub mod inspect;
pub mod migrate;
pub mod resource;

use clap::ValueEnum;

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human readable text
    Text,
    /// Pretty printed JSON
    Json,
}
