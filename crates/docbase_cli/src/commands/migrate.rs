//! Migrate command implementation.

use super::Format;
use crate::error::CliResult;
use docbase_core::{AppBuilder, MigrationReport};
use tracing::info;

/// Plans the schema changes and, unless `dry_run`, applies them by opening
/// the application.
pub fn run<F>(builder: F, dry_run: bool, format: Format) -> CliResult<()>
where
    F: Fn() -> CliResult<AppBuilder>,
{
    let report = builder()?.plan_migration()?;
    if !dry_run && !report.is_up_to_date() {
        let app = builder()?.open()?;
        info!(steps = report.steps.len(), ?app, "migration applied");
    }

    match format {
        Format::Json => {
            let output = serde_json::json!({
                "dry_run": dry_run,
                "up_to_date": report.is_up_to_date(),
                "steps": report.steps,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Format::Text => print_text_output(&report, dry_run),
    }
    Ok(())
}

fn print_text_output(report: &MigrationReport, dry_run: bool) {
    if report.is_up_to_date() {
        println!("Schema is up to date.");
    } else if dry_run {
        println!("Pending Changes");
        println!("===============");
    } else {
        println!("Applied Changes");
        println!("===============");
    }
    for step in &report.steps {
        let marker = if step.is_change() { "+" } else { "~" };
        println!("  {marker} {step}");
    }
    if !report.is_up_to_date() {
        println!();
        println!(
            "{} tables created, {} columns added, {} tables rebuilt, {} indexes created",
            report.tables_created(),
            report.columns_added(),
            report.tables_rebuilt(),
            report.indexes_created()
        );
    }
    if dry_run && !report.is_up_to_date() {
        println!("\n(dry run - no changes made)");
    }
}
