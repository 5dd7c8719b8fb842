//! Online schema migration driven by metadata diffs.

use super::schema::{quoted, ColumnSpec, TableSpec, SINGLE_VALUE, SINGLE_VALUE_DDL};
use super::Database;
use crate::error::{CoreError, CoreResult};
use crate::meta::Meta;
use docbase_storage::ColumnInfo;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// One schema change, planned or applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MigrationStep {
    /// A table was created.
    CreateTable {
        /// Table name.
        table: String,
    },
    /// A column was added with `ALTER TABLE`.
    AddColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// The table was rebuilt through a shadow table to add foreign keys.
    RebuildTable {
        /// Table name.
        table: String,
        /// Columns gaining a foreign key.
        foreign_keys: Vec<String>,
    },
    /// An index was created.
    CreateIndex {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
    },
    /// A column no longer described by metadata was left in place.
    SkipRemoval {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
}

impl MigrationStep {
    /// Table the step applies to.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table }
            | Self::AddColumn { table, .. }
            | Self::RebuildTable { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::SkipRemoval { table, .. } => table,
        }
    }

    /// Whether the step changes the database.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::SkipRemoval { .. })
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table } => write!(f, "create table {table}"),
            Self::AddColumn { table, column } => write!(f, "add column {table}.{column}"),
            Self::RebuildTable { table, foreign_keys } => {
                write!(f, "rebuild {table} (foreign keys: {})", foreign_keys.join(", "))
            }
            Self::CreateIndex { table, index } => write!(f, "create index {index} on {table}"),
            Self::SkipRemoval { table, column } => {
                write!(f, "keep {table}.{column} (no longer in metadata)")
            }
        }
    }
}

/// Outcome of [`Database::migrate`] or [`Database::plan_migration`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Steps in execution order.
    pub steps: Vec<MigrationStep>,
}

impl MigrationReport {
    /// No step changes the database.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        !self.steps.iter().any(MigrationStep::is_change)
    }

    /// Number of tables created.
    #[must_use]
    pub fn tables_created(&self) -> usize {
        self.count(|s| matches!(s, MigrationStep::CreateTable { .. }))
    }

    /// Number of columns added.
    #[must_use]
    pub fn columns_added(&self) -> usize {
        self.count(|s| matches!(s, MigrationStep::AddColumn { .. }))
    }

    /// Number of shadow-table rebuilds.
    #[must_use]
    pub fn tables_rebuilt(&self) -> usize {
        self.count(|s| matches!(s, MigrationStep::RebuildTable { .. }))
    }

    /// Number of indexes created.
    #[must_use]
    pub fn indexes_created(&self) -> usize {
        self.count(|s| matches!(s, MigrationStep::CreateIndex { .. }))
    }

    /// Number of stale columns left in place.
    #[must_use]
    pub fn skipped_removals(&self) -> usize {
        self.count(|s| matches!(s, MigrationStep::SkipRemoval { .. }))
    }

    fn count(&self, predicate: impl Fn(&MigrationStep) -> bool) -> usize {
        self.steps.iter().filter(|s| predicate(s)).count()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_up_to_date() {
            f.write_str("schema is up to date")?;
        } else {
            write!(
                f,
                "{} tables created, {} columns added, {} tables rebuilt, {} indexes created",
                self.tables_created(),
                self.columns_added(),
                self.tables_rebuilt(),
                self.indexes_created()
            )?;
        }
        if self.skipped_removals() > 0 {
            write!(f, ", {} stale columns kept", self.skipped_removals())?;
        }
        Ok(())
    }
}

struct TablePlan {
    spec: TableSpec,
    existing: Vec<ColumnInfo>,
    steps: Vec<MigrationStep>,
}

impl Database {
    /// Computes the schema changes [`Database::migrate`] would apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or a link target is
    /// not registered.
    pub fn plan_migration(&self) -> CoreResult<MigrationReport> {
        let plans = self.plan_tables()?;
        let mut report = MigrationReport::default();
        if !self.backend.table_exists(SINGLE_VALUE)? {
            report.steps.push(MigrationStep::CreateTable {
                table: SINGLE_VALUE.to_string(),
            });
        }
        for plan in plans {
            report.steps.extend(plan.steps);
        }
        Ok(report)
    }

    /// Brings the database schema in line with the registered metadata.
    ///
    /// Creates missing tables, adds missing columns and indexes, and
    /// rebuilds tables that gain foreign keys through a `TEMP_<table>`
    /// shadow copy. Columns without metadata are logged and kept. Running
    /// it twice makes no further change.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails; a failed rebuild is rolled
    /// back.
    pub fn migrate(&self) -> CoreResult<MigrationReport> {
        self.backend.execute_batch(SINGLE_VALUE_DDL)?;
        let mut report = MigrationReport::default();
        for plan in self.plan_tables()? {
            for step in &plan.steps {
                self.apply_step(&plan, step)?;
            }
            report.steps.extend(plan.steps);
        }
        if report.is_up_to_date() {
            tracing::debug!("schema is up to date");
        } else {
            info!(%report, "migrated schema");
        }
        Ok(report)
    }

    /// Tables grouped by base doctype, the owning doctype first.
    fn tables(&self) -> CoreResult<IndexMap<String, Vec<Arc<Meta>>>> {
        let mut tables: IndexMap<String, Vec<Arc<Meta>>> = IndexMap::new();
        for doctype in self.registry.doctypes() {
            let meta = self.registry.get_meta(&doctype)?;
            if meta.is_single() {
                continue;
            }
            tables
                .entry(meta.base_doctype().to_string())
                .or_default()
                .push(meta);
        }
        for (table, metas) in &mut tables {
            metas.sort_by_key(|meta| meta.name() != table.as_str());
        }
        Ok(tables)
    }

    fn plan_tables(&self) -> CoreResult<Vec<TablePlan>> {
        let mut plans = Vec::new();
        for (table, metas) in self.tables()? {
            let spec = TableSpec::build(&self.registry, &table, &metas)?;
            let mut steps = Vec::new();

            if !self.backend.table_exists(&table)? {
                steps.push(MigrationStep::CreateTable {
                    table: table.clone(),
                });
                steps.extend(spec.indexes.iter().map(|index| MigrationStep::CreateIndex {
                    table: table.clone(),
                    index: index.name.clone(),
                }));
                plans.push(TablePlan {
                    spec,
                    existing: Vec::new(),
                    steps,
                });
                continue;
            }

            let existing = self.backend.table_columns(&table)?;
            for column in &spec.columns {
                if !existing.iter().any(|c| c.name == column.name) {
                    steps.push(MigrationStep::AddColumn {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
            }
            for column in &existing {
                if spec.column(&column.name).is_none() {
                    steps.push(MigrationStep::SkipRemoval {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
            }

            let current_keys = self.backend.foreign_keys(&table)?;
            let new_keys: Vec<String> = spec
                .foreign_keys
                .iter()
                .filter(|key| {
                    !current_keys
                        .iter()
                        .any(|k| k.column == key.column && k.table == key.table)
                })
                .map(|key| key.column.clone())
                .collect();
            if !new_keys.is_empty() {
                steps.push(MigrationStep::RebuildTable {
                    table: table.clone(),
                    foreign_keys: new_keys,
                });
            }

            let indexes = self.backend.index_names(&table)?;
            for index in &spec.indexes {
                if !indexes.contains(&index.name) {
                    steps.push(MigrationStep::CreateIndex {
                        table: table.clone(),
                        index: index.name.clone(),
                    });
                }
            }
            plans.push(TablePlan {
                spec,
                existing,
                steps,
            });
        }
        Ok(plans)
    }

    fn apply_step(&self, plan: &TablePlan, step: &MigrationStep) -> CoreResult<()> {
        let spec = &plan.spec;
        match step {
            MigrationStep::CreateTable { table } => {
                self.backend.execute_batch(&spec.create_sql(table))?;
            }
            MigrationStep::AddColumn { table, column } => {
                if let Some(column) = spec.column(column) {
                    self.backend.execute_batch(&format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        quoted(table),
                        column.addable().to_sql()
                    ))?;
                }
            }
            MigrationStep::RebuildTable { table, .. } => self.rebuild_table(plan, table)?,
            MigrationStep::CreateIndex { table, index } => {
                if let Some(index) = spec.indexes.iter().find(|i| &i.name == index) {
                    self.backend.execute_batch(&index.to_sql(table))?;
                }
            }
            MigrationStep::SkipRemoval { table, column } => {
                warn!(table = %table, column = %column, "column has no field; not removing it");
            }
        }
        Ok(())
    }

    /// Recreates `table` with its foreign keys: copy into `TEMP_<table>`,
    /// drop the original, rename the copy back. Foreign key enforcement is
    /// off for the duration and restored after the commit.
    ///
    /// SQLite ignores `PRAGMA foreign_keys` inside a transaction, so the
    /// rebuild refuses to join one.
    fn rebuild_table(&self, plan: &TablePlan, table: &str) -> CoreResult<()> {
        if self.backend.in_transaction() {
            return Err(CoreError::transaction_open(format!("rebuilding table {table}")));
        }
        let shadow = format!("TEMP_{table}");
        let mut layout = plan.spec.clone();
        layout.columns = plan
            .spec
            .columns
            .iter()
            .map(|column| rebuilt_column(column, &plan.existing))
            .collect();
        let common: Vec<&str> = layout
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| plan.existing.iter().any(|c| c.name == *name))
            .collect();
        let columns = common.join(", ");

        self.backend.set_foreign_keys(false)?;
        let result = self.transaction(|| {
            self.backend.execute_batch(&format!("DROP TABLE IF EXISTS {}", quoted(&shadow)))?;
            self.backend.execute_batch(&layout.create_sql(&shadow))?;
            self.backend.execute_batch(&format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                quoted(&shadow),
                quoted(table)
            ))?;
            self.backend.execute_batch(&format!("DROP TABLE {}", quoted(table)))?;
            self.backend.execute_batch(&format!(
                "ALTER TABLE {} RENAME TO {}",
                quoted(&shadow),
                quoted(table)
            ))?;
            for index in &layout.indexes {
                self.backend.execute_batch(&index.to_sql(table))?;
            }
            Ok(())
        });
        self.backend.set_foreign_keys(self.foreign_keys)?;
        result?;
        info!(table = %table, "rebuilt table with foreign keys");
        Ok(())
    }
}

/// A column of a rebuilt table keeps `NOT NULL` only where the copied rows
/// already satisfy it.
fn rebuilt_column(column: &ColumnSpec, existing: &[ColumnInfo]) -> ColumnSpec {
    match existing.iter().find(|c| c.name == column.name) {
        Some(info) if column.primary_key || info.not_null => column.clone(),
        Some(_) => ColumnSpec {
            not_null: false,
            ..column.clone()
        },
        None => column.addable(),
    }
}
