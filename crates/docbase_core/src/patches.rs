//! One-off data patches.
//!
//! A patch is a named function run once per database. Executed names are
//! recorded as `PatchRun` records, so [`PatchRunner::run_pending`] can be
//! called on every start:
//!
//! ```rust,ignore
//! let app = App::builder(config)
//!     .definitions(schema)
//!     .patch("default_todo_status", |app| {
//!         for row in app.database().get_all("ToDo", &Query::new())? {
//!             app.database().set_value("ToDo", &row["name"].to_text(), "status", "Open")?;
//!         }
//!         Ok(())
//!     })
//!     .open()?;
//! ```
//!
//! Each patch runs in its own transaction. A failing patch is rolled back,
//! logged and reported; the remaining patches still run.

use crate::context::App;
use crate::database::Query;
use crate::error::CoreResult;
use crate::meta::{standard, PATCH_RUN};
use crate::util::now_timestamp;
use docbase_storage::Value;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// The body of a patch.
pub type PatchFn = Arc<dyn Fn(&App) -> CoreResult<()> + Send + Sync>;

/// A named patch.
#[derive(Clone)]
pub struct Patch {
    name: String,
    run: PatchFn,
}

impl Patch {
    /// Creates a patch.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&App) -> CoreResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    /// Unique name, recorded once executed.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch").field("name", &self.name).finish()
    }
}

/// Outcome of one executed patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchResult {
    /// Patch name.
    pub name: String,
    /// Whether the patch and its record were committed.
    pub success: bool,
    /// Error message of a failed patch.
    pub error: Option<String>,
}

/// Outcome of [`PatchRunner::run_pending`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchRunReport {
    /// Patches that ran, in order.
    pub results: Vec<PatchResult>,
    /// Patches skipped because they already ran.
    pub skipped: Vec<String>,
}

impl PatchRunReport {
    /// Number of patches applied.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Number of patches that failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Ordered set of patches.
#[derive(Debug, Clone, Default)]
pub struct PatchRunner {
    patches: Vec<Patch>,
}

impl PatchRunner {
    /// Creates an empty runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a patch. A second patch with the same name replaces the first.
    pub fn register(&mut self, patch: Patch) {
        if let Some(existing) = self.patches.iter_mut().find(|p| p.name == patch.name) {
            *existing = patch;
        } else {
            self.patches.push(patch);
        }
    }

    /// Registered patches in run order.
    #[must_use]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Names of the patches that have not run yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the `PatchRun` records cannot be read.
    pub fn pending(&self, app: &App) -> CoreResult<Vec<String>> {
        let executed = executed(app)?;
        Ok(self
            .patches
            .iter()
            .filter(|p| !executed.contains(&p.name))
            .map(|p| p.name.clone())
            .collect())
    }

    /// Runs every patch that has not run yet.
    ///
    /// # Errors
    ///
    /// Returns an error only if the `PatchRun` records cannot be read;
    /// failures of individual patches are reported in the result.
    pub fn run_pending(&self, app: &App) -> CoreResult<PatchRunReport> {
        let executed = executed(app)?;
        let mut report = PatchRunReport::default();
        for patch in &self.patches {
            if executed.contains(&patch.name) {
                report.skipped.push(patch.name.clone());
                continue;
            }
            let outcome = app.transaction(|| {
                (patch.run)(app)?;
                let mut run = app.new_doc(
                    PATCH_RUN,
                    &json!({ "name": patch.name, "executed_at": now_timestamp() }),
                )?;
                run.insert(app)
            });
            match outcome {
                Ok(()) => {
                    info!(patch = %patch.name, "patch applied");
                    report.results.push(PatchResult {
                        name: patch.name.clone(),
                        success: true,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(patch = %patch.name, error = %err, "patch failed");
                    report.results.push(PatchResult {
                        name: patch.name.clone(),
                        success: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        Ok(report)
    }
}

fn executed(app: &App) -> CoreResult<HashSet<String>> {
    let rows = app
        .database()
        .get_all(PATCH_RUN, &Query::new().fields([standard::NAME]))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.get(standard::NAME).and_then(Value::as_str).map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::builder;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn patches_run_once_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = builder()
            .patch("seed_customer", |app| {
                let mut doc = app.new_doc(
                    "Customer",
                    &json!({"name": "WALK-IN", "customer_name": "Walk-in"}),
                )?;
                doc.insert(app)
            })
            .patch("count", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .open()
            .unwrap();

        assert!(app.database().exists("Customer", "WALK-IN").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(app.database().exists(PATCH_RUN, "seed_customer").unwrap());

        let report = app.patches().run_pending(&app).unwrap();
        assert_eq!(report.applied_count(), 0);
        assert_eq!(report.skipped, ["seed_customer", "count"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_patch_is_rolled_back_and_retried_later() {
        let app = builder().open().unwrap();
        let mut runner = PatchRunner::new();
        runner.register(Patch::new("half_done", |app| {
            let mut doc = app.new_doc(
                "Customer",
                &json!({"name": "GHOST", "customer_name": "Ghost"}),
            )?;
            doc.insert(app)?;
            Err(CoreError::validation("stop"))
        }));
        runner.register(Patch::new("fine", |_| Ok(())));

        let report = runner.run_pending(&app).unwrap();
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.applied_count(), 1);
        assert_eq!(report.results[0].error.as_deref(), Some("stop"));
        assert!(!app.database().exists("Customer", "GHOST").unwrap());
        assert_eq!(runner.pending(&app).unwrap(), ["half_done"]);
    }
}
