//! Lifecycle hooks.

use super::Document;
use crate::context::App;
use crate::error::CoreResult;
use std::fmt;

/// A point in a document's lifecycle where controllers and listeners run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Hook {
    Validate,
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    AfterSave,
    BeforeSubmit,
    AfterSubmit,
    BeforeRevert,
    AfterRevert,
    BeforeDelete,
    AfterDelete,
    BeforeRename,
    AfterRename,
    BeforeSync,
    AfterSync,
}

impl Hook {
    /// Event name fired on the document's observable.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::BeforeInsert => "before_insert",
            Self::AfterInsert => "after_insert",
            Self::BeforeUpdate => "before_update",
            Self::AfterUpdate => "after_update",
            Self::AfterSave => "after_save",
            Self::BeforeSubmit => "before_submit",
            Self::AfterSubmit => "after_submit",
            Self::BeforeRevert => "before_revert",
            Self::AfterRevert => "after_revert",
            Self::BeforeDelete => "before_delete",
            Self::AfterDelete => "after_delete",
            Self::BeforeRename => "before_rename",
            Self::AfterRename => "after_rename",
            Self::BeforeSync => "before_sync",
            Self::AfterSync => "after_sync",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-doctype lifecycle behaviour.
///
/// A controller is registered once per doctype (entities `based_on` it
/// inherit it) and is called for every hook before the document's own
/// listeners. Returning an error from a `before_*` hook or `validate`
/// aborts the operation and rolls back its transaction.
///
/// Closures taking `(Hook, &mut Document, &App)` implement this trait:
///
/// ```rust,ignore
/// builder.controller("ToDo", |hook: Hook, doc: &mut Document, _app: &App| {
///     if hook == Hook::Validate && doc.get_str("subject").len() > 140 {
///         return Err(CoreError::validation("Subject is too long"));
///     }
///     Ok(())
/// });
/// ```
pub trait Controller: Send + Sync {
    /// Handles one hook.
    ///
    /// # Errors
    ///
    /// Any error aborts the surrounding operation.
    fn handle(&self, hook: Hook, doc: &mut Document, app: &App) -> CoreResult<()>;
}

impl<F> Controller for F
where
    F: Fn(Hook, &mut Document, &App) -> CoreResult<()> + Send + Sync,
{
    fn handle(&self, hook: Hook, doc: &mut Document, app: &App) -> CoreResult<()> {
        self(hook, doc, app)
    }
}

impl Document {
    /// Runs a hook: the doctype's controller, then the document's listeners.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the controller or a listener.
    pub fn trigger(&mut self, hook: Hook, app: &App) -> CoreResult<()> {
        if let Some(controller) = self.meta().controller().cloned() {
            controller.handle(hook, self, app)?;
        }
        let event = self.event(hook.as_str());
        self.events().trigger(hook.as_str(), &event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_names() {
        assert_eq!(Hook::BeforeInsert.as_str(), "before_insert");
        assert_eq!(Hook::AfterRevert.to_string(), "after_revert");
        assert_eq!(Hook::Validate.as_str(), "validate");
    }
}
