//! EXECUTE_FAILURE handling
//!
//! Whether a failed statement aborts the saga, is skipped, or only recorded is
//! a decision of the external transaction manager. The coordinator asks an
//! `ExecutionFailurePolicy` and applies the returned action.

use crate::event::SqlExecutionEvent;

/// What the coordinator does with a failed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureAction {
    /// Log the failure, leave the graph untouched
    Record,
    /// Close the current level so later statements do not depend on the
    /// failed statement's siblings being joined with it
    SkipLevel,
    /// Report `SagaError::ExecutionFailure` to the caller; the graph is kept
    /// so the transaction can still be rolled back
    Abort,
}

impl FailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureAction::Record => "record",
            FailureAction::SkipLevel => "skip_level",
            FailureAction::Abort => "abort",
        }
    }
}

/// Decides the graph effect of an EXECUTE_FAILURE event
pub trait ExecutionFailurePolicy: Send + Sync {
    fn on_failure(&self, event: &SqlExecutionEvent) -> FailureAction;
}

/// Default: record only
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOnly;

impl ExecutionFailurePolicy for RecordOnly {
    fn on_failure(&self, _event: &SqlExecutionEvent) -> FailureAction {
        FailureAction::Record
    }
}

/// Always returns the same action
#[derive(Debug, Clone, Copy)]
pub struct FixedFailureAction(pub FailureAction);

impl ExecutionFailurePolicy for FixedFailureAction {
    fn on_failure(&self, _event: &SqlExecutionEvent) -> FailureAction {
        self.0
    }
}

impl<F> ExecutionFailurePolicy for F
where
    F: Fn(&SqlExecutionEvent) -> FailureAction + Send + Sync,
{
    fn on_failure(&self, event: &SqlExecutionEvent) -> FailureAction {
        self(event)
    }
}
