//! Engine error types.

use braid_workflow::ValidationIssue;

/// Errors that stop an execution before or outside step processing.
/// Step failures are reported in the [`crate::WorkflowResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The definition failed static validation. No step was started.
  #[error("workflow '{workflow_id}' is invalid: {}", summarize(issues))]
  Validation {
    workflow_id: String,
    issues: Vec<ValidationIssue>,
  },

  /// A step result was written more than once.
  #[error("result for step '{step_id}' was already recorded")]
  DuplicateWrite { step_id: String },

  /// The background execution task panicked or was aborted.
  #[error("execution task failed: {message}")]
  Join { message: String },
}

fn summarize(issues: &[ValidationIssue]) -> String {
  issues
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}
