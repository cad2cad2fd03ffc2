use thiserror::Error;

/// Structural problems found while building a definition from config.
/// Graph-level problems are reported by the validator instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
  #[error("workflow id must not be empty")]
  EmptyWorkflowId,

  #[error("step at position {position} has an empty step_id")]
  EmptyStepId { position: usize },

  #[error("tool step '{step_id}' has an empty method")]
  EmptyToolMethod { step_id: String },

  #[error("condition step '{step_id}' has an empty expression")]
  EmptyCondition { step_id: String },
}
