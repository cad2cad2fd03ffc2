//! Braid
//!
//! A workflow engine for declarative step graphs. Steps call out to an agent
//! or a tool, branch on conditions, reshape data, or fan out in parallel
//! groups; the engine resolves their dependencies and runs them under a
//! chosen scheduling strategy with per-step timeouts, retries, and failure
//! policies.
//!
//! ```ignore
//! let definition = braid::from_json(json!({
//!   "workflow_id": "triage",
//!   "name": "Triage",
//!   "steps": [
//!     { "step_id": "fetch", "type": "tool", "method": "tickets.get",
//!       "input": { "id": "{{ input.ticket }}" } },
//!     { "step_id": "summary", "type": "agent", "depends_on": ["fetch"],
//!       "input": "Summarise: {{ steps.fetch.result.body }}" }
//!   ]
//! }))?;
//!
//! let engine = WorkflowEngine::builder().agent(agent).tool(tools).build();
//! let result = engine.execute(&definition, json!({ "ticket": 7 }), Strategy::Sequential).await?;
//! ```

use serde_json::Value;

pub use braid_config::{
  FailurePolicy, FinalResultDef, RetryPolicy, SchemaType, StepDef, StepKindDef, Strategy, TransformDef, WorkflowDef,
};
pub use braid_engine::{
  AgentCollaborator, AgentError, CancellationToken, Clock, EngineBuilder, EngineConfig, EngineError, ErrorKind,
  ExecutionEvent, ExecutionNotifier, ExecutionStream, FailureDetail, ManualClock, StepError, StepResult,
  StepStatus, SystemClock, ToolCollaborator, ToolError, TransformRegistry, WorkflowEngine, WorkflowResult,
  WorkflowStatus,
};
pub use braid_expression::ExpressionError;
pub use braid_workflow::{
  BuildError, Severity, Step, StepKind, ValidationIssue, ValidationResult, WorkflowBuilder, WorkflowDefinition,
  build, validate,
};

/// Errors turning a serialized definition into a built one.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
  #[error("invalid workflow definition: {0}")]
  Deserialize(#[from] serde_json::Error),

  #[error(transparent)]
  Build(#[from] BuildError),
}

/// Deserialize and build a workflow from a JSON value.
///
/// Graph problems are not checked here; call [`validate`] or let the engine
/// reject the definition when it is executed.
pub fn from_json(value: Value) -> Result<WorkflowDefinition, LoadError> {
  let def: WorkflowDef = serde_json::from_value(value)?;
  Ok(build(&def)?)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_from_json_builds_a_definition() {
    let definition = from_json(json!({
      "workflow_id": "triage",
      "name": "Triage",
      "variables": { "queue": "support" },
      "steps": [
        { "step_id": "fetch", "type": "tool", "method": "tickets.get" },
        { "step_id": "summary", "type": "agent", "depends_on": ["fetch"], "input": "{{ steps.fetch.result }}" }
      ]
    }))
    .unwrap();

    assert_eq!(definition.steps.len(), 2);
    assert!(validate(&definition).is_valid);
  }

  #[test]
  fn test_unknown_step_type_is_a_deserialize_error() {
    let err = from_json(json!({ "workflow_id": "x", "name": "x", "steps": [{ "step_id": "a", "type": "teleport" }] }))
      .unwrap_err();
    assert!(matches!(err, LoadError::Deserialize(_)));
  }

  #[test]
  fn test_blank_tool_method_is_a_build_error() {
    let err = from_json(json!({ "workflow_id": "x", "name": "x", "steps": [{ "step_id": "a", "type": "tool", "method": " " }] }))
      .unwrap_err();
    assert!(matches!(err, LoadError::Build(_)));
  }
}
