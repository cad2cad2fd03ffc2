//! Step handlers: one per step kind, selected by the kind of the step.

mod agent;
mod condition;
mod parallel;
mod render;
mod tool;
mod transform;

use std::sync::Arc;

use async_trait::async_trait;
use braid_workflow::{Step, StepKind};
use serde_json::Value;

use crate::collaborator::{AgentCollaborator, ToolCollaborator};
use crate::context::StepContext;
use crate::result::{StepError, StepResult};

pub use agent::AgentHandler;
pub use condition::ConditionHandler;
pub use parallel::ParallelGroupHandler;
pub use tool::ToolHandler;
pub use transform::{TransformFn, TransformHandler, TransformRegistry};

/// A successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
  pub value: Value,
  /// Results of nested steps run as part of this one.
  pub children: Vec<StepResult>,
}

impl From<Value> for StepOutput {
  fn from(value: Value) -> Self {
    Self {
      value,
      children: Vec::new(),
    }
  }
}

/// A failed attempt, with any nested results produced before it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
  pub error: StepError,
  pub children: Vec<StepResult>,
}

impl From<StepError> for StepFailure {
  fn from(error: StepError) -> Self {
    Self {
      error,
      children: Vec::new(),
    }
  }
}

/// Executes one attempt of a step. Retries, timeouts, and failure policies
/// are applied around the handler, never inside it.
#[async_trait]
pub trait StepHandler: Send + Sync {
  async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepFailure>;

  /// Whether a cancelled attempt should be awaited rather than dropped. A
  /// handler that returns true must stop promptly once the context's token
  /// is cancelled and report the nested results it has.
  fn drains_on_cancel(&self) -> bool {
    false
  }
}

/// The handler set, one per step kind.
pub(crate) struct Handlers {
  agent: AgentHandler,
  tool: ToolHandler,
  condition: ConditionHandler,
  transform: TransformHandler,
  parallel: ParallelGroupHandler,
}

impl Handlers {
  pub fn new(
    agent: Arc<dyn AgentCollaborator>,
    tool: Arc<dyn ToolCollaborator>,
    transforms: TransformRegistry,
  ) -> Self {
    Self {
      agent: AgentHandler::new(agent),
      tool: ToolHandler::new(tool),
      condition: ConditionHandler,
      transform: TransformHandler::new(transforms),
      parallel: ParallelGroupHandler,
    }
  }

  pub fn for_kind(&self, kind: &StepKind) -> &dyn StepHandler {
    match kind {
      StepKind::Agent(_) => &self.agent,
      StepKind::Tool(_) => &self.tool,
      StepKind::Condition(_) => &self.condition,
      StepKind::Transform(_) => &self.transform,
      StepKind::ParallelGroup(_) => &self.parallel,
    }
  }
}

/// Resolve a step's input binding against the dispatch-time scope.
pub(crate) fn resolve_input(step: &Step, ctx: &StepContext) -> Result<Value, StepError> {
  Ok(braid_expression::resolve_value(&step.input, ctx.scope())?)
}

fn wrong_kind(step: &Step, expected: &str) -> StepFailure {
  StepError::validation(format!(
    "step '{}' is a {} step, expected {expected}",
    step.step_id,
    step.kind.name()
  ))
  .into()
}
