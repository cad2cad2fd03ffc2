use std::sync::Arc;

use async_trait::async_trait;
use braid_workflow::{Step, StepKind};
use serde_json::Value;

use super::{StepFailure, StepHandler, StepOutput, resolve_input, wrong_kind};
use crate::collaborator::AgentCollaborator;
use crate::context::StepContext;
use crate::result::StepError;

/// Sends the resolved input to the agent collaborator as a prompt.
pub struct AgentHandler {
  collaborator: Arc<dyn AgentCollaborator>,
}

impl AgentHandler {
  pub fn new(collaborator: Arc<dyn AgentCollaborator>) -> Self {
    Self { collaborator }
  }
}

#[async_trait]
impl StepHandler for AgentHandler {
  async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepFailure> {
    let StepKind::Agent(agent) = &step.kind else {
      return Err(wrong_kind(step, "agent"));
    };

    let prompt = match resolve_input(step, ctx)? {
      Value::String(text) => text,
      Value::Null => String::new(),
      other => other.to_string(),
    };

    let text = self
      .collaborator
      .invoke(&prompt, &agent.config)
      .await
      .map_err(StepError::from)?;

    Ok(Value::String(text).into())
  }
}
