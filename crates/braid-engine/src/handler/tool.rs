use std::sync::Arc;

use async_trait::async_trait;
use braid_workflow::{Step, StepKind};
use serde_json::{Map, Value};

use super::{StepFailure, StepHandler, StepOutput, resolve_input, wrong_kind};
use crate::collaborator::ToolCollaborator;
use crate::context::StepContext;
use crate::result::{ErrorKind, StepError};

/// Invokes a tool method with the resolved input object as parameters.
pub struct ToolHandler {
  collaborator: Arc<dyn ToolCollaborator>,
}

impl ToolHandler {
  pub fn new(collaborator: Arc<dyn ToolCollaborator>) -> Self {
    Self { collaborator }
  }
}

#[async_trait]
impl StepHandler for ToolHandler {
  async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepFailure> {
    let StepKind::Tool(tool) = &step.kind else {
      return Err(wrong_kind(step, "tool"));
    };

    let params = match resolve_input(step, ctx)? {
      Value::Object(map) => map,
      Value::Null => Map::new(),
      other => {
        return Err(
          StepError::new(
            ErrorKind::Expression,
            format!(
              "input of tool step '{}' must resolve to an object, got {}",
              step.step_id,
              braid_expression::type_name(&other)
            ),
          )
          .into(),
        );
      }
    };

    let value = self
      .collaborator
      .invoke(&tool.method, &params)
      .await
      .map_err(StepError::from)?;

    Ok(value.into())
  }
}
