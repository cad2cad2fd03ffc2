use async_trait::async_trait;
use braid_workflow::{Step, StepKind};
use serde_json::Value;

use super::{StepFailure, StepHandler, StepOutput, wrong_kind};
use crate::context::StepContext;
use crate::result::StepError;

/// Evaluates the condition and returns the id of the chosen branch, or null
/// when the chosen side has no target.
///
/// The expression may be bare (`steps.a.result > 3`) or a single placeholder.
pub struct ConditionHandler;

#[async_trait]
impl StepHandler for ConditionHandler {
  async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepFailure> {
    let StepKind::Condition(condition) = &step.kind else {
      return Err(wrong_kind(step, "condition"));
    };

    let value = braid_expression::evaluate(&condition.expression, ctx.scope()).map_err(StepError::from)?;

    let chosen = if braid_expression::is_truthy(&value) {
      &condition.true_step
    } else {
      &condition.false_step
    };

    Ok(chosen.clone().map(Value::String).unwrap_or(Value::Null).into())
  }
}
