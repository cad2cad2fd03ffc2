use std::collections::HashMap;

use async_trait::async_trait;
use braid_workflow::{Step, StepKind};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::{Map, Value};
use tracing::debug;

use super::{StepFailure, StepHandler, StepOutput, wrong_kind};
use crate::context::StepContext;
use crate::result::{StepError, StepResult, StepStatus};
use crate::retry::StepRun;

/// Runs sub-steps concurrently, each through the full retry and timeout
/// handling. The result maps sub-step ids to their results in declaration
/// order, whatever order they finish in.
///
/// The group fails if any sub-step fails. With `fail_fast`, the first failure
/// cancels the sub-steps still running. A cancelled or timed out group waits
/// for its sub-steps to wind down and reports every one of them.
pub struct ParallelGroupHandler;

#[async_trait]
impl StepHandler for ParallelGroupHandler {
  async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepFailure> {
    let StepKind::ParallelGroup(group) = &step.kind else {
      return Err(wrong_kind(step, "parallel_group"));
    };

    let group_cancel = ctx.cancellation().child_token();
    let mut pending: FuturesUnordered<_> = group
      .steps
      .iter()
      .map(|sub| {
        let sub_ctx = ctx.with_cancel(group_cancel.clone());
        async move { ctx.runner().run(sub, &sub_ctx).await }
      })
      .collect();

    let mut finished: HashMap<String, StepRun> = HashMap::with_capacity(group.steps.len());
    let mut first_failure: Option<(String, StepError)> = None;

    while let Some(run) = pending.next().await {
      let result = &run.result;
      if result.status == StepStatus::Failed && first_failure.is_none() {
        let error = result
          .error
          .clone()
          .unwrap_or_else(|| StepError::execution("sub-step failed"));
        first_failure = Some((result.step_id.clone(), error));
        if group.fail_fast {
          debug!(step_id = %step.step_id, failed = %result.step_id, "cancelling remaining sub-steps");
          group_cancel.cancel();
        }
      }
      finished.insert(result.step_id.clone(), run);
    }

    // Sub-steps only come back cancelled when the group itself is being
    // cancelled or timed out, or a fail-fast sibling failed.
    let mut values = Map::with_capacity(group.steps.len());
    let mut children: Vec<StepResult> = Vec::new();
    let mut cancelled = false;
    for sub in &group.steps {
      let Some(run) = finished.remove(&sub.step_id) else {
        continue;
      };
      cancelled |= run.result.status == StepStatus::Cancelled;
      values.insert(sub.step_id.clone(), run.result.result.clone());
      children.push(run.result);
      children.extend(run.children);
    }

    if let Some((failed_id, error)) = first_failure {
      return Err(StepFailure {
        error: StepError::new(
          error.kind,
          format!("sub-step '{failed_id}' of group '{}' failed: {}", step.step_id, error.message),
        ),
        children,
      });
    }
    if cancelled {
      return Err(StepFailure {
        error: StepError::cancelled(),
        children,
      });
    }

    Ok(StepOutput {
      value: Value::Object(values),
      children,
    })
  }

  fn drains_on_cancel(&self) -> bool {
    true
  }
}
