use std::time::Duration;

use braid_config::{StepDef, StepKindDef, WorkflowDef};

use crate::error::BuildError;
use crate::step::{AgentStep, ConditionStep, ParallelGroup, Step, StepKind, ToolStep};
use crate::workflow::WorkflowDefinition;

/// Build a definition from its serialized form.
///
/// Only per-step shape is checked here. Dependencies, cycles, and branch
/// targets are left to [`crate::validate`] so every problem is reported at once.
pub fn build(def: &WorkflowDef) -> Result<WorkflowDefinition, BuildError> {
  if def.workflow_id.trim().is_empty() {
    return Err(BuildError::EmptyWorkflowId);
  }

  let steps = def
    .steps
    .iter()
    .enumerate()
    .map(|(position, step)| build_step(position, step))
    .collect::<Result<Vec<_>, _>>()?;

  Ok(WorkflowDefinition {
    workflow_id: def.workflow_id.clone(),
    name: def.name.clone(),
    steps,
    variables: def.variables.clone(),
    default_timeout: def.timeout_ms.map(Duration::from_millis),
    workflow_timeout: def.workflow_timeout_ms.map(Duration::from_millis),
    retry: def.retry.clone(),
    final_result: def.final_result.clone(),
  })
}

fn build_step(position: usize, def: &StepDef) -> Result<Step, BuildError> {
  if def.step_id.trim().is_empty() {
    return Err(BuildError::EmptyStepId { position });
  }

  let kind = match &def.kind {
    StepKindDef::Agent { config } => StepKind::Agent(AgentStep {
      config: config.clone(),
    }),
    StepKindDef::Tool { method } => {
      if method.trim().is_empty() {
        return Err(BuildError::EmptyToolMethod {
          step_id: def.step_id.clone(),
        });
      }
      StepKind::Tool(ToolStep {
        method: method.clone(),
      })
    }
    StepKindDef::Condition {
      expression,
      true_step,
      false_step,
    } => {
      if expression.trim().is_empty() {
        return Err(BuildError::EmptyCondition {
          step_id: def.step_id.clone(),
        });
      }
      StepKind::Condition(ConditionStep {
        expression: expression.clone(),
        true_step: true_step.clone(),
        false_step: false_step.clone(),
      })
    }
    StepKindDef::Transform { transform } => StepKind::Transform(transform.clone()),
    StepKindDef::ParallelGroup { steps, fail_fast } => StepKind::ParallelGroup(ParallelGroup {
      steps: steps
        .iter()
        .enumerate()
        .map(|(i, sub)| build_step(i, sub))
        .collect::<Result<Vec<_>, _>>()?,
      fail_fast: *fail_fast,
    }),
  };

  let mut depends_on: Vec<String> = Vec::with_capacity(def.depends_on.len());
  for dep in &def.depends_on {
    if !depends_on.contains(dep) {
      depends_on.push(dep.clone());
    }
  }

  Ok(Step {
    step_id: def.step_id.clone(),
    kind,
    depends_on,
    input: def.input.clone(),
    timeout: def.timeout_ms.map(Duration::from_millis),
    retry_count: def.retry_count,
    on_failure: def.on_failure.clone(),
    requires: def.requires.clone(),
    skip_on_skipped_dependency: def.skip_on_skipped_dependency,
    cost: def.cost,
  })
}
