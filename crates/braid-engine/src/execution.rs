//! The coordinator loop for a single execution.

use std::collections::HashMap;
use std::sync::Arc;

use braid_config::FinalResultDef;
use braid_workflow::{ConditionStep, Graph, Step, WorkflowDefinition};
use serde_json::{Map, Value};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info, warn};

use crate::context::{ExecutionSettings, StepContext, WorkflowContext};
use crate::error::EngineError;
use crate::events::ExecutionEvent;
use crate::result::{ErrorKind, FailureDetail, StepError, StepResult, StepStatus, WorkflowResult, WorkflowStatus};
use crate::retry::{StepRun, StepRunner};
use crate::scheduler::{Scheduler, SchedulingPolicy};

pub(crate) struct Execution<'a> {
  definition: &'a WorkflowDefinition,
  graph: Graph,
  scheduler: Scheduler,
  steps: HashMap<String, Arc<Step>>,
  context: WorkflowContext,
  statuses: HashMap<String, StepStatus>,
  settings: Arc<ExecutionSettings>,
  runner: Arc<StepRunner>,
  execution_id: Arc<str>,
  /// Cancelled by the caller.
  external: CancellationToken,
  /// Observed by running steps. Cancelled on interruption or failure.
  steps_cancel: CancellationToken,
  failure: Option<FailureDetail>,
  interruption: Option<String>,
}

impl<'a> Execution<'a> {
  pub fn new(
    definition: &'a WorkflowDefinition,
    execution_id: String,
    input: Value,
    policy: Box<dyn SchedulingPolicy>,
    settings: Arc<ExecutionSettings>,
    runner: Arc<StepRunner>,
    cancel: CancellationToken,
  ) -> Self {
    let steps = definition
      .steps
      .iter()
      .map(|s| (s.step_id.clone(), Arc::new(s.clone())))
      .collect();
    let statuses = definition
      .steps
      .iter()
      .map(|s| (s.step_id.clone(), StepStatus::Pending))
      .collect();

    Self {
      definition,
      graph: definition.graph(),
      scheduler: Scheduler::new(definition, policy),
      steps,
      context: WorkflowContext::new(execution_id.clone(), input, &definition.variables),
      statuses,
      settings,
      runner,
      execution_id: Arc::from(execution_id),
      steps_cancel: cancel.child_token(),
      external: cancel,
      failure: None,
      interruption: None,
    }
  }

  pub async fn run(mut self) -> Result<WorkflowResult, EngineError> {
    let mut running: JoinSet<StepRun> = JoinSet::new();
    let mut in_flight: HashMap<Id, String> = HashMap::new();
    let deadline = self.definition.workflow_timeout.map(|limit| (Instant::now() + limit, limit));

    loop {
      if !self.halted() {
        self.skip_after_skipped_dependencies()?;
        for step_id in self.scheduler.next(&self.statuses, running.len()) {
          self.dispatch(&step_id, &mut running, &mut in_flight);
        }
      }

      if running.is_empty() {
        break;
      }

      let timeout = async {
        match deadline {
          Some((at, _)) => tokio::time::sleep_until(at).await,
          None => std::future::pending().await,
        }
      };

      tokio::select! {
        joined = running.join_next_with_id() => match joined {
          Some(Ok((id, run))) => {
            in_flight.remove(&id);
            self.complete(run)?;
          }
          Some(Err(e)) => {
            let step_id = in_flight.remove(&e.id()).unwrap_or_default();
            self.task_failed(step_id, e)?;
          }
          None => break,
        },
        _ = self.external.cancelled(), if !self.halted() => {
          self.interrupt("execution cancelled".to_string());
        }
        _ = timeout, if !self.halted() => {
          let limit = deadline.map(|(_, limit)| limit.as_millis()).unwrap_or_default();
          self.interrupt(format!("workflow timed out after {limit}ms"));
        }
      }
    }

    self.finish()
  }

  fn halted(&self) -> bool {
    self.failure.is_some() || self.interruption.is_some()
  }

  fn dispatch(&mut self, step_id: &str, running: &mut JoinSet<StepRun>, in_flight: &mut HashMap<Id, String>) {
    let Some(step) = self.steps.get(step_id).cloned() else {
      return;
    };
    self.statuses.insert(step_id.to_string(), StepStatus::Running);

    let ctx = StepContext::new(
      self.execution_id.clone(),
      Arc::new(self.context.scope()),
      self.steps_cancel.clone(),
      self.settings.clone(),
      self.runner.clone(),
    );
    let runner = self.runner.clone();
    let handle = running.spawn(async move { runner.run(&step, &ctx).await }.instrument(Span::current()));
    in_flight.insert(handle.id(), step_id.to_string());
  }

  fn complete(&mut self, run: StepRun) -> Result<(), EngineError> {
    let StepRun { result, children } = run;
    for child in children {
      self.context.record(child)?;
    }

    let step_id = result.step_id.clone();
    self.statuses.insert(step_id.clone(), result.status);

    match result.status {
      StepStatus::Completed => {
        let chosen = result.result.as_str().map(str::to_string);
        let condition = self.steps.get(&step_id).and_then(|s| s.as_condition().cloned());
        self.context.record(result)?;
        if let Some(condition) = condition {
          self.apply_branch(&step_id, &condition, chosen.as_deref())?;
        }
        Ok(())
      }
      StepStatus::Failed => {
        if self.failure.is_none() {
          let error = result
            .error
            .clone()
            .unwrap_or_else(|| StepError::execution("step failed"));
          self.failure = Some(FailureDetail {
            step_id: Some(step_id),
            kind: error.kind,
            message: error.message,
          });
          self.steps_cancel.cancel();
        }
        self.context.record(result)
      }
      _ => self.context.record(result),
    }
  }

  /// Skip everything that only the branch not taken leads to.
  fn apply_branch(&mut self, condition_id: &str, condition: &ConditionStep, chosen: Option<&str>) -> Result<(), EngineError> {
    for branch in condition.branches() {
      if Some(branch) == chosen {
        continue;
      }
      for step_id in self.graph.exclusive_descendants(branch) {
        if self.statuses.get(&step_id) == Some(&StepStatus::Pending) {
          self.skip(&step_id, format!("branch '{branch}' not taken by condition '{condition_id}'"))?;
        }
      }
    }
    Ok(())
  }

  fn skip_after_skipped_dependencies(&mut self) -> Result<(), EngineError> {
    let definition = self.definition;
    loop {
      let to_skip: Vec<&str> = definition
        .steps
        .iter()
        .filter(|s| s.skip_on_skipped_dependency)
        .filter(|s| self.statuses.get(&s.step_id) == Some(&StepStatus::Pending))
        .filter(|s| {
          let deps = self.scheduler.dependencies(&s.step_id);
          let statuses: Vec<_> = deps.iter().filter_map(|d| self.statuses.get(d)).collect();
          statuses.len() == deps.len()
            && statuses.iter().all(|st| st.satisfies_dependency())
            && statuses.iter().any(|st| **st == StepStatus::Skipped)
        })
        .map(|s| s.step_id.as_str())
        .collect();

      if to_skip.is_empty() {
        return Ok(());
      }
      for step_id in to_skip {
        self.skip(step_id, "a dependency was skipped".to_string())?;
      }
    }
  }

  fn skip(&mut self, step_id: &str, reason: String) -> Result<(), EngineError> {
    info!(step_id, reason = %reason, "step_skipped");
    self.statuses.insert(step_id.to_string(), StepStatus::Skipped);
    self.settings.notifier.notify(ExecutionEvent::StepSkipped {
      execution_id: self.execution_id.to_string(),
      step_id: step_id.to_string(),
      reason,
    });
    self
      .context
      .record(StepResult::skipped(step_id, self.runner.clock().now()))
  }

  fn task_failed(&mut self, step_id: String, error: JoinError) -> Result<(), EngineError> {
    let message = if error.is_panic() {
      "step task panicked".to_string()
    } else {
      "step task was aborted".to_string()
    };
    warn!(step_id = %step_id, error = %message, "step_failed");
    let now = self.runner.clock().now();
    self.complete(StepRun {
      result: StepResult {
        status: StepStatus::Failed,
        error: Some(StepError::execution(message)),
        start_time: Some(now),
        end_time: Some(now),
        attempt_count: 1,
        ..StepResult::pending(step_id)
      },
      children: Vec::new(),
    })
  }

  fn interrupt(&mut self, reason: String) {
    warn!(reason = %reason, "cancelling running steps");
    self.interruption = Some(reason);
    self.steps_cancel.cancel();
  }

  fn finish(mut self) -> Result<WorkflowResult, EngineError> {
    let definition = self.definition;
    for step in definition.all_steps() {
      if self.context.get(&step.step_id).is_none() {
        self.context.record(StepResult::pending(&step.step_id))?;
      }
    }

    let unfinished: Vec<&str> = definition
      .steps
      .iter()
      .filter(|s| !self.statuses.get(&s.step_id).is_some_and(StepStatus::satisfies_dependency))
      .map(|s| s.step_id.as_str())
      .collect();

    let mut failure = self.failure.take();
    let status = if failure.is_some() {
      WorkflowStatus::Failed
    } else if unfinished.is_empty() {
      WorkflowStatus::Completed
    } else if let Some(reason) = self.interruption.take() {
      failure = Some(FailureDetail {
        step_id: None,
        kind: ErrorKind::Cancellation,
        message: reason,
      });
      WorkflowStatus::Cancelled
    } else {
      failure = Some(FailureDetail {
        step_id: unfinished.first().map(|s| s.to_string()),
        kind: ErrorKind::StepExecution,
        message: format!("steps never became ready: {}", unfinished.join(", ")),
      });
      WorkflowStatus::Failed
    };

    let (status, final_result) = if status == WorkflowStatus::Completed {
      match self.final_result() {
        Ok(value) => (status, value),
        Err(e) => {
          failure = Some(FailureDetail {
            step_id: None,
            kind: e.kind,
            message: format!("failed to build final result: {}", e.message),
          });
          (WorkflowStatus::Failed, Value::Null)
        }
      }
    } else {
      (status, Value::Null)
    };

    Ok(WorkflowResult {
      workflow_id: definition.workflow_id.clone(),
      execution_id: self.execution_id.to_string(),
      status,
      step_results: self.context.into_results(),
      final_result,
      failure,
    })
  }

  fn final_result(&self) -> Result<Value, StepError> {
    let completed = |step_id: &str| {
      self
        .context
        .get(step_id)
        .filter(|r| r.status == StepStatus::Completed)
        .map(|r| r.result.clone())
    };

    match &self.definition.final_result {
      Some(FinalResultDef::Step(step_id)) => Ok(completed(step_id).unwrap_or(Value::Null)),
      Some(FinalResultDef::Combine(template)) => {
        Ok(braid_expression::resolve_value(template, &self.context.scope())?)
      }
      None => {
        let mut results: Vec<(&str, Value)> = self
          .graph
          .terminals()
          .into_iter()
          .filter_map(|id| completed(id).map(|value| (id, value)))
          .collect();
        Ok(match results.len() {
          0 => Value::Null,
          1 => results.remove(0).1,
          _ => Value::Object(
            results
              .into_iter()
              .map(|(id, value)| (id.to_string(), value))
              .collect::<Map<String, Value>>(),
          ),
        })
      }
    }
  }
}
