//! Execution state shared between the coordinator and running steps.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use braid_config::RetryPolicy;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::result::StepResult;
use crate::retry::StepRunner;

/// Results accumulated during one execution.
///
/// Owned by the coordinator loop, which is its only writer. Running steps see
/// immutable snapshots taken at dispatch time.
#[derive(Debug)]
pub struct WorkflowContext {
  execution_id: String,
  input: Value,
  variables: Map<String, Value>,
  step_results: BTreeMap<String, StepResult>,
}

impl WorkflowContext {
  /// Variables start from the declared defaults. Every key of an object
  /// input is merged over them, declared or not.
  pub fn new(execution_id: impl Into<String>, input: Value, declared: &Map<String, Value>) -> Self {
    let mut variables = declared.clone();
    if let Value::Object(overrides) = &input {
      for (name, value) in overrides {
        variables.insert(name.clone(), value.clone());
      }
    }

    Self {
      execution_id: execution_id.into(),
      input,
      variables,
      step_results: BTreeMap::new(),
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// Record a step's terminal result. Each step is written exactly once.
  pub fn record(&mut self, result: StepResult) -> Result<(), EngineError> {
    if self.step_results.contains_key(&result.step_id) {
      return Err(EngineError::DuplicateWrite {
        step_id: result.step_id,
      });
    }
    self.step_results.insert(result.step_id.clone(), result);
    Ok(())
  }

  pub fn get(&self, step_id: &str) -> Option<&StepResult> {
    self.step_results.get(step_id)
  }

  /// The value templates and expressions are evaluated against.
  pub fn scope(&self) -> Value {
    let steps: Map<String, Value> = self
      .step_results
      .iter()
      .map(|(id, r)| {
        let error = r
          .error
          .as_ref()
          .map(|e| json!({ "kind": e.kind, "message": e.message }))
          .unwrap_or(Value::Null);
        (
          id.clone(),
          json!({ "status": r.status, "result": r.result, "error": error }),
        )
      })
      .collect();

    json!({
      "execution_id": self.execution_id,
      "input": self.input,
      "variables": self.variables,
      "steps": steps,
    })
  }

  pub fn into_results(self) -> BTreeMap<String, StepResult> {
    self.step_results
  }
}

/// Per-execution settings every step attempt reads.
pub(crate) struct ExecutionSettings {
  pub retry: RetryPolicy,
  pub default_timeout: Option<Duration>,
  pub notifier: Arc<dyn ExecutionNotifier>,
}

/// What a handler sees while executing a step.
#[derive(Clone)]
pub struct StepContext {
  execution_id: Arc<str>,
  scope: Arc<Value>,
  cancel: CancellationToken,
  settings: Arc<ExecutionSettings>,
  runner: Arc<StepRunner>,
}

impl StepContext {
  pub(crate) fn new(
    execution_id: Arc<str>,
    scope: Arc<Value>,
    cancel: CancellationToken,
    settings: Arc<ExecutionSettings>,
    runner: Arc<StepRunner>,
  ) -> Self {
    Self {
      execution_id,
      scope,
      cancel,
      settings,
      runner,
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// Snapshot of the execution scope taken when the step was dispatched.
  pub fn scope(&self) -> &Value {
    &self.scope
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  /// A copy of this context observing a different cancellation token.
  pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
    Self {
      cancel,
      ..self.clone()
    }
  }

  pub(crate) fn settings(&self) -> &ExecutionSettings {
    &self.settings
  }

  pub(crate) fn runner(&self) -> &StepRunner {
    &self.runner
  }

  pub(crate) fn notify(&self, event: ExecutionEvent) {
    self.settings.notifier.notify(event);
  }
}
