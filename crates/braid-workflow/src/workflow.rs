use std::time::Duration;

use braid_config::{FinalResultDef, RetryPolicy};
use serde_json::{Map, Value};

use crate::graph::Graph;
use crate::step::Step;

/// A workflow ready for validation and execution.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
  pub workflow_id: String,
  pub name: String,
  pub steps: Vec<Step>,
  /// Declared variables and their defaults.
  pub variables: Map<String, Value>,
  pub default_timeout: Option<Duration>,
  pub workflow_timeout: Option<Duration>,
  /// Falls back to the engine's configured policy.
  pub retry: Option<RetryPolicy>,
  pub final_result: Option<FinalResultDef>,
}

impl WorkflowDefinition {
  pub fn builder(workflow_id: impl Into<String>, name: impl Into<String>) -> WorkflowBuilder {
    WorkflowBuilder::new(workflow_id, name)
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.steps)
  }

  /// Get a top-level step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.step_id == step_id)
  }

  /// Every step including parallel group sub-steps, depth first.
  pub fn all_steps(&self) -> Vec<&Step> {
    fn walk<'a>(steps: &'a [Step], out: &mut Vec<&'a Step>) {
      for step in steps {
        out.push(step);
        walk(step.sub_steps(), out);
      }
    }
    let mut out = Vec::new();
    walk(&self.steps, &mut out);
    out
  }
}

/// Fluent construction of a [`WorkflowDefinition`].
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
  definition: WorkflowDefinition,
}

impl WorkflowBuilder {
  pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      definition: WorkflowDefinition {
        workflow_id: workflow_id.into(),
        name: name.into(),
        steps: Vec::new(),
        variables: Map::new(),
        default_timeout: None,
        workflow_timeout: None,
        retry: None,
        final_result: None,
      },
    }
  }

  pub fn step(mut self, step: Step) -> Self {
    self.definition.steps.push(step);
    self
  }

  pub fn variable(mut self, name: impl Into<String>, default: Value) -> Self {
    self.definition.variables.insert(name.into(), default);
    self
  }

  pub fn default_timeout(mut self, timeout: Duration) -> Self {
    self.definition.default_timeout = Some(timeout);
    self
  }

  pub fn workflow_timeout(mut self, timeout: Duration) -> Self {
    self.definition.workflow_timeout = Some(timeout);
    self
  }

  pub fn retry(mut self, policy: RetryPolicy) -> Self {
    self.definition.retry = Some(policy);
    self
  }

  /// Use one step's result as the workflow result.
  pub fn final_step(mut self, step_id: impl Into<String>) -> Self {
    self.definition.final_result = Some(FinalResultDef::Step(step_id.into()));
    self
  }

  /// Combine results through a template resolved after all steps finish.
  pub fn combine(mut self, template: Value) -> Self {
    self.definition.final_result = Some(FinalResultDef::Combine(template));
    self
  }

  pub fn build(self) -> WorkflowDefinition {
    self.definition
  }
}
