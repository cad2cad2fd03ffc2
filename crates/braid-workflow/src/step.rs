use std::time::Duration;

use braid_config::{FailurePolicy, TransformDef};
use serde_json::{Map, Value};

/// A unit of work in a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
  pub step_id: String,
  pub kind: StepKind,
  pub depends_on: Vec<String>,
  /// Input binding; string leaves are templates resolved at dispatch time.
  pub input: Value,
  /// Per-attempt timeout. Falls back to the workflow default.
  pub timeout: Option<Duration>,
  /// Falls back to the workflow's retry policy.
  pub retry_count: Option<u32>,
  pub on_failure: FailurePolicy,
  pub requires: Vec<String>,
  pub skip_on_skipped_dependency: bool,
  pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
  Agent(AgentStep),
  Tool(ToolStep),
  Condition(ConditionStep),
  Transform(TransformDef),
  ParallelGroup(ParallelGroup),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentStep {
  /// Passed through to the agent collaborator untouched.
  pub config: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolStep {
  pub method: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionStep {
  pub expression: String,
  pub true_step: Option<String>,
  pub false_step: Option<String>,
}

impl ConditionStep {
  /// Branch targets that exist, true branch first.
  pub fn branches(&self) -> impl Iterator<Item = &str> {
    self.true_step.iter().chain(self.false_step.iter()).map(String::as_str)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParallelGroup {
  pub steps: Vec<Step>,
  /// Cancel the remaining sub-steps as soon as one fails.
  pub fail_fast: bool,
}

impl StepKind {
  pub fn name(&self) -> &'static str {
    match self {
      StepKind::Agent(_) => "agent",
      StepKind::Tool(_) => "tool",
      StepKind::Condition(_) => "condition",
      StepKind::Transform(_) => "transform",
      StepKind::ParallelGroup(_) => "parallel_group",
    }
  }

  /// Dispatch priority used by the priority strategy. Higher runs first.
  pub fn priority(&self) -> u8 {
    match self {
      StepKind::Condition(_) => 3,
      StepKind::Agent(_) => 2,
      StepKind::Tool(_) | StepKind::Transform(_) | StepKind::ParallelGroup(_) => 1,
    }
  }

  pub fn default_cost(&self) -> f64 {
    match self {
      StepKind::Agent(_) => 10.0,
      StepKind::ParallelGroup(_) => 5.0,
      StepKind::Tool(_) => 1.0,
      StepKind::Condition(_) | StepKind::Transform(_) => 0.0,
    }
  }
}

impl Step {
  pub fn new(step_id: impl Into<String>, kind: StepKind) -> Self {
    Self {
      step_id: step_id.into(),
      kind,
      depends_on: Vec::new(),
      input: Value::Null,
      timeout: None,
      retry_count: None,
      on_failure: FailurePolicy::default(),
      requires: Vec::new(),
      skip_on_skipped_dependency: false,
      cost: None,
    }
  }

  /// An agent step whose prompt is the given template.
  pub fn agent(step_id: impl Into<String>, prompt: impl Into<String>) -> Self {
    Self::new(step_id, StepKind::Agent(AgentStep::default())).input(Value::String(prompt.into()))
  }

  pub fn tool(step_id: impl Into<String>, method: impl Into<String>) -> Self {
    Self::new(
      step_id,
      StepKind::Tool(ToolStep {
        method: method.into(),
      }),
    )
  }

  pub fn condition(
    step_id: impl Into<String>,
    expression: impl Into<String>,
    true_step: Option<&str>,
    false_step: Option<&str>,
  ) -> Self {
    Self::new(
      step_id,
      StepKind::Condition(ConditionStep {
        expression: expression.into(),
        true_step: true_step.map(str::to_string),
        false_step: false_step.map(str::to_string),
      }),
    )
  }

  pub fn transform(step_id: impl Into<String>, transform: TransformDef) -> Self {
    Self::new(step_id, StepKind::Transform(transform))
  }

  pub fn parallel(step_id: impl Into<String>, steps: Vec<Step>) -> Self {
    Self::new(
      step_id,
      StepKind::ParallelGroup(ParallelGroup {
        steps,
        fail_fast: false,
      }),
    )
  }

  pub fn depends_on<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    for dep in deps {
      let dep = dep.into();
      if !self.depends_on.contains(&dep) {
        self.depends_on.push(dep);
      }
    }
    self
  }

  pub fn input(mut self, input: Value) -> Self {
    self.input = input;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn retries(mut self, retry_count: u32) -> Self {
    self.retry_count = Some(retry_count);
    self
  }

  pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
    self.on_failure = policy;
    self
  }

  pub fn requires<I, S>(mut self, variables: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.requires.extend(variables.into_iter().map(Into::into));
    self
  }

  pub fn skip_on_skipped_dependency(mut self) -> Self {
    self.skip_on_skipped_dependency = true;
    self
  }

  pub fn cost(mut self, cost: f64) -> Self {
    self.cost = Some(cost);
    self
  }

  pub fn fail_fast(mut self) -> Self {
    if let StepKind::ParallelGroup(group) = &mut self.kind {
      group.fail_fast = true;
    }
    self
  }

  pub fn estimated_cost(&self) -> f64 {
    self.cost.unwrap_or_else(|| self.kind.default_cost())
  }

  pub fn as_condition(&self) -> Option<&ConditionStep> {
    match &self.kind {
      StepKind::Condition(condition) => Some(condition),
      _ => None,
    }
  }

  /// Sub-steps of a parallel group, empty for every other kind.
  pub fn sub_steps(&self) -> &[Step] {
    match &self.kind {
      StepKind::ParallelGroup(group) => &group.steps,
      _ => &[],
    }
  }
}
