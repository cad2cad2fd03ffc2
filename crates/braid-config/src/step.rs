use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::FailurePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub step_id: String,
  #[serde(flatten)]
  pub kind: StepKindDef,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  /// Input binding. String leaves may contain `{{ }}` placeholders.
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub input: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_count: Option<u32>,
  #[serde(default)]
  pub on_failure: FailurePolicy,
  /// Workflow variables this step reads. Each must be declared on the workflow.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub requires: Vec<String>,
  /// Skip instead of running when any dependency was skipped.
  #[serde(default)]
  pub skip_on_skipped_dependency: bool,
  /// Estimated cost used by cost-aware scheduling.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKindDef {
  /// Sends the resolved input as a prompt to the agent collaborator.
  Agent {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    config: Map<String, Value>,
  },
  /// Invokes a method on the tool collaborator with the resolved input as params.
  Tool { method: String },
  /// Evaluates a boolean expression and selects one of two branches.
  Condition {
    expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    true_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    false_step: Option<String>,
  },
  /// Applies a pure function to the resolved input.
  Transform { transform: TransformDef },
  /// Runs nested sub-steps concurrently.
  ParallelGroup {
    steps: Vec<StepDef>,
    #[serde(default)]
    fail_fast: bool,
  },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum TransformDef {
  /// Returns the resolved input unchanged.
  #[default]
  Identity,
  /// Evaluates an expression. The resolved input is visible as `value`.
  Expression { expression: String },
  /// Renders a jinja template and coerces the output.
  Render {
    template: String,
    #[serde(default)]
    output: SchemaType,
  },
  /// Calls a function registered with the engine by name.
  Function { name: String },
}

/// Target type for coercing rendered template output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
  #[default]
  String,
  Number,
  Integer,
  Boolean,
  Array,
  Object,
  Null,
}
