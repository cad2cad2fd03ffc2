use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::RetryPolicy;
use crate::step::StepDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  /// Declared variables with their default values.
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub variables: Map<String, Value>,
  pub steps: Vec<StepDef>,
  /// Default per-attempt timeout for steps that do not set one.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  /// Budget for the whole execution.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub workflow_timeout_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry: Option<RetryPolicy>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub final_result: Option<FinalResultDef>,
}

/// How the workflow's final result is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalResultDef {
  /// The result of one step.
  Step(String),
  /// A template resolved against the finished execution scope.
  Combine(Value),
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::{FailurePolicy, StepKindDef, TransformDef};

  #[test]
  fn test_deserialize_workflow() {
    let def: WorkflowDef = serde_json::from_value(json!({
      "workflow_id": "wf",
      "name": "Example",
      "variables": { "limit": 3 },
      "steps": [
        { "step_id": "fetch", "type": "tool", "method": "http.get", "input": { "url": "{{ input.url }}" } },
        {
          "step_id": "shape",
          "type": "transform",
          "transform": { "function": "expression", "expression": "value.body" },
          "depends_on": ["fetch"],
          "input": "{{ steps.fetch.result }}",
          "on_failure": { "policy": "substitute", "value": null }
        },
        {
          "step_id": "fan",
          "type": "parallel_group",
          "depends_on": ["shape"],
          "steps": [
            { "step_id": "a", "type": "agent", "input": "summarize" },
            { "step_id": "b", "type": "tool", "method": "store" }
          ]
        }
      ],
      "final_result": { "step": "fan" }
    }))
    .unwrap();

    assert_eq!(def.steps.len(), 3);
    assert!(matches!(&def.steps[0].kind, StepKindDef::Tool { method } if method == "http.get"));
    assert!(matches!(
      &def.steps[1].kind,
      StepKindDef::Transform { transform: TransformDef::Expression { expression } } if expression == "value.body"
    ));
    assert_eq!(def.steps[1].on_failure, FailurePolicy::Substitute { value: Value::Null });
    match &def.steps[2].kind {
      StepKindDef::ParallelGroup { steps, fail_fast } => {
        assert_eq!(steps.len(), 2);
        assert!(!fail_fast);
      }
      other => panic!("unexpected kind {other:?}"),
    }
    assert_eq!(def.final_result, Some(FinalResultDef::Step("fan".to_string())));
  }

  #[test]
  fn test_variables_keep_declaration_order() {
    let def: WorkflowDef = serde_json::from_str(
      r#"{"workflow_id":"wf","name":"n","variables":{"zeta":1,"alpha":2},"steps":[]}"#,
    )
    .unwrap();
    let keys: Vec<_> = def.variables.keys().cloned().collect();
    assert_eq!(keys, vec!["zeta", "alpha"]);
  }
}
