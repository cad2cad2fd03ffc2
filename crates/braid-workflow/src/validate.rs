use std::collections::{HashMap, HashSet};
use std::fmt;

use braid_config::{FinalResultDef, TransformDef};

use crate::graph::Graph;
use crate::step::{Step, StepKind};
use crate::workflow::WorkflowDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Error,
  Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
  pub severity: Severity,
  pub step_id: Option<String>,
  pub message: String,
  pub suggestion: String,
}

impl fmt::Display for ValidationIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let level = match self.severity {
      Severity::Error => "error",
      Severity::Warning => "warning",
    };
    match &self.step_id {
      Some(step_id) => write!(f, "{level} [{step_id}]: {} ({})", self.message, self.suggestion),
      None => write!(f, "{level}: {} ({})", self.message, self.suggestion),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
  /// True when there are no error-severity issues. Warnings do not block.
  pub is_valid: bool,
  pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
  pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
    self.issues.iter().filter(|i| i.severity == Severity::Error)
  }

  pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
    self.issues.iter().filter(|i| i.severity == Severity::Warning)
  }
}

/// Statically check a definition. Every problem found is reported, not just
/// the first.
pub fn validate(definition: &WorkflowDefinition) -> ValidationResult {
  let mut checker = Checker {
    definition,
    graph: definition.graph(),
    issues: Vec::new(),
  };

  checker.check_ids();
  checker.check_dependencies();
  let acyclic = checker.check_cycles();
  checker.check_conditions(acyclic);
  checker.check_groups();
  checker.check_variables();
  checker.check_templates(acyclic);
  checker.check_final_result();

  let is_valid = !checker.issues.iter().any(|i| i.severity == Severity::Error);
  ValidationResult {
    is_valid,
    issues: checker.issues,
  }
}

struct Checker<'a> {
  definition: &'a WorkflowDefinition,
  graph: Graph,
  issues: Vec<ValidationIssue>,
}

impl Checker<'_> {
  fn error(&mut self, step_id: Option<&str>, message: String, suggestion: impl Into<String>) {
    self.push(Severity::Error, step_id, message, suggestion.into());
  }

  fn warning(&mut self, step_id: Option<&str>, message: String, suggestion: impl Into<String>) {
    self.push(Severity::Warning, step_id, message, suggestion.into());
  }

  fn push(&mut self, severity: Severity, step_id: Option<&str>, message: String, suggestion: String) {
    self.issues.push(ValidationIssue {
      severity,
      step_id: step_id.map(str::to_string),
      message,
      suggestion,
    });
  }

  fn check_ids(&mut self) {
    let definition = self.definition;
    if definition.steps.is_empty() {
      self.warning(
        None,
        "workflow has no steps".into(),
        "add at least one step or remove the workflow",
      );
    }

    let mut seen = HashSet::new();
    for step in definition.all_steps() {
      if step.step_id.trim().is_empty() {
        self.error(None, "step has an empty step_id".into(), "give every step a unique id");
      } else if !seen.insert(step.step_id.as_str()) {
        self.error(
          Some(&step.step_id),
          format!("duplicate step id '{}'", step.step_id),
          "rename one of the steps so every id is unique, including sub-steps",
        );
      }
    }
  }

  fn check_dependencies(&mut self) {
    let definition = self.definition;
    let nested: HashMap<&str, &str> = definition
      .steps
      .iter()
      .flat_map(|group| group.sub_steps().iter().map(move |sub| (sub.step_id.as_str(), group.step_id.as_str())))
      .collect();

    for step in &definition.steps {
      for dep in &step.depends_on {
        if self.graph.contains(dep) {
          continue;
        }
        match nested.get(dep.as_str()) {
          Some(group) => self.error(
            Some(&step.step_id),
            format!("depends on '{dep}' which is nested inside parallel group '{group}'"),
            format!("depend on the group '{group}' instead"),
          ),
          None => self.error(
            Some(&step.step_id),
            format!("depends on unknown step '{dep}'"),
            "fix the step id or add the missing step",
          ),
        }
      }
    }
  }

  fn check_cycles(&mut self) -> bool {
    match self.graph.topological_order() {
      Ok(_) => true,
      Err(members) => {
        let first = members.first().cloned();
        self.error(
          first.as_deref(),
          format!("dependency cycle detected among steps: {}", members.join(", ")),
          "remove one of the dependencies that closes the cycle",
        );
        false
      }
    }
  }

  fn check_conditions(&mut self, acyclic: bool) {
    let definition = self.definition;
    for step in &definition.steps {
      let Some(condition) = step.as_condition() else {
        continue;
      };

      if let Err(e) = braid_expression::Expression::parse(&condition.expression) {
        self.error(
          Some(&step.step_id),
          format!("invalid condition expression: {e}"),
          "fix the expression syntax",
        );
      }

      if condition.true_step.is_none() && condition.false_step.is_none() {
        self.warning(
          Some(&step.step_id),
          "condition has no branch targets".into(),
          "set true_step or false_step, or use a transform step",
        );
      }
      if condition.true_step.is_some() && condition.true_step == condition.false_step {
        self.warning(
          Some(&step.step_id),
          "both branches point to the same step".into(),
          "point the branches at different steps",
        );
      }

      for branch in condition.branches() {
        if branch == step.step_id {
          self.error(
            Some(&step.step_id),
            "condition branches to itself".into(),
            "point the branch at a downstream step",
          );
        } else if !self.graph.contains(branch) {
          self.error(
            Some(&step.step_id),
            format!("branch target '{branch}' does not exist"),
            "fix the branch target or add the missing step",
          );
        } else if acyclic && !self.graph.ancestors(branch).contains(&step.step_id) {
          self.warning(
            Some(&step.step_id),
            format!("branch target '{branch}' does not depend on this condition"),
            format!("add '{}' to the depends_on of '{branch}'", step.step_id),
          );
        }
      }
    }
  }

  fn check_groups(&mut self) {
    let definition = self.definition;
    for step in &definition.steps {
      let StepKind::ParallelGroup(group) = &step.kind else {
        continue;
      };
      if group.steps.is_empty() {
        self.error(
          Some(&step.step_id),
          "parallel group has no sub-steps".into(),
          "add sub-steps or remove the group",
        );
      }
      for sub in &group.steps {
        if !sub.depends_on.is_empty() {
          self.error(
            Some(&sub.step_id),
            format!("sub-step of parallel group '{}' declares dependencies", step.step_id),
            "declare dependencies on the group instead",
          );
        }
        match &sub.kind {
          StepKind::Condition(_) => self.error(
            Some(&sub.step_id),
            "condition steps cannot run inside a parallel group".into(),
            "move the condition to the top level",
          ),
          StepKind::ParallelGroup(_) => self.error(
            Some(&sub.step_id),
            "parallel groups cannot be nested".into(),
            "flatten the nested group into its parent",
          ),
          _ => {}
        }
      }
    }
  }

  fn check_variables(&mut self) {
    let definition = self.definition;
    for step in definition.all_steps() {
      for name in &step.requires {
        if !definition.variables.contains_key(name) {
          self.error(
            Some(&step.step_id),
            format!("requires variable '{name}' which is not declared"),
            format!("declare '{name}' in the workflow variables"),
          );
        }
      }
    }
  }

  fn check_templates(&mut self, acyclic: bool) {
    let definition = self.definition;
    for step in &definition.steps {
      let ancestors = if acyclic {
        Some(self.graph.ancestors(&step.step_id))
      } else {
        None
      };
      self.check_step_templates(step, &step.step_id, ancestors.as_ref());
      for sub in step.sub_steps() {
        self.check_step_templates(sub, &step.step_id, ancestors.as_ref());
      }
    }
  }

  /// `owner` is the top-level step whose dependencies govern what `step` may read.
  fn check_step_templates(&mut self, step: &Step, owner: &str, ancestors: Option<&HashSet<String>>) {
    let mut paths = match braid_expression::referenced_paths(&step.input) {
      Ok(paths) => paths,
      Err(e) => {
        self.error(Some(&step.step_id), format!("invalid template: {e}"), "fix the placeholder syntax");
        Vec::new()
      }
    };
    match &step.kind {
      StepKind::Transform(TransformDef::Expression { expression }) => {
        match braid_expression::Expression::parse(expression) {
          Ok(parsed) => paths.extend(parsed.paths()),
          Err(e) => self.error(
            Some(&step.step_id),
            format!("invalid transform expression: {e}"),
            "fix the expression syntax",
          ),
        }
      }
      // Condition syntax is reported by check_conditions.
      StepKind::Condition(condition) => {
        if let Ok(parsed) = braid_expression::Expression::parse(&condition.expression) {
          paths.extend(parsed.paths());
        }
      }
      _ => {}
    }

    let Some(ancestors) = ancestors else {
      return;
    };
    for path in paths {
      if let [root, referenced, ..] = path.as_slice()
        && root == "steps"
        && !ancestors.contains(referenced)
        && referenced != owner
      {
        self.warning(
          Some(&step.step_id),
          format!("references steps.{referenced} which is not a dependency"),
          format!("add '{referenced}' to depends_on so its result is available"),
        );
      }
    }
  }

  fn check_final_result(&mut self) {
    let definition = self.definition;
    match &definition.final_result {
      Some(FinalResultDef::Step(step_id)) => {
        if !definition.all_steps().iter().any(|s| &s.step_id == step_id) {
          self.error(
            None,
            format!("final_result references unknown step '{step_id}'"),
            "point final_result at an existing step",
          );
        }
      }
      Some(FinalResultDef::Combine(template)) => {
        if let Err(e) = braid_expression::referenced_paths(template) {
          self.error(
            None,
            format!("invalid final_result template: {e}"),
            "fix the placeholder syntax",
          );
        }
      }
      None => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_valid_workflow_has_no_issues() {
    let workflow = WorkflowDefinition::builder("wf", "ok")
      .step(Step::tool("a", "fetch"))
      .step(Step::agent("b", "summarize {{ steps.a.result }}").depends_on(["a"]))
      .build();
    let result = validate(&workflow);
    assert!(result.is_valid);
    assert!(result.issues.is_empty(), "{:?}", result.issues);
  }

  #[test]
  fn test_issue_display() {
    let issue = ValidationIssue {
      severity: Severity::Error,
      step_id: Some("a".into()),
      message: "broken".into(),
      suggestion: "fix it".into(),
    };
    assert_eq!(issue.to_string(), "error [a]: broken (fix it)");
  }

  #[test]
  fn test_reference_to_self_owned_group_is_allowed() {
    let workflow = WorkflowDefinition::builder("wf", "group")
      .step(Step::parallel("g", vec![Step::tool("g1", "m").input(json!({ "id": "{{ execution_id }}" }))]))
      .build();
    assert!(validate(&workflow).issues.is_empty());
  }
}
