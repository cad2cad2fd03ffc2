//! Ready-set computation and dispatch policies.
//!
//! A step is ready when it is pending and every dependency is completed or
//! skipped. Policies only choose among ready steps and never look past the
//! ready set, so no strategy can start a step early.

use std::collections::HashMap;

use braid_config::Strategy;
use braid_workflow::WorkflowDefinition;

use crate::result::StepStatus;

/// A step eligible for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyStep {
  pub step_id: String,
  /// Declaration position, used to break ties.
  pub index: usize,
  pub priority: u8,
  pub cost: f64,
}

/// Chooses which ready steps to dispatch next.
pub trait SchedulingPolicy: Send + Sync {
  /// `ready` is in declaration order. `running` is the number of steps in flight.
  fn pick_next(&self, ready: &[ReadyStep], running: usize) -> Vec<String>;
}

/// One step at a time, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SequentialPolicy;

impl SchedulingPolicy for SequentialPolicy {
  fn pick_next(&self, ready: &[ReadyStep], running: usize) -> Vec<String> {
    if running > 0 {
      return Vec::new();
    }
    ready.iter().take(1).map(|r| r.step_id.clone()).collect()
  }
}

/// At most `max_concurrency` steps in flight, declaration order.
#[derive(Debug, Clone)]
pub struct BoundedParallelPolicy {
  pub max_concurrency: usize,
}

impl SchedulingPolicy for BoundedParallelPolicy {
  fn pick_next(&self, ready: &[ReadyStep], running: usize) -> Vec<String> {
    let slots = self.max_concurrency.max(1).saturating_sub(running);
    ready.iter().take(slots).map(|r| r.step_id.clone()).collect()
  }
}

/// At most `workers` steps in flight, highest priority first.
#[derive(Debug, Clone)]
pub struct PriorityPolicy {
  pub workers: usize,
}

impl SchedulingPolicy for PriorityPolicy {
  fn pick_next(&self, ready: &[ReadyStep], running: usize) -> Vec<String> {
    let slots = self.workers.max(1).saturating_sub(running);
    let mut ordered: Vec<&ReadyStep> = ready.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.index.cmp(&b.index)));
    ordered.into_iter().take(slots).map(|r| r.step_id.clone()).collect()
  }
}

/// At most `max_concurrency` steps in flight, cheapest first.
#[derive(Debug, Clone)]
pub struct CostAwarePolicy {
  pub max_concurrency: usize,
}

impl SchedulingPolicy for CostAwarePolicy {
  fn pick_next(&self, ready: &[ReadyStep], running: usize) -> Vec<String> {
    let slots = self.max_concurrency.max(1).saturating_sub(running);
    let mut ordered: Vec<&ReadyStep> = ready.iter().collect();
    ordered.sort_by(|a, b| a.cost.total_cmp(&b.cost).then(a.index.cmp(&b.index)));
    ordered.into_iter().take(slots).map(|r| r.step_id.clone()).collect()
  }
}

pub fn policy_for(strategy: &Strategy) -> Box<dyn SchedulingPolicy> {
  match strategy {
    Strategy::Sequential => Box::new(SequentialPolicy),
    Strategy::BoundedParallel { max_concurrency } => Box::new(BoundedParallelPolicy {
      max_concurrency: *max_concurrency,
    }),
    Strategy::Priority { workers } => Box::new(PriorityPolicy { workers: *workers }),
    Strategy::CostAware { max_concurrency } => Box::new(CostAwarePolicy {
      max_concurrency: *max_concurrency,
    }),
  }
}

/// Readiness tracking over the top-level steps of one definition.
pub(crate) struct Scheduler {
  policy: Box<dyn SchedulingPolicy>,
  steps: Vec<ReadyStep>,
  dependencies: HashMap<String, Vec<String>>,
}

impl Scheduler {
  pub fn new(definition: &WorkflowDefinition, policy: Box<dyn SchedulingPolicy>) -> Self {
    let steps = definition
      .steps
      .iter()
      .enumerate()
      .map(|(index, step)| ReadyStep {
        step_id: step.step_id.clone(),
        index,
        priority: step.kind.priority(),
        cost: step.estimated_cost(),
      })
      .collect();
    let dependencies = definition
      .steps
      .iter()
      .map(|step| (step.step_id.clone(), step.depends_on.clone()))
      .collect();

    Self {
      policy,
      steps,
      dependencies,
    }
  }

  pub fn dependencies(&self, step_id: &str) -> &[String] {
    self.dependencies.get(step_id).map(Vec::as_slice).unwrap_or(&[])
  }

  /// Pending steps whose dependencies are all completed or skipped.
  pub fn ready(&self, statuses: &HashMap<String, StepStatus>) -> Vec<ReadyStep> {
    self
      .steps
      .iter()
      .filter(|s| statuses.get(&s.step_id) == Some(&StepStatus::Pending))
      .filter(|s| {
        self
          .dependencies(&s.step_id)
          .iter()
          .all(|dep| statuses.get(dep).is_some_and(StepStatus::satisfies_dependency))
      })
      .cloned()
      .collect()
  }

  pub fn next(&self, statuses: &HashMap<String, StepStatus>, running: usize) -> Vec<String> {
    let ready = self.ready(statuses);
    if ready.is_empty() {
      return Vec::new();
    }
    self.policy.pick_next(&ready, running)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ready(specs: &[(&str, u8, f64)]) -> Vec<ReadyStep> {
    specs
      .iter()
      .enumerate()
      .map(|(index, (id, priority, cost))| ReadyStep {
        step_id: id.to_string(),
        index,
        priority: *priority,
        cost: *cost,
      })
      .collect()
  }

  #[test]
  fn test_sequential_waits_for_running_step() {
    let steps = ready(&[("a", 1, 1.0), ("b", 1, 1.0)]);
    assert_eq!(SequentialPolicy.pick_next(&steps, 0), vec!["a"]);
    assert!(SequentialPolicy.pick_next(&steps, 1).is_empty());
  }

  #[test]
  fn test_bounded_parallel_fills_free_slots() {
    let policy = BoundedParallelPolicy { max_concurrency: 3 };
    let steps = ready(&[("a", 1, 1.0), ("b", 1, 1.0), ("c", 1, 1.0), ("d", 1, 1.0)]);
    assert_eq!(policy.pick_next(&steps, 0), vec!["a", "b", "c"]);
    assert_eq!(policy.pick_next(&steps, 2), vec!["a"]);
    assert!(policy.pick_next(&steps, 3).is_empty());
  }

  #[test]
  fn test_zero_concurrency_still_makes_progress() {
    let policy = BoundedParallelPolicy { max_concurrency: 0 };
    let steps = ready(&[("a", 1, 1.0)]);
    assert_eq!(policy.pick_next(&steps, 0), vec!["a"]);
  }

  #[test]
  fn test_priority_prefers_conditions_then_agents() {
    let policy = PriorityPolicy { workers: 2 };
    let steps = ready(&[("tool", 1, 1.0), ("agent", 2, 10.0), ("cond", 3, 0.0)]);
    assert_eq!(policy.pick_next(&steps, 0), vec!["cond", "agent"]);
  }

  #[test]
  fn test_cost_aware_prefers_cheap_steps() {
    let policy = CostAwarePolicy { max_concurrency: 2 };
    let steps = ready(&[("agent", 2, 10.0), ("tool", 1, 1.0), ("transform", 1, 0.0), ("tool2", 1, 1.0)]);
    assert_eq!(policy.pick_next(&steps, 0), vec!["transform", "tool"]);
  }

  #[test]
  fn test_ties_break_by_declaration_order() {
    let policy = PriorityPolicy { workers: 4 };
    let steps = ready(&[("b", 1, 1.0), ("a", 1, 1.0)]);
    assert_eq!(policy.pick_next(&steps, 0), vec!["b", "a"]);
  }
}
