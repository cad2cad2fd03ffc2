use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::Step;

/// Dependency graph over the top-level steps of a workflow.
///
/// Edges point from a dependency to its dependent. Dependencies naming
/// unknown steps are left out; the validator reports them.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Step ids in declaration order.
  order: Vec<String>,
  index: HashMap<String, usize>,
  /// Adjacency list: step_id -> list of downstream step_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step_id -> list of upstream step_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Steps with no dependencies.
  entry_points: Vec<String>,
}

impl Graph {
  pub fn new(steps: &[Step]) -> Self {
    let mut order = Vec::with_capacity(steps.len());
    let mut index = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for step in steps {
      if index.contains_key(&step.step_id) {
        continue;
      }
      index.insert(step.step_id.clone(), order.len());
      order.push(step.step_id.clone());
      adjacency.entry(step.step_id.clone()).or_default();
      reverse_adjacency.entry(step.step_id.clone()).or_default();
    }

    for step in steps {
      for dep in &step.depends_on {
        if !index.contains_key(dep) {
          continue;
        }
        let downstream = adjacency.entry(dep.clone()).or_default();
        if !downstream.contains(&step.step_id) {
          downstream.push(step.step_id.clone());
          reverse_adjacency
            .entry(step.step_id.clone())
            .or_default()
            .push(dep.clone());
        }
      }
    }

    let entry_points = order
      .iter()
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    Self {
      order,
      index,
      adjacency,
      reverse_adjacency,
      entry_points,
    }
  }

  pub fn contains(&self, step_id: &str) -> bool {
    self.index.contains_key(step_id)
  }

  /// Get entry points (steps with no dependencies).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream steps for a given step.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream steps for a given step.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Steps nothing depends on, in declaration order.
  pub fn terminals(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|id| self.downstream(id).is_empty())
      .map(String::as_str)
      .collect()
  }

  /// Kahn's algorithm with declaration order breaking ties.
  ///
  /// On a cycle, returns the steps that lie on or between cycles, in
  /// declaration order.
  pub fn topological_order(&self) -> Result<Vec<String>, Vec<String>> {
    let mut in_degree: Vec<usize> = self.order.iter().map(|id| self.upstream(id).len()).collect();
    let mut ready: BTreeSet<usize> = (0..self.order.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut sorted = Vec::with_capacity(self.order.len());

    while let Some(next) = ready.pop_first() {
      let id = &self.order[next];
      sorted.push(id.clone());
      for down in self.downstream(id) {
        let i = self.index[down];
        in_degree[i] -= 1;
        if in_degree[i] == 0 {
          ready.insert(i);
        }
      }
    }

    if sorted.len() == self.order.len() {
      return Ok(sorted);
    }

    let done: HashSet<&String> = sorted.iter().collect();
    let mut remaining: HashSet<&String> = self.order.iter().filter(|id| !done.contains(id)).collect();

    // Drop steps that only hang off a cycle without being part of one.
    loop {
      let tails: Vec<&String> = remaining
        .iter()
        .filter(|id| !self.downstream(id).iter().any(|d| remaining.contains(d)))
        .copied()
        .collect();
      if tails.is_empty() {
        break;
      }
      for tail in tails {
        remaining.remove(tail);
      }
    }

    Err(
      self
        .order
        .iter()
        .filter(|id| remaining.contains(id))
        .cloned()
        .collect(),
    )
  }

  /// Every step reachable downstream of `step_id`, excluding itself.
  pub fn descendants(&self, step_id: &str) -> HashSet<String> {
    self.reachable(self.downstream(step_id).iter(), |_| true)
  }

  /// Every step upstream of `step_id`, excluding itself.
  pub fn ancestors(&self, step_id: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&String> = self.upstream(step_id).iter().collect();
    while let Some(id) = queue.pop_front() {
      if seen.insert(id.clone()) {
        queue.extend(self.upstream(id));
      }
    }
    seen
  }

  /// `branch` and the steps downstream of it that cannot be reached from
  /// any entry point without passing through `branch`. These are exactly
  /// the steps that become unreachable when `branch` is not taken.
  pub fn exclusive_descendants(&self, branch: &str) -> Vec<String> {
    if !self.contains(branch) {
      return Vec::new();
    }

    let mut closure = self.descendants(branch);
    closure.insert(branch.to_string());

    let roots = self.entry_points.iter().filter(|id| id.as_str() != branch);
    let reachable_elsewhere = self.reachable(roots, |id| id != branch);

    self
      .order
      .iter()
      .filter(|id| closure.contains(*id) && !reachable_elsewhere.contains(*id))
      .cloned()
      .collect()
  }

  fn reachable<'a>(
    &'a self,
    start: impl Iterator<Item = &'a String>,
    allow: impl Fn(&str) -> bool,
  ) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&String> = start.filter(|id| allow(id)).collect();
    while let Some(id) = queue.pop_front() {
      if seen.insert(id.clone()) {
        queue.extend(self.downstream(id).iter().filter(|d| allow(d)));
      }
    }
    seen
  }
}
