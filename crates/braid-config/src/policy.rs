use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happens to a step that still fails after its retries are exhausted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
  /// Fail the workflow.
  #[default]
  Propagate,
  /// Mark the step skipped and let dependents continue.
  Skip,
  /// Complete the step with a fixed value.
  Substitute { value: Value },
}

/// Exponential backoff: the delay before retry `n` is `unit * base^n`,
/// optionally capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default = "default_base")]
  pub base: f64,
  #[serde(default = "default_unit_ms")]
  pub unit_ms: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_delay_ms: Option<u64>,
}

fn default_base() -> f64 {
  2.0
}

fn default_unit_ms() -> u64 {
  1000
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retry_count: 0,
      base: default_base(),
      unit_ms: default_unit_ms(),
      max_delay_ms: None,
    }
  }
}

impl RetryPolicy {
  /// Delay before the retry that follows failed attempt `attempt` (1-based).
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let mut millis = self.unit_ms as f64 * self.base.powi(exponent);
    if !millis.is_finite() {
      millis = f64::MAX;
    }
    let mut millis = millis.clamp(0.0, u64::MAX as f64) as u64;
    if let Some(max) = self.max_delay_ms {
      millis = millis.min(max);
    }
    Duration::from_millis(millis)
  }
}

/// How ready steps are picked for dispatch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
  /// One step at a time, in declaration order.
  #[default]
  Sequential,
  /// Up to `max_concurrency` steps at once, in declaration order.
  BoundedParallel { max_concurrency: usize },
  /// Up to `workers` steps at once, highest priority first.
  Priority { workers: usize },
  /// Up to `max_concurrency` steps at once, cheapest first.
  CostAware { max_concurrency: usize },
}
