//! Per-step and per-workflow execution outcomes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use braid_expression::ExpressionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborator::{AgentError, ToolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Skipped,
  Cancelled,
}

impl StepStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      StepStatus::Pending => "pending",
      StepStatus::Running => "running",
      StepStatus::Completed => "completed",
      StepStatus::Failed => "failed",
      StepStatus::Skipped => "skipped",
      StepStatus::Cancelled => "cancelled",
    }
  }

  /// Whether a dependent may run once a dependency reaches this status.
  pub fn satisfies_dependency(&self) -> bool {
    matches!(self, StepStatus::Completed | StepStatus::Skipped)
  }
}

impl fmt::Display for StepStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  StepExecution,
  Expression,
  Timeout,
  Cancellation,
}

impl ErrorKind {
  /// Transient failures are retried; deterministic ones are not.
  pub fn is_retryable(&self) -> bool {
    matches!(self, ErrorKind::StepExecution | ErrorKind::Timeout)
  }
}

/// Why a step attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct StepError {
  pub kind: ErrorKind,
  pub message: String,
}

impl StepError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn execution(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::StepExecution, message)
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Validation, message)
  }

  pub fn timeout(limit: Duration) -> Self {
    Self::new(ErrorKind::Timeout, format!("timed out after {}ms", limit.as_millis()))
  }

  pub fn cancelled() -> Self {
    Self::new(ErrorKind::Cancellation, "cancelled")
  }
}

impl From<ExpressionError> for StepError {
  fn from(e: ExpressionError) -> Self {
    Self::new(ErrorKind::Expression, e.to_string())
  }
}

impl From<AgentError> for StepError {
  fn from(e: AgentError) -> Self {
    collaborator_failure(e.to_string(), e.retryable)
  }
}

impl From<ToolError> for StepError {
  fn from(e: ToolError) -> Self {
    collaborator_failure(e.to_string(), e.retryable)
  }
}

/// Permanent collaborator failures are reported as validation errors so the
/// retry loop leaves them alone.
fn collaborator_failure(message: String, retryable: bool) -> StepError {
  if retryable {
    StepError::execution(message)
  } else {
    StepError::validation(message)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
  pub step_id: String,
  pub status: StepStatus,
  pub result: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<StepError>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,
  pub attempt_count: u32,
}

impl StepResult {
  /// A step that never started.
  pub fn pending(step_id: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      status: StepStatus::Pending,
      result: Value::Null,
      error: None,
      start_time: None,
      end_time: None,
      attempt_count: 0,
    }
  }

  /// A step skipped without running.
  pub fn skipped(step_id: impl Into<String>, at: DateTime<Utc>) -> Self {
    Self {
      status: StepStatus::Skipped,
      end_time: Some(at),
      ..Self::pending(step_id)
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Completed,
  Failed,
  Cancelled,
}

/// The failure that decided a workflow's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
  /// None when the failure is not attributable to one step.
  pub step_id: Option<String>,
  pub kind: ErrorKind,
  pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
  pub workflow_id: String,
  pub execution_id: String,
  pub status: WorkflowStatus,
  /// Every step including parallel group sub-steps, keyed by step id.
  pub step_results: BTreeMap<String, StepResult>,
  pub final_result: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<FailureDetail>,
}

impl WorkflowResult {
  pub fn step(&self, step_id: &str) -> Option<&StepResult> {
    self.step_results.get(step_id)
  }

  pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
    self.step(step_id).map(|r| r.status)
  }
}
