//! Execution events and notifiers for observability.
//!
//! The engine emits an event at every step transition so consumers can stream
//! progress, persist it, or ignore it. Notifiers are called inline and must
//! not block.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::result::WorkflowStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  StepStarted {
    execution_id: String,
    step_id: String,
  },

  /// An attempt failed and another will follow after `delay_ms`.
  StepRetrying {
    execution_id: String,
    step_id: String,
    attempt: u32,
    delay_ms: u64,
    error: String,
  },

  StepCompleted {
    execution_id: String,
    step_id: String,
    result: serde_json::Value,
  },

  StepFailed {
    execution_id: String,
    step_id: String,
    error: String,
  },

  StepSkipped {
    execution_id: String,
    step_id: String,
    reason: String,
  },

  StepCancelled {
    execution_id: String,
    step_id: String,
  },

  WorkflowFinished {
    execution_id: String,
    status: WorkflowStatus,
  },
}

impl ExecutionEvent {
  /// The step this event concerns, if any.
  pub fn step_id(&self) -> Option<&str> {
    match self {
      ExecutionEvent::StepStarted { step_id, .. }
      | ExecutionEvent::StepRetrying { step_id, .. }
      | ExecutionEvent::StepCompleted { step_id, .. }
      | ExecutionEvent::StepFailed { step_id, .. }
      | ExecutionEvent::StepSkipped { step_id, .. }
      | ExecutionEvent::StepCancelled { step_id, .. } => Some(step_id),
      ExecutionEvent::WorkflowStarted { .. } | ExecutionEvent::WorkflowFinished { .. } => None,
    }
  }
}

/// Receives execution events.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Sends events to an unbounded channel.
///
/// Unbounded so a slow consumer never stalls the engine; event volume is a
/// handful per step.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Forwards every event to each inner notifier in order.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
  notifiers: Vec<Arc<dyn ExecutionNotifier>>,
}

impl FanoutNotifier {
  pub fn new(notifiers: Vec<Arc<dyn ExecutionNotifier>>) -> Self {
    Self { notifiers }
  }
}

impl ExecutionNotifier for FanoutNotifier {
  fn notify(&self, event: ExecutionEvent) {
    if let Some((last, rest)) = self.notifiers.split_last() {
      for notifier in rest {
        notifier.notify(event.clone());
      }
      last.notify(event);
    }
  }
}
