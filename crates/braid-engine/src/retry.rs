//! Retry and timeout coordination around a single step.
//!
//! Each step moves through an explicit state machine:
//!
//! ```text
//! Running(1) --fail, retryable, attempts left--> Retrying(1) --backoff--> Running(2) ...
//! Running(n) --ok--> Completed
//! Running(n) --fail, exhausted or not retryable--> failure policy --> Failed | Skipped | Completed
//! any state --cancel--> Cancelled
//! ```

use std::sync::Arc;
use std::time::Duration;

use braid_config::FailurePolicy;
use braid_workflow::Step;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::context::StepContext;
use crate::events::ExecutionEvent;
use crate::handler::{Handlers, StepFailure, StepHandler, StepOutput};
use crate::result::{ErrorKind, StepError, StepResult, StepStatus};

/// The outcome of running one step, plus any nested results it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRun {
  pub result: StepResult,
  pub children: Vec<StepResult>,
}

enum AttemptState {
  Running { attempt: u32 },
  Retrying { attempt: u32, delay: Duration },
  Finished(StepRun),
}

/// Runs steps through their handlers with retries, per-attempt timeouts,
/// cancellation, and failure policies.
pub struct StepRunner {
  handlers: Handlers,
  clock: Arc<dyn Clock>,
}

impl StepRunner {
  pub(crate) fn new(handlers: Handlers, clock: Arc<dyn Clock>) -> Self {
    Self { handlers, clock }
  }

  pub(crate) fn clock(&self) -> &dyn Clock {
    self.clock.as_ref()
  }

  #[instrument(
    name = "step",
    skip(self, step, ctx),
    fields(execution_id = %ctx.execution_id(), step_id = %step.step_id, kind = step.kind.name())
  )]
  pub async fn run(&self, step: &Step, ctx: &StepContext) -> StepRun {
    let settings = ctx.settings();
    let retry_count = step.retry_count.unwrap_or(settings.retry.retry_count);
    let timeout = step.timeout.or(settings.default_timeout);
    let started = self.clock.now();

    info!("step_started");
    ctx.notify(ExecutionEvent::StepStarted {
      execution_id: ctx.execution_id().to_string(),
      step_id: step.step_id.clone(),
    });

    let mut state = AttemptState::Running { attempt: 1 };
    loop {
      state = match state {
        AttemptState::Running { attempt } => match self.attempt(step, ctx, timeout).await {
          Ok(output) => AttemptState::Finished(self.completed(step, ctx, output, attempt, started)),
          Err(failure) if failure.error.kind == ErrorKind::Cancellation => {
            AttemptState::Finished(self.cancelled(step, ctx, failure.children, attempt, started))
          }
          Err(failure) if failure.error.kind.is_retryable() && attempt <= retry_count => {
            let delay = settings.retry.delay_for_attempt(attempt);
            warn!(
              attempt,
              delay_ms = delay.as_millis() as u64,
              error = %failure.error,
              "step_retrying"
            );
            ctx.notify(ExecutionEvent::StepRetrying {
              execution_id: ctx.execution_id().to_string(),
              step_id: step.step_id.clone(),
              attempt,
              delay_ms: delay.as_millis() as u64,
              error: failure.error.message.clone(),
            });
            AttemptState::Retrying { attempt, delay }
          }
          Err(failure) => AttemptState::Finished(self.recover(step, ctx, failure, attempt, started)),
        },
        AttemptState::Retrying { attempt, delay } => {
          tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => {
              AttemptState::Finished(self.cancelled(step, ctx, Vec::new(), attempt, started))
            }
            _ = self.clock.sleep(delay) => AttemptState::Running { attempt: attempt + 1 },
          }
        }
        AttemptState::Finished(run) => return run,
      };
    }
  }

  /// One handler call, bounded by the timeout and the cancellation token.
  async fn attempt(
    &self,
    step: &Step,
    ctx: &StepContext,
    timeout: Option<Duration>,
  ) -> Result<StepOutput, StepFailure> {
    let handler = self.handlers.for_kind(&step.kind);
    if handler.drains_on_cancel() {
      return Self::attempt_draining(handler, step, ctx, timeout).await;
    }

    let call = async {
      match timeout {
        Some(limit) => match tokio::time::timeout(limit, handler.execute(step, ctx)).await {
          Ok(outcome) => outcome,
          Err(_) => Err(StepError::timeout(limit).into()),
        },
        None => handler.execute(step, ctx).await,
      }
    };

    tokio::select! {
      biased;
      _ = ctx.cancellation().cancelled() => Err(StepError::cancelled().into()),
      outcome = call => outcome,
    }
  }

  /// An attempt of a handler that owns nested work. A timeout cancels the
  /// attempt and waits for the handler to wind down, so nested results that
  /// already finished are kept on the failure.
  async fn attempt_draining(
    handler: &dyn StepHandler,
    step: &Step,
    ctx: &StepContext,
    timeout: Option<Duration>,
  ) -> Result<StepOutput, StepFailure> {
    let attempt_cancel = ctx.cancellation().child_token();
    let attempt_ctx = ctx.with_cancel(attempt_cancel.clone());
    let call = handler.execute(step, &attempt_ctx);
    tokio::pin!(call);

    let Some(limit) = timeout else {
      return call.await;
    };
    match tokio::time::timeout(limit, &mut call).await {
      Ok(outcome) => outcome,
      Err(_) => {
        debug!(timeout_ms = limit.as_millis() as u64, "draining timed out step");
        attempt_cancel.cancel();
        let children = match call.await {
          Ok(output) => output.children,
          Err(failure) => failure.children,
        };
        Err(StepFailure {
          error: StepError::timeout(limit),
          children,
        })
      }
    }
  }

  fn completed(
    &self,
    step: &Step,
    ctx: &StepContext,
    output: StepOutput,
    attempts: u32,
    started: DateTime<Utc>,
  ) -> StepRun {
    info!(attempts, "step_completed");
    ctx.notify(ExecutionEvent::StepCompleted {
      execution_id: ctx.execution_id().to_string(),
      step_id: step.step_id.clone(),
      result: output.value.clone(),
    });
    StepRun {
      result: self.finish(step, StepStatus::Completed, output.value, None, attempts, started),
      children: output.children,
    }
  }

  fn cancelled(
    &self,
    step: &Step,
    ctx: &StepContext,
    children: Vec<StepResult>,
    attempts: u32,
    started: DateTime<Utc>,
  ) -> StepRun {
    info!(attempts, "step_cancelled");
    ctx.notify(ExecutionEvent::StepCancelled {
      execution_id: ctx.execution_id().to_string(),
      step_id: step.step_id.clone(),
    });
    StepRun {
      result: self.finish(
        step,
        StepStatus::Cancelled,
        Value::Null,
        Some(StepError::cancelled()),
        attempts,
        started,
      ),
      children,
    }
  }

  /// Apply the step's failure policy once no retry is left.
  fn recover(
    &self,
    step: &Step,
    ctx: &StepContext,
    failure: StepFailure,
    attempts: u32,
    started: DateTime<Utc>,
  ) -> StepRun {
    let StepFailure { error, children } = failure;
    let execution_id = ctx.execution_id().to_string();
    let step_id = step.step_id.clone();

    let result = match &step.on_failure {
      FailurePolicy::Propagate => {
        warn!(attempts, kind = ?error.kind, error = %error, "step_failed");
        ctx.notify(ExecutionEvent::StepFailed {
          execution_id,
          step_id,
          error: error.message.clone(),
        });
        self.finish(step, StepStatus::Failed, Value::Null, Some(error), attempts, started)
      }
      FailurePolicy::Skip => {
        warn!(attempts, kind = ?error.kind, error = %error, "step_skipped");
        ctx.notify(ExecutionEvent::StepSkipped {
          execution_id,
          step_id,
          reason: format!("failed and skipped by policy: {}", error.message),
        });
        self.finish(step, StepStatus::Skipped, Value::Null, Some(error), attempts, started)
      }
      FailurePolicy::Substitute { value } => {
        warn!(attempts, kind = ?error.kind, error = %error, "step_substituted");
        ctx.notify(ExecutionEvent::StepCompleted {
          execution_id,
          step_id,
          result: value.clone(),
        });
        self.finish(step, StepStatus::Completed, value.clone(), Some(error), attempts, started)
      }
    };

    StepRun { result, children }
  }

  fn finish(
    &self,
    step: &Step,
    status: StepStatus,
    result: Value,
    error: Option<StepError>,
    attempt_count: u32,
    started: DateTime<Utc>,
  ) -> StepResult {
    StepResult {
      step_id: step.step_id.clone(),
      status,
      result,
      error,
      start_time: Some(started),
      end_time: Some(self.clock.now()),
      attempt_count,
    }
  }
}
