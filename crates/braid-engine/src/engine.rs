//! Workflow execution engine.
//!
//! The `WorkflowEngine` validates a definition, then drives its steps through
//! the dependency graph under the chosen scheduling strategy.

use std::sync::Arc;
use std::time::Duration;

use braid_config::{RetryPolicy, Strategy};
use braid_workflow::WorkflowDefinition;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::collaborator::{AgentCollaborator, ToolCollaborator, Unconfigured};
use crate::context::ExecutionSettings;
use crate::error::EngineError;
use crate::events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, FanoutNotifier, NoopNotifier};
use crate::execution::Execution;
use crate::handler::{Handlers, TransformRegistry};
use crate::result::{WorkflowResult, WorkflowStatus};
use crate::retry::StepRunner;
use crate::scheduler::policy_for;

/// Engine-wide defaults applied when a definition leaves them unset.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
  pub default_retry: RetryPolicy,
  pub default_step_timeout: Option<Duration>,
}

/// The workflow execution engine.
///
/// Cheap to clone; clones share collaborators, clock, and notifier.
#[derive(Clone)]
pub struct WorkflowEngine {
  runner: Arc<StepRunner>,
  notifier: Arc<dyn ExecutionNotifier>,
  config: EngineConfig,
}

impl WorkflowEngine {
  pub fn builder() -> EngineBuilder {
    EngineBuilder::default()
  }

  /// Execute a workflow to completion.
  pub async fn execute(
    &self,
    definition: &WorkflowDefinition,
    input: Value,
    strategy: Strategy,
  ) -> Result<WorkflowResult, EngineError> {
    self
      .execute_with_cancel(definition, input, strategy, CancellationToken::new())
      .await
  }

  /// Execute a workflow, stopping early when `cancel` fires.
  pub async fn execute_with_cancel(
    &self,
    definition: &WorkflowDefinition,
    input: Value,
    strategy: Strategy,
    cancel: CancellationToken,
  ) -> Result<WorkflowResult, EngineError> {
    self
      .run(definition, input, &strategy, cancel, self.notifier.clone())
      .await
  }

  /// Execute in the background, streaming events as they happen.
  pub fn execute_streaming(
    &self,
    definition: WorkflowDefinition,
    input: Value,
    strategy: Strategy,
  ) -> ExecutionStream {
    let (sender, events) = mpsc::unbounded_channel();
    let notifier: Arc<dyn ExecutionNotifier> = Arc::new(FanoutNotifier::new(vec![
      self.notifier.clone(),
      Arc::new(ChannelNotifier::new(sender)),
    ]));
    let cancel = CancellationToken::new();
    let engine = self.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
      engine
        .run(&definition, input, &strategy, token, notifier)
        .await
    });

    ExecutionStream {
      events,
      handle,
      cancel,
    }
  }

  #[instrument(
    name = "workflow",
    skip_all,
    fields(workflow_id = %definition.workflow_id, strategy = ?strategy)
  )]
  async fn run(
    &self,
    definition: &WorkflowDefinition,
    input: Value,
    strategy: &Strategy,
    cancel: CancellationToken,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Result<WorkflowResult, EngineError> {
    let report = braid_workflow::validate(definition);
    for issue in report.warnings() {
      warn!(step_id = ?issue.step_id, issue = %issue, "validation_warning");
    }
    if !report.is_valid {
      let issues: Vec<_> = report.errors().cloned().collect();
      warn!(errors = issues.len(), "workflow_invalid");
      return Err(EngineError::Validation {
        workflow_id: definition.workflow_id.clone(),
        issues,
      });
    }

    let execution_id = uuid::Uuid::new_v4().to_string();
    info!(execution_id = %execution_id, "workflow_started");
    notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution_id.clone(),
      workflow_id: definition.workflow_id.clone(),
    });

    let settings = Arc::new(ExecutionSettings {
      retry: definition
        .retry
        .clone()
        .unwrap_or_else(|| self.config.default_retry.clone()),
      default_timeout: definition.default_timeout.or(self.config.default_step_timeout),
      notifier: notifier.clone(),
    });

    let result = Execution::new(
      definition,
      execution_id.clone(),
      input,
      policy_for(strategy),
      settings,
      self.runner.clone(),
      cancel,
    )
    .run()
    .await?;

    match result.status {
      WorkflowStatus::Completed => info!(execution_id = %execution_id, "workflow_completed"),
      WorkflowStatus::Failed => warn!(
        execution_id = %execution_id,
        failure = ?result.failure,
        "workflow_failed"
      ),
      WorkflowStatus::Cancelled => warn!(execution_id = %execution_id, "workflow_cancelled"),
    }
    notifier.notify(ExecutionEvent::WorkflowFinished {
      execution_id,
      status: result.status,
    });

    Ok(result)
  }
}

/// Configures and builds a [`WorkflowEngine`].
pub struct EngineBuilder {
  agent: Arc<dyn AgentCollaborator>,
  tool: Arc<dyn ToolCollaborator>,
  transforms: TransformRegistry,
  clock: Arc<dyn Clock>,
  notifier: Arc<dyn ExecutionNotifier>,
  config: EngineConfig,
}

impl Default for EngineBuilder {
  fn default() -> Self {
    Self {
      agent: Arc::new(Unconfigured),
      tool: Arc::new(Unconfigured),
      transforms: TransformRegistry::default(),
      clock: Arc::new(SystemClock),
      notifier: Arc::new(NoopNotifier),
      config: EngineConfig::default(),
    }
  }
}

impl EngineBuilder {
  pub fn agent(mut self, agent: Arc<dyn AgentCollaborator>) -> Self {
    self.agent = agent;
    self
  }

  pub fn tool(mut self, tool: Arc<dyn ToolCollaborator>) -> Self {
    self.tool = tool;
    self
  }

  pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
    self.transforms = transforms;
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> WorkflowEngine {
    let handlers = Handlers::new(self.agent, self.tool, self.transforms);
    WorkflowEngine {
      runner: Arc::new(StepRunner::new(handlers, self.clock)),
      notifier: self.notifier,
      config: self.config,
    }
  }
}

/// A background execution and its event stream.
pub struct ExecutionStream {
  events: mpsc::UnboundedReceiver<ExecutionEvent>,
  handle: JoinHandle<Result<WorkflowResult, EngineError>>,
  cancel: CancellationToken,
}

impl ExecutionStream {
  /// The next event, or `None` once the execution has finished and every
  /// event has been delivered.
  pub async fn next_event(&mut self) -> Option<ExecutionEvent> {
    self.events.recv().await
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  /// Wait for the execution to finish. Undelivered events are dropped.
  pub async fn finish(self) -> Result<WorkflowResult, EngineError> {
    self.handle.await.map_err(|e| EngineError::Join {
      message: e.to_string(),
    })?
  }
}
