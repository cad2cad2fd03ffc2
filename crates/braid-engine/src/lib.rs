//! Braid Engine
//!
//! Executes validated workflow definitions: resolves step inputs against the
//! execution scope, dispatches ready steps under a scheduling strategy, and
//! applies per-step timeouts, retries, and failure policies.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                         │
//! │  - validate(definition) before anything runs                │
//! │  - execute / execute_with_cancel / execute_streaming        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Execution (coordinator)                    │
//! │  - sole writer of the WorkflowContext                       │
//! │  - ready set + SchedulingPolicy, condition skips            │
//! │  - workflow timeout and cancellation                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        StepRunner                           │
//! │  - per-attempt timeout, retry with backoff, failure policy  │
//! │  - dispatches to the StepHandler for the step's kind        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use braid_engine::{Strategy, WorkflowEngine};
//!
//! let engine = WorkflowEngine::builder()
//!   .agent(Arc::new(MyAgent))
//!   .tool(Arc::new(MyTools))
//!   .build();
//!
//! let result = engine.execute(&definition, json!({ "user": "ada" }), Strategy::Sequential).await?;
//! ```

mod clock;
mod collaborator;
mod context;
mod engine;
mod error;
mod events;
mod execution;
mod handler;
mod result;
mod retry;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborator::{AgentCollaborator, AgentError, ToolCollaborator, ToolError, Unconfigured};
pub use context::{StepContext, WorkflowContext};
pub use engine::{EngineBuilder, EngineConfig, ExecutionStream, WorkflowEngine};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, FanoutNotifier, NoopNotifier};
pub use handler::{
  AgentHandler, ConditionHandler, ParallelGroupHandler, StepFailure, StepHandler, StepOutput, ToolHandler,
  TransformFn, TransformHandler, TransformRegistry,
};
pub use result::{ErrorKind, FailureDetail, StepError, StepResult, StepStatus, WorkflowResult, WorkflowStatus};
pub use retry::{StepRun, StepRunner};
pub use scheduler::{
  BoundedParallelPolicy, CostAwarePolicy, PriorityPolicy, ReadyStep, SchedulingPolicy, SequentialPolicy, policy_for,
};

pub use braid_config::{FailurePolicy, RetryPolicy, Strategy};
pub use tokio_util::sync::CancellationToken;
