//! Braid Workflow
//!
//! The in-memory form of a workflow: typed steps, the dependency graph derived
//! from them, and the static validator that runs before any execution.
//!
//! Definitions are produced either from a serialized [`braid_config::WorkflowDef`]
//! via [`build`] or programmatically through [`WorkflowBuilder`].

mod build;
mod error;
mod graph;
mod step;
mod validate;
mod workflow;

pub use build::build;
pub use error::BuildError;
pub use graph::Graph;
pub use step::{AgentStep, ConditionStep, ParallelGroup, Step, StepKind, ToolStep};
pub use validate::{Severity, ValidationIssue, ValidationResult, validate};
pub use workflow::{WorkflowBuilder, WorkflowDefinition};

pub use braid_config::{FailurePolicy, FinalResultDef, RetryPolicy, SchemaType, Strategy, TransformDef};
