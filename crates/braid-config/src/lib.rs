//! Braid Config
//!
//! Serializable workflow definition types. These describe a workflow as it is
//! authored (usually JSON) before it is built into the validated in-memory
//! representation used by the engine.
//!
//! Durations are expressed in milliseconds and every tagged enum uses a
//! snake_case `type`/`function`/`policy`/`strategy` discriminator.

mod policy;
mod step;
mod workflow;

pub use policy::{FailurePolicy, RetryPolicy, Strategy};
pub use step::{SchemaType, StepDef, StepKindDef, TransformDef};
pub use workflow::{FinalResultDef, WorkflowDef};
