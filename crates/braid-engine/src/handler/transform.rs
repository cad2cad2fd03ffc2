use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use braid_config::TransformDef;
use braid_workflow::{Step, StepKind};
use serde_json::Value;

use super::render::{coerce_value, render_template};
use super::{StepFailure, StepHandler, StepOutput, resolve_input, wrong_kind};
use crate::context::StepContext;
use crate::result::StepError;

/// A named pure function usable from `function` transforms.
pub type TransformFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TransformRegistry {
  functions: HashMap<String, TransformFn>,
}

impl TransformRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F>(&mut self, name: impl Into<String>, function: F)
  where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
  {
    self.functions.insert(name.into(), Arc::new(function));
  }

  pub fn with<F>(mut self, name: impl Into<String>, function: F) -> Self
  where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
  {
    self.register(name, function);
    self
  }

  pub fn get(&self, name: &str) -> Option<&TransformFn> {
    self.functions.get(name)
  }
}

impl fmt::Debug for TransformRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<_> = self.functions.keys().collect();
    names.sort();
    f.debug_struct("TransformRegistry").field("functions", &names).finish()
  }
}

/// Applies a pure transform to the resolved input.
pub struct TransformHandler {
  registry: TransformRegistry,
}

impl TransformHandler {
  pub fn new(registry: TransformRegistry) -> Self {
    Self { registry }
  }
}

#[async_trait]
impl StepHandler for TransformHandler {
  async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepFailure> {
    let StepKind::Transform(transform) = &step.kind else {
      return Err(wrong_kind(step, "transform"));
    };

    let input = resolve_input(step, ctx)?;

    let value = match transform {
      TransformDef::Identity => input,
      TransformDef::Expression { expression } => {
        let scope = with_value(ctx.scope(), input);
        braid_expression::evaluate(expression, &scope).map_err(StepError::from)?
      }
      TransformDef::Render { template, output } => {
        let scope = with_value(ctx.scope(), input);
        let rendered = render_template(&step.step_id, template, &scope)?;
        coerce_value(&step.step_id, &rendered, *output)?
      }
      TransformDef::Function { name } => {
        let function = self
          .registry
          .get(name)
          .ok_or_else(|| StepError::validation(format!("transform function '{name}' is not registered")))?;
        function(&input).map_err(|message| {
          StepError::execution(format!("transform function '{name}' failed: {message}"))
        })?
      }
    };

    Ok(value.into())
  }
}

/// The scope with the resolved input exposed as `value`.
fn with_value(scope: &Value, input: Value) -> Value {
  let mut scope = scope.clone();
  if let Value::Object(map) = &mut scope {
    map.insert("value".to_string(), input);
  }
  scope
}
