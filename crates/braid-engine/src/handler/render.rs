//! Jinja rendering for render transforms.
//!
//! The template is rendered with minijinja against the execution scope (plus
//! the resolved input as `value`), and the rendered text is coerced to the
//! declared output type:
//! ```json
//! { "function": "render", "template": "{{ value.first | title }} {{ value.last }}", "output": "string" }
//! ```

use braid_config::SchemaType;
use minijinja::Environment;
use serde_json::Value;

use crate::result::{ErrorKind, StepError};

/// Render a template string against a JSON context.
pub(crate) fn render_template(step_id: &str, template: &str, context: &Value) -> Result<String, StepError> {
  let env = Environment::new();
  env
    .render_str(template, minijinja::Value::from_serialize(context))
    .map_err(|e| {
      StepError::new(
        ErrorKind::Expression,
        format!("failed to render template for step '{step_id}': {e}"),
      )
    })
}

/// Coerce rendered text to a typed JSON value.
pub(crate) fn coerce_value(step_id: &str, value: &str, schema_type: SchemaType) -> Result<Value, StepError> {
  let mismatch = |expected: &str, detail: String| {
    StepError::new(
      ErrorKind::Expression,
      format!("output of step '{step_id}' expected {expected}, {detail}"),
    )
  };

  match schema_type {
    SchemaType::String => Ok(Value::String(value.to_string())),

    SchemaType::Number => value
      .trim()
      .parse::<f64>()
      .ok()
      .and_then(serde_json::Number::from_f64)
      .map(Value::Number)
      .ok_or_else(|| mismatch("number", format!("got '{value}'"))),

    SchemaType::Integer => value
      .trim()
      .parse::<i64>()
      .map(|n| Value::Number(n.into()))
      .map_err(|_| mismatch("integer", format!("got '{value}'"))),

    SchemaType::Boolean => match value.trim().to_lowercase().as_str() {
      "true" => Ok(Value::Bool(true)),
      "false" => Ok(Value::Bool(false)),
      _ => Err(mismatch("boolean", format!("got '{value}'"))),
    },

    SchemaType::Null => {
      let trimmed = value.trim();
      if trimmed.is_empty() || trimmed == "null" || trimmed == "none" {
        Ok(Value::Null)
      } else {
        Err(mismatch("null", format!("got '{value}'")))
      }
    }

    SchemaType::Array => match serde_json::from_str::<Value>(value) {
      Ok(v @ Value::Array(_)) => Ok(v),
      Ok(other) => Err(mismatch("array", format!("got {}", braid_expression::type_name(&other)))),
      Err(e) => Err(mismatch("array", e.to_string())),
    },

    SchemaType::Object => match serde_json::from_str::<Value>(value) {
      Ok(v @ Value::Object(_)) => Ok(v),
      Ok(other) => Err(mismatch("object", format!("got {}", braid_expression::type_name(&other)))),
      Err(e) => Err(mismatch("object", e.to_string())),
    },
  }
}
