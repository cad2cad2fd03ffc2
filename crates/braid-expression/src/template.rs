use serde_json::{Map, Value};

use crate::error::ExpressionError;
use crate::expression::{Expression, environment};

#[derive(Debug, Clone, PartialEq)]
enum Part {
  Text(String),
  Placeholder(Expression),
}

/// A string split into literal text and `{{ }}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
  parts: Vec<Part>,
}

impl Template {
  pub fn parse(source: &str) -> Result<Self, ExpressionError> {
    let mut parts = Vec::new();
    let mut rest = source;

    while let Some(open) = rest.find("{{") {
      if open > 0 {
        parts.push(Part::Text(rest[..open].to_string()));
      }
      let after_open = &rest[open + 2..];
      let close = after_open
        .find("}}")
        .ok_or_else(|| ExpressionError::UnterminatedPlaceholder {
          template: source.to_string(),
        })?;
      parts.push(Part::Placeholder(Expression::parse(after_open[..close].trim())?));
      rest = &after_open[close + 2..];
    }
    if !rest.is_empty() {
      parts.push(Part::Text(rest.to_string()));
    }

    Ok(Self { parts })
  }

  pub fn expressions(&self) -> impl Iterator<Item = &Expression> {
    self.parts.iter().filter_map(|p| match p {
      Part::Placeholder(expr) => Some(expr),
      Part::Text(_) => None,
    })
  }

  pub fn render(&self, scope: &Value) -> Result<Value, ExpressionError> {
    match self.parts.as_slice() {
      [] => Ok(Value::String(String::new())),
      [Part::Placeholder(expr)] => expr.evaluate(scope),
      [Part::Text(text)] => Ok(Value::String(text.clone())),
      _ => {
        let source = self.to_jinja();
        environment()
          .render_str(&source, scope)
          .map(Value::String)
          .map_err(|e| ExpressionError::Evaluation {
            expression: source,
            message: e.to_string(),
          })
      }
    }
  }

  /// The template in minijinja syntax. Text that minijinja would read as a
  /// block or comment is kept raw.
  fn to_jinja(&self) -> String {
    let mut out = String::new();
    for part in &self.parts {
      match part {
        Part::Text(text) if text.contains("{%") || text.contains("{#") => {
          out.push_str("{% raw %}");
          out.push_str(text);
          out.push_str("{% endraw %}");
        }
        Part::Text(text) => out.push_str(text),
        Part::Placeholder(expr) => {
          out.push_str("{{ ");
          out.push_str(expr.compiled());
          out.push_str(" }}");
        }
      }
    }
    out
  }
}

/// Resolve a single template string.
pub fn resolve(template: &str, scope: &Value) -> Result<Value, ExpressionError> {
  Template::parse(template)?.render(scope)
}

/// Resolve every string leaf of a structured template, keeping its shape.
pub fn resolve_value(template: &Value, scope: &Value) -> Result<Value, ExpressionError> {
  match template {
    Value::String(s) => resolve(s, scope),
    Value::Array(items) => items
      .iter()
      .map(|item| resolve_value(item, scope))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(map) => {
      let mut resolved = Map::with_capacity(map.len());
      for (key, value) in map {
        resolved.insert(key.clone(), resolve_value(value, scope)?);
      }
      Ok(Value::Object(resolved))
    }
    other => Ok(other.clone()),
  }
}

/// Every path read by the placeholders of a structured template.
/// Fails on the first template that does not parse.
pub fn referenced_paths(template: &Value) -> Result<Vec<Vec<String>>, ExpressionError> {
  let mut out = Vec::new();
  collect_paths(template, &mut out)?;
  Ok(out)
}

fn collect_paths(template: &Value, out: &mut Vec<Vec<String>>) -> Result<(), ExpressionError> {
  match template {
    Value::String(s) => {
      for expr in Template::parse(s)?.expressions() {
        out.extend(expr.paths());
      }
    }
    Value::Array(items) => {
      for item in items {
        collect_paths(item, out)?;
      }
    }
    Value::Object(map) => {
      for value in map.values() {
        collect_paths(value, out)?;
      }
    }
    _ => {}
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn scope() -> Value {
    json!({
      "input": { "user": { "name": "Ada", "age": 36 }, "items": [1, 2, 3] },
      "steps": { "a": { "result": 2 } }
    })
  }

  #[test]
  fn test_whole_placeholder_keeps_type() {
    assert_eq!(resolve("{{ input.items }}", &scope()).unwrap(), json!([1, 2, 3]));
    assert_eq!(resolve("{{steps.a.result}}", &scope()).unwrap(), json!(2));
    assert_eq!(resolve("{{ input.user }}", &scope()).unwrap(), json!({ "name": "Ada", "age": 36 }));
  }

  #[test]
  fn test_mixed_text_interpolates() {
    assert_eq!(
      resolve("Hello {{ input.user.name }}, you are {{ input.user.age }}", &scope()).unwrap(),
      json!("Hello Ada, you are 36")
    );
    assert_eq!(resolve("items={{ input.items }}", &scope()).unwrap(), json!("items=[1,2,3]"));
  }

  #[test]
  fn test_mixed_text_uses_expression_spellings() {
    assert_eq!(
      resolve("Hi {{ input.user.nick || input.user.name }}!", &scope()).unwrap(),
      json!("Hi Ada!")
    );
    assert_eq!(resolve("adult: {{ input.user.age >= 18 && !input.minor }}", &scope()).unwrap(), json!("adult: true"));
  }

  #[test]
  fn test_text_is_not_read_as_jinja() {
    assert_eq!(
      resolve("{% raw %} {# {{ input.user.name }}\n", &scope()).unwrap(),
      json!("{% raw %} {# Ada\n")
    );
  }

  #[test]
  fn test_filters_are_rejected_in_placeholders() {
    assert!(matches!(
      resolve("Hello {{ input.user.name | upper }}", &scope()),
      Err(ExpressionError::UnsupportedSyntax { construct: "filter", .. })
    ));
  }

  #[test]
  fn test_missing_interpolates_as_empty() {
    assert_eq!(resolve("[{{ input.nope }}]", &scope()).unwrap(), json!("[]"));
    assert_eq!(resolve("{{ input.nope }}", &scope()).unwrap(), json!(null));
  }

  #[test]
  fn test_literal_strings_pass_through() {
    assert_eq!(resolve("plain text", &scope()).unwrap(), json!("plain text"));
    assert_eq!(resolve("", &scope()).unwrap(), json!(""));
  }

  #[test]
  fn test_unterminated_placeholder() {
    assert!(matches!(
      resolve("Hello {{ input.user", &scope()),
      Err(ExpressionError::UnterminatedPlaceholder { .. })
    ));
  }

  #[test]
  fn test_resolve_structured_value() {
    let template = json!({
      "name": "{{ input.user.name }}",
      "double": "{{ steps.a.result }}",
      "nested": ["{{ input.items.0 }}", 5, true, null],
      "greeting": "hi {{ input.user.name }}"
    });
    assert_eq!(
      resolve_value(&template, &scope()).unwrap(),
      json!({
        "name": "Ada",
        "double": 2,
        "nested": [1, 5, true, null],
        "greeting": "hi Ada"
      })
    );
  }

  #[test]
  fn test_resolved_keys_keep_order() {
    let template = json!({ "z": "{{ steps.a.result }}", "a": 1, "m": "x" });
    let resolved = resolve_value(&template, &scope()).unwrap();
    let keys: Vec<_> = resolved.as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["z", "a", "m"]);
  }

  #[test]
  fn test_referenced_paths() {
    let template = json!({ "a": "{{ steps.x.result || input.y }}", "b": ["n={{ variables.n }}"] });
    assert_eq!(
      referenced_paths(&template).unwrap(),
      vec![
        vec!["input".to_string(), "y".into()],
        vec!["steps".to_string(), "x".into(), "result".into()],
        vec!["variables".to_string(), "n".into()],
      ]
    );
  }
}
