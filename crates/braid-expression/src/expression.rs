use std::fmt::Write;

use minijinja::value::ValueKind;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::ExpressionError;

/// Identifiers that reach past the supported grammar, with the name of the
/// construct they would introduce.
const RESERVED: &[(&str, &str)] = &[
  ("is", "test"),
  ("if", "conditional"),
  ("else", "conditional"),
  ("in", "membership"),
];

/// Operator keywords that may be followed directly by a parenthesis.
const OPERATORS: &[&str] = &["and", "or", "not"];

/// A checked expression, ready to evaluate against a scope.
///
/// `&&`, `||` and `!` are accepted as spellings of `and`, `or` and `not`,
/// and `null` as `none`. Filters, tests and calls are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
  source: String,
  compiled: String,
}

impl Expression {
  pub fn parse(source: &str) -> Result<Self, ExpressionError> {
    let compiled = rewrite(unwrap_placeholder(source))?;
    if compiled.trim().is_empty() {
      return Err(ExpressionError::Syntax {
        expression: source.to_string(),
        message: "empty expression".into(),
      });
    }
    check(source, &compiled)?;

    Ok(Self {
      source: source.to_string(),
      compiled,
    })
  }

  /// The expression as minijinja reads it.
  pub(crate) fn compiled(&self) -> &str {
    &self.compiled
  }

  pub fn evaluate(&self, scope: &Value) -> Result<Value, ExpressionError> {
    let env = environment();
    let expression = env
      .compile_expression(&self.compiled)
      .map_err(|e| syntax(&self.source, &e))?;
    let value = expression.eval(scope).map_err(|e| self.evaluation(e.to_string()))?;
    serde_json::to_value(&value).map_err(|e| self.evaluation(e.to_string()))
  }

  /// Dotted paths read by this expression, sorted.
  pub fn paths(&self) -> Vec<Vec<String>> {
    let env = environment();
    let Ok(expression) = env.compile_expression(&self.compiled) else {
      return Vec::new();
    };
    let mut paths: Vec<Vec<String>> = expression
      .undeclared_variables(true)
      .into_iter()
      .map(|path| path.split('.').map(str::to_string).collect())
      .collect();
    paths.sort();
    paths
  }

  fn evaluation(&self, message: String) -> ExpressionError {
    ExpressionError::Evaluation {
      expression: self.source.clone(),
      message,
    }
  }
}

fn check(source: &str, compiled: &str) -> Result<(), ExpressionError> {
  let env = environment();
  let outcome = env.compile_expression(compiled).map(drop);
  outcome.map_err(|e| syntax(source, &e))
}

fn syntax(source: &str, e: &minijinja::Error) -> ExpressionError {
  ExpressionError::Syntax {
    expression: source.to_string(),
    message: e.detail().map_or_else(|| e.to_string(), str::to_string),
  }
}

/// `{{ expr }}` reads the same as `expr`.
fn unwrap_placeholder(source: &str) -> &str {
  match source.trim().strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
    Some(inner) if !inner.contains("{{") && !inner.contains("}}") => inner,
    _ => source,
  }
}

/// The environment every expression and template is evaluated in. Missing
/// paths chain to undefined, and undefined renders as nothing.
pub(crate) fn environment<'source>() -> Environment<'source> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Chainable);
  env.set_keep_trailing_newline(true);
  env.set_formatter(|out, state, value| match value.kind() {
    ValueKind::Undefined | ValueKind::None => Ok(()),
    ValueKind::Seq | ValueKind::Map => {
      let json = serde_json::to_string(value)
        .map_err(|e| minijinja::Error::new(minijinja::ErrorKind::BadSerialization, e.to_string()))?;
      out.write_str(&json)?;
      Ok(())
    }
    _ => minijinja::escape_formatter(out, state, value),
  });
  env
}

/// Translate the accepted spellings into minijinja syntax and reject the
/// constructs outside the grammar. String literals are copied untouched.
fn rewrite(source: &str) -> Result<String, ExpressionError> {
  let unsupported = |construct: &'static str| ExpressionError::UnsupportedSyntax {
    expression: source.to_string(),
    construct,
  };
  let chars: Vec<char> = source.chars().collect();
  let mut out = String::with_capacity(source.len() + 8);
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    let next = chars.get(i + 1).copied();
    match c {
      '\'' | '"' => {
        out.push(c);
        i += 1;
        while i < chars.len() {
          out.push(chars[i]);
          if chars[i] == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
              out.push(escaped);
              i += 1;
            }
          } else if chars[i] == c {
            break;
          }
          i += 1;
        }
        i += 1;
      }
      '|' if next == Some('|') => {
        out.push_str(" or ");
        i += 2;
      }
      '|' => return Err(unsupported("filter")),
      '&' if next == Some('&') => {
        out.push_str(" and ");
        i += 2;
      }
      '!' if next == Some('=') => {
        out.push_str("!=");
        i += 2;
      }
      '!' => {
        out.push_str(" not ");
        i += 1;
      }
      c if c.is_ascii_alphabetic() || c == '_' => {
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
          i += 1;
        }
        let ident: String = chars[start..i].iter().collect();
        if let Some((_, construct)) = RESERVED.iter().find(|(word, _)| *word == ident) {
          return Err(unsupported(*construct));
        }
        out.push_str(if ident == "null" { "none" } else { &ident });

        while chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') {
          i += 1;
          let start = i;
          while i < chars.len()
            && (chars[i].is_ascii_alphanumeric()
              || chars[i] == '_'
              || (chars[i] == '-' && chars.get(i + 1).is_some_and(char::is_ascii_alphanumeric)))
          {
            i += 1;
          }
          let segment: String = chars[start..i].iter().collect();
          if segment.contains('-') {
            out.push_str(&format!("[\"{segment}\"]"));
          } else {
            out.push('.');
            out.push_str(&segment);
          }
        }

        let called = chars[i..].iter().find(|c| !c.is_whitespace()) == Some(&'(');
        if called && !OPERATORS.contains(&ident.as_str()) {
          return Err(unsupported("call"));
        }
      }
      c => {
        out.push(c);
        i += 1;
      }
    }
  }

  Ok(out)
}

/// Parse and evaluate a bare expression (no braces) against `scope`.
pub fn evaluate(expression: &str, scope: &Value) -> Result<Value, ExpressionError> {
  Expression::parse(expression)?.evaluate(scope)
}

/// Truthiness as the expression operators see it: null, false, zero, the
/// empty string and empty arrays or objects are falsy.
pub fn is_truthy(value: &Value) -> bool {
  minijinja::Value::from_serialize(value).is_true()
}

pub fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
