//! Braid Expression
//!
//! A small, side-effect free expression language used for step input bindings,
//! condition steps, and combined final results, evaluated by minijinja.
//!
//! Templates embed expressions in `{{ }}` placeholders:
//! - a string that is exactly one placeholder resolves to the raw value
//! - a string mixing text and placeholders interpolates into a string
//! - a string without placeholders is a literal
//! - objects and arrays are resolved leaf by leaf
//!
//! Expressions support dotted paths (`steps.fetch.result.items.0`), string,
//! number, boolean and null literals, `== != < <= > >=`, `&&`/`and`, `or`,
//! `!`/`not`, parentheses, and `||` as a value fallback. Missing paths
//! resolve to null. Filters, tests and function calls are rejected so that
//! every binding stays a plain lookup or comparison.

mod error;
mod expression;
mod template;

pub use error::ExpressionError;
pub use expression::{Expression, evaluate, is_truthy, type_name};
pub use template::{referenced_paths, resolve, resolve_value};
