#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
  #[error("syntax error in '{expression}': {message}")]
  Syntax { expression: String, message: String },

  #[error("{construct} syntax is not supported in '{expression}'")]
  UnsupportedSyntax {
    expression: String,
    construct: &'static str,
  },

  #[error("failed to evaluate '{expression}': {message}")]
  Evaluation { expression: String, message: String },

  #[error("unterminated placeholder in template '{template}'")]
  UnterminatedPlaceholder { template: String },
}
