//! Interfaces to the external systems steps call into.

use async_trait::async_trait;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("agent error: {message}")]
pub struct AgentError {
  pub message: String,
  /// Whether another attempt could succeed.
  pub retryable: bool,
}

impl AgentError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: true,
    }
  }

  /// A failure that no retry can fix.
  pub fn permanent(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tool error: {message}")]
pub struct ToolError {
  pub message: String,
  /// Whether another attempt could succeed.
  pub retryable: bool,
}

impl ToolError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: true,
    }
  }

  /// A failure that no retry can fix.
  pub fn permanent(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      retryable: false,
    }
  }
}

/// Turns a prompt into text, typically backed by a language model.
#[async_trait]
pub trait AgentCollaborator: Send + Sync {
  async fn invoke(&self, prompt: &str, config: &Map<String, Value>) -> Result<String, AgentError>;
}

/// Executes named methods with structured parameters.
#[async_trait]
pub trait ToolCollaborator: Send + Sync {
  async fn invoke(&self, method: &str, params: &Map<String, Value>) -> Result<Value, ToolError>;
}

/// Stand-in used when no collaborator was configured. Every call fails
/// permanently.
#[derive(Debug, Clone, Default)]
pub struct Unconfigured;

#[async_trait]
impl AgentCollaborator for Unconfigured {
  async fn invoke(&self, _prompt: &str, _config: &Map<String, Value>) -> Result<String, AgentError> {
    Err(AgentError::permanent("no agent collaborator configured"))
  }
}

#[async_trait]
impl ToolCollaborator for Unconfigured {
  async fn invoke(&self, method: &str, _params: &Map<String, Value>) -> Result<Value, ToolError> {
    Err(ToolError::permanent(format!("no tool collaborator configured for '{method}'")))
  }
}
