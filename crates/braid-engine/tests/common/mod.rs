#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use braid_engine::{
  AgentCollaborator, AgentError, ChannelNotifier, ExecutionEvent, ManualClock, ToolCollaborator, ToolError,
  TransformRegistry, WorkflowEngine,
};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

type MethodFn = Box<dyn Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync>;

/// Tool collaborator with scripted methods, call counting, and optional delays.
#[derive(Default)]
pub struct MockTool {
  methods: HashMap<String, MethodFn>,
  delays: HashMap<String, Duration>,
  calls: Mutex<Vec<String>>,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
}

impl MockTool {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn method<F>(mut self, name: &str, f: F) -> Self
  where
    F: Fn(&Map<String, Value>) -> Result<Value, ToolError> + Send + Sync + 'static,
  {
    self.methods.insert(name.to_string(), Box::new(f));
    self
  }

  pub fn delay(mut self, name: &str, delay: Duration) -> Self {
    self.delays.insert(name.to_string(), delay);
    self
  }

  pub fn calls(&self, name: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
  }

  pub fn call_order(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ToolCollaborator for MockTool {
  async fn invoke(&self, method: &str, params: &Map<String, Value>) -> Result<Value, ToolError> {
    self.calls.lock().unwrap().push(method.to_string());
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);

    if let Some(delay) = self.delays.get(method) {
      tokio::time::sleep(*delay).await;
    }
    let outcome = match self.methods.get(method) {
      Some(f) => f(params),
      None => Err(ToolError::new(format!("unknown method '{method}'"))),
    };

    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    outcome
  }
}

/// Agent collaborator that fails a set number of times, then echoes the prompt.
pub struct MockAgent {
  failures_left: AtomicU32,
  delay: Option<Duration>,
  calls: AtomicU32,
  prompts: Mutex<Vec<String>>,
}

impl MockAgent {
  pub fn echo() -> Self {
    Self::failing(0)
  }

  pub fn failing(times: u32) -> Self {
    Self {
      failures_left: AtomicU32::new(times),
      delay: None,
      calls: AtomicU32::new(0),
      prompts: Mutex::new(Vec::new()),
    }
  }

  pub fn slow(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::echo()
    }
  }

  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn prompts(&self) -> Vec<String> {
    self.prompts.lock().unwrap().clone()
  }
}

#[async_trait]
impl AgentCollaborator for MockAgent {
  async fn invoke(&self, prompt: &str, _config: &Map<String, Value>) -> Result<String, AgentError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.prompts.lock().unwrap().push(prompt.to_string());
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    let failed = self
      .failures_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if failed {
      return Err(AgentError::new("model overloaded"));
    }
    Ok(format!("echo: {prompt}"))
  }
}

/// Registry with small arithmetic helpers used across tests.
pub fn arithmetic() -> TransformRegistry {
  TransformRegistry::new()
    .with("double", |v| {
      v.as_f64()
        .map(|n| Value::from(n as i64 * 2))
        .ok_or_else(|| format!("expected a number, got {v}"))
    })
    .with("sum", |v| {
      let items = v.as_array().ok_or("expected an array")?;
      let total: i64 = items.iter().filter_map(Value::as_i64).sum();
      Ok(Value::from(total))
    })
}

/// An engine wired to the given mocks with a manual clock and an event channel.
pub fn engine(
  tool: Arc<MockTool>,
  agent: Arc<MockAgent>,
  clock: Arc<ManualClock>,
) -> (WorkflowEngine, mpsc::UnboundedReceiver<ExecutionEvent>) {
  let (tx, rx) = mpsc::unbounded_channel();
  let engine = WorkflowEngine::builder()
    .tool(tool)
    .agent(agent)
    .transforms(arithmetic())
    .clock(clock)
    .notifier(Arc::new(ChannelNotifier::new(tx)))
    .build();
  (engine, rx)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}
