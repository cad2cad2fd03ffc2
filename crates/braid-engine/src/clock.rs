//! Time source for step timestamps and retry backoff.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  async fn sleep(&self, duration: Duration) {
    tokio::time::sleep(duration).await;
  }
}

/// A clock that never waits. Sleeps are recorded and advance `now` instantly.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
  sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
      sleeps: Mutex::new(Vec::new()),
    }
  }

  /// Every duration passed to `sleep`, in call order.
  pub fn sleeps(&self) -> Vec<Duration> {
    self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn advance(&self, duration: Duration) {
    let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(next) = now.checked_add_signed(delta) {
      *now = next;
    }
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(DateTime::<Utc>::UNIX_EPOCH)
  }
}

#[async_trait]
impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }

  async fn sleep(&self, duration: Duration) {
    self
      .sleeps
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(duration);
    self.advance(duration);
    tokio::task::yield_now().await;
  }
}
