//! Step trait definition
//!
//! A step is an idempotent unit of cloud-facing work. Steps run in order
//! inside a task; on failure, previously succeeded steps are rolled back in
//! reverse order.

use crate::config::Config;
use crate::error::StepError;
use crate::sync::CancelSignal;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Per-task progress sink
pub type TaskOut = Box<dyn AsyncWrite + Send + Unpin>;

/// Core trait for workflow steps
///
/// # Contracts
///
/// `run` must be idempotent against its own previous partial execution where
/// feasible, must return promptly once `cancel` fires, and must write
/// human-readable progress to `out`. `rollback` never fails the pipeline:
/// returning an error is informational only.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identifier, unique within a workflow
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Names of steps that must have succeeded earlier in the same workflow
    fn depends(&self) -> &[&str] {
        &[]
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError>;

    async fn rollback(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        let _ = (cancel, out, config);
        Ok(())
    }
}

/// Write one progress line to the task output.
pub async fn say(
    out: &mut (dyn AsyncWrite + Send + Unpin),
    message: impl AsRef<str>,
) -> Result<(), StepError> {
    out.write_all(message.as_ref().as_bytes()).await?;
    out.write_all(b"\n").await?;
    Ok(())
}

/// A step that does nothing (for engine tests)
pub struct NoopStep {
    name: String,
}

impl NoopStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Step for NoopStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "does nothing"
    }

    async fn run(
        &self,
        _cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        _config: &mut Config,
    ) -> Result<(), StepError> {
        say(out, format!("{} done", self.name)).await
    }
}

/// A step that always fails (for engine tests)
pub struct FailingStep {
    name: String,
    message: String,
}

impl FailingStep {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "always fails"
    }

    async fn run(
        &self,
        _cancel: &CancelSignal,
        _out: &mut (dyn AsyncWrite + Send + Unpin),
        _config: &mut Config,
    ) -> Result<(), StepError> {
        Err(StepError::ExecutionFailed(self.message.clone()))
    }
}

/// A step that sleeps unless cancelled (for cancellation tests)
pub struct SleepStep {
    name: String,
    duration: std::time::Duration,
}

impl SleepStep {
    pub fn new(name: impl Into<String>, duration: std::time::Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

#[async_trait]
impl Step for SleepStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "sleeps unless cancelled"
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        _out: &mut (dyn AsyncWrite + Send + Unpin),
        _config: &mut Config,
    ) -> Result<(), StepError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            _ = tokio::time::sleep(self.duration) => Ok(()),
        }
    }
}

/// Records run and rollback invocations in order (for rollback tests)
pub struct RecordingStep {
    name: String,
    fail: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingStep {
    pub fn new(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            fail: false,
            log,
        }
    }

    pub fn failing(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            fail: true,
            log,
        }
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "records invocations"
    }

    async fn run(
        &self,
        _cancel: &CancelSignal,
        _out: &mut (dyn AsyncWrite + Send + Unpin),
        _config: &mut Config,
    ) -> Result<(), StepError> {
        self.log.lock().unwrap().push(format!("run:{}", self.name));
        if self.fail {
            Err(StepError::ExecutionFailed("instructed to fail".to_string()))
        } else {
            Ok(())
        }
    }

    async fn rollback(
        &self,
        _cancel: &CancelSignal,
        _out: &mut (dyn AsyncWrite + Send + Unpin),
        _config: &mut Config,
    ) -> Result<(), StepError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("rollback:{}", self.name));
        Ok(())
    }
}
