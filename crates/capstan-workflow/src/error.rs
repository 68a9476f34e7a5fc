//! Error types for step and workflow execution

use thiserror::Error;

/// Error type for a single step
#[derive(Debug, Error)]
pub enum StepError {
    /// Step body failed
    #[error("step execution failed: {0}")]
    ExecutionFailed(String),

    /// Cloud provider API call failed
    #[error("cloud provider error: {0}")]
    CloudProvider(String),

    /// A precondition on the config was not met
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Step observed cancellation
    #[error("step cancelled")]
    Cancelled,

    /// I/O error while writing progress output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for task and registry operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Workflow name is not registered
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// A step failed; earlier steps have been rolled back
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },

    /// Task observed cancellation between steps
    #[error("task cancelled")]
    Cancelled,

    /// Persisting the task record failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Writing task output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task record could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error type for the key/value storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkflowError::NotFound("AWSMaster".to_string());
        assert_eq!(err.to_string(), "workflow not found: AWSMaster");

        let err = WorkflowError::StepFailed {
            step: "createDroplet".to_string(),
            source: StepError::CloudProvider("rate limited".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "step 'createDroplet' failed: cloud provider error: rate limited"
        );
    }

    #[test]
    fn test_step_failed_keeps_source() {
        use std::error::Error as _;

        let err = WorkflowError::StepFailed {
            step: "runInstance".to_string(),
            source: StepError::Cancelled,
        };
        assert!(err.source().unwrap().to_string().contains("cancelled"));
    }
}
