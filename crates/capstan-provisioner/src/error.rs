//! Error types for the task provisioner

use capstan_workflow::WorkflowError;
use thiserror::Error;

/// Error type for key and certificate bootstrap
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(#[from] rsa::Error),

    #[error("private key encoding failed: {0}")]
    KeyEncoding(#[from] rsa::pkcs1::Error),

    #[error("public key rendering failed: {0}")]
    PublicKey(#[from] ssh_key::Error),

    #[error("certificate bootstrap failed: {0}")]
    Certificates(#[from] capstan_pki::PkiError),
}

/// Error type for provisioner operations.
///
/// Only planning-phase failures surface here; execution-phase failures are
/// reported through kube-state events and per-task statuses.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Request is malformed (empty cluster name, missing profile fields)
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Unknown cluster, provider, workflow, or no master on an add-node call
    #[error("not found: {0}")]
    NotFound(String),

    /// The provisioning plan is unusable; unrecoverable
    #[error("invalid provisioning plan: {0}")]
    InvalidPlan(String),

    /// Key or certificate generation failed before any persistence
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// Task planning or persistence failed
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The cluster service rejected an operation
    #[error("kube service: {0}")]
    KubeService(String),

    /// Anything that does not fit the categories above
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Result type for provisioner operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
