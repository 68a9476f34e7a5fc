//! Cluster service trait
//!
//! The provisioner consumes this interface to persist and fetch cluster
//! records; the HTTP layer implements it against real storage. Create acts
//! as an upsert.

use async_trait::async_trait;
use capstan_model::Kube;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Error type for cluster service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("kube not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Trait for cluster record persistence
#[async_trait]
pub trait KubeService: Send + Sync {
    /// Create or replace a cluster record.
    async fn create(&self, kube: &Kube) -> Result<(), ServiceError>;

    /// Fetch a cluster record by id.
    async fn get(&self, name: &str) -> Result<Kube, ServiceError>;
}

/// In-memory cluster service
#[derive(Debug, Default)]
pub struct MemoryKubeService {
    kubes: RwLock<HashMap<String, Kube>>,
}

impl MemoryKubeService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KubeService for MemoryKubeService {
    async fn create(&self, kube: &Kube) -> Result<(), ServiceError> {
        self.kubes
            .write()
            .unwrap()
            .insert(kube.id.clone(), kube.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Kube, ServiceError> {
        self.kubes
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }
}
