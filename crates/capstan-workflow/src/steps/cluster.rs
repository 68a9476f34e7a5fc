//! Post-provision cluster check

use crate::config::Config;
use crate::error::StepError;
use crate::registry::{WorkflowRegistry, CLUSTER};
use crate::step::{say, Step};
use crate::sync::CancelSignal;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Health probe against the freshly provisioned control plane
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    async fn probe(&self, config: &Config) -> Result<(), StepError>;
}

/// Verify the control plane answers before declaring the cluster operational
pub struct ClusterCheckStep {
    probe: Arc<dyn ClusterProbe>,
}

#[async_trait]
impl Step for ClusterCheckStep {
    fn name(&self) -> &str {
        "clusterCheck"
    }

    fn description(&self) -> &str {
        "verify the control plane answers on the first master"
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        if config.node.private_ip.is_empty() {
            return Err(StepError::PreconditionFailed(
                "no master selected for the cluster check".to_string(),
            ));
        }

        say(
            out,
            format!("checking control plane on {}", config.node.private_ip),
        )
        .await?;
        tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            res = self.probe.probe(config) => res?,
        }
        say(out, "control plane is answering").await
    }
}

/// Register the shared post-provision workflow.
pub fn register(registry: &mut WorkflowRegistry, probe: Arc<dyn ClusterProbe>) {
    registry.register(CLUSTER, vec![Arc::new(ClusterCheckStep { probe })]);
}
