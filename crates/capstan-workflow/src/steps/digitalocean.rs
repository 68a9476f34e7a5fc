//! DigitalOcean workflows

use crate::config::{Config, DigitalOceanConfig};
use crate::error::StepError;
use crate::registry::{
    WorkflowRegistry, DIGITAL_OCEAN_DELETE_CLUSTER, DIGITAL_OCEAN_DELETE_NODE,
    DIGITAL_OCEAN_MASTER, DIGITAL_OCEAN_NODE,
};
use crate::step::{say, Step};
use crate::steps::{commit_machine, planned_node, BootstrapQuorumStep, MachineInfo};
use crate::sync::CancelSignal;
use async_trait::async_trait;
use capstan_model::NodeState;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::info;

/// DigitalOcean API surface the steps depend on
#[async_trait]
pub trait DropletApi: Send + Sync {
    /// Register the bootstrap public key with the account and record its
    /// fingerprint. Droplet keys are deleted by fingerprint later.
    async fn ensure_ssh_key(
        &self,
        public_key: &str,
        config: &mut DigitalOceanConfig,
    ) -> Result<(), StepError>;

    async fn create_droplet(&self, config: &Config, name: &str) -> Result<MachineInfo, StepError>;

    async fn delete_droplet(&self, name: &str) -> Result<(), StepError>;

    async fn delete_ssh_key(&self, fingerprint: &str) -> Result<(), StepError>;
}

/// Register the bootstrap SSH key with the account
pub struct EnsureSshKeyStep {
    api: Arc<dyn DropletApi>,
}

#[async_trait]
impl Step for EnsureSshKeyStep {
    fn name(&self) -> &str {
        "ensureSshKey"
    }

    fn description(&self) -> &str {
        "register the bootstrap SSH key with the DigitalOcean account"
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        let public_key = config.ssh_config.bootstrap_public_key.clone();

        say(out, "registering bootstrap SSH key").await?;
        let mut do_config = config.digital_ocean_config.clone();
        tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            res = self.api.ensure_ssh_key(&public_key, &mut do_config) => res?,
        }
        config.digital_ocean_config = do_config;

        say(
            out,
            format!(
                "SSH key registered, fingerprint {}",
                config.digital_ocean_config.fingerprint
            ),
        )
        .await
    }
}

/// Create the droplet backing the current task's node
pub struct CreateDropletStep {
    api: Arc<dyn DropletApi>,
}

#[async_trait]
impl Step for CreateDropletStep {
    fn name(&self) -> &str {
        "createDroplet"
    }

    fn description(&self) -> &str {
        "create the droplet backing this node"
    }

    fn depends(&self) -> &[&str] {
        &["ensureSshKey"]
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        let mut node = planned_node(config);
        node.state = NodeState::Provisioning;
        config.emit_node(node.clone());

        say(out, format!("creating droplet {}", node.name)).await?;
        let machine = tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            res = self.api.create_droplet(config, &node.name) => res?,
        };

        say(
            out,
            format!("droplet {} up at {}", node.name, machine.private_ip),
        )
        .await?;
        commit_machine(config, node, machine);
        Ok(())
    }

    async fn rollback(
        &self,
        _cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        let name = planned_node(config).name;
        say(out, format!("deleting droplet {name}")).await?;
        self.api.delete_droplet(&name).await
    }
}

/// Delete every machine belonging to the cluster
pub struct DeleteClusterMachinesStep {
    api: Arc<dyn DropletApi>,
}

#[async_trait]
impl Step for DeleteClusterMachinesStep {
    fn name(&self) -> &str {
        "deleteClusterMachines"
    }

    fn description(&self) -> &str {
        "delete every droplet belonging to the cluster"
    }

    async fn run(
        &self,
        _cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        for master in config.masters() {
            say(out, format!("deleting droplet {}", master.name)).await?;
            self.api.delete_droplet(&master.name).await?;
        }
        if !config.node.name.is_empty() {
            say(out, format!("deleting droplet {}", config.node.name)).await?;
            self.api.delete_droplet(&config.node.name).await?;
        }
        Ok(())
    }
}

/// Remove the bootstrap key from the account
pub struct DeleteSshKeyStep {
    api: Arc<dyn DropletApi>,
}

#[async_trait]
impl Step for DeleteSshKeyStep {
    fn name(&self) -> &str {
        "deleteSshKey"
    }

    fn description(&self) -> &str {
        "remove the bootstrap SSH key from the DigitalOcean account"
    }

    async fn run(
        &self,
        _cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        let fingerprint = config.digital_ocean_config.fingerprint.clone();
        if fingerprint.is_empty() {
            info!(cluster = %config.cluster_id, "no bootstrap key fingerprint recorded, skipping");
            return Ok(());
        }

        say(out, format!("deleting SSH key {fingerprint}")).await?;
        self.api.delete_ssh_key(&fingerprint).await
    }
}

/// Delete the single droplet named by the current config
pub struct DeleteDropletStep {
    api: Arc<dyn DropletApi>,
}

#[async_trait]
impl Step for DeleteDropletStep {
    fn name(&self) -> &str {
        "deleteDroplet"
    }

    fn description(&self) -> &str {
        "delete the droplet backing this node"
    }

    async fn run(
        &self,
        _cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        if config.node.name.is_empty() {
            return Err(StepError::PreconditionFailed(
                "no node selected for deletion".to_string(),
            ));
        }
        say(out, format!("deleting droplet {}", config.node.name)).await?;
        self.api.delete_droplet(&config.node.name).await
    }
}

/// Register the DigitalOcean workflows.
pub fn register(registry: &mut WorkflowRegistry, api: Arc<dyn DropletApi>) {
    registry.register(
        DIGITAL_OCEAN_MASTER,
        vec![
            Arc::new(EnsureSshKeyStep { api: api.clone() }),
            Arc::new(CreateDropletStep { api: api.clone() }),
            Arc::new(BootstrapQuorumStep::after(vec!["createDroplet"])),
        ],
    );
    registry.register(
        DIGITAL_OCEAN_NODE,
        vec![
            Arc::new(EnsureSshKeyStep { api: api.clone() }),
            Arc::new(CreateDropletStep { api: api.clone() }),
        ],
    );
    registry.register(
        DIGITAL_OCEAN_DELETE_CLUSTER,
        vec![
            Arc::new(DeleteClusterMachinesStep { api: api.clone() }),
            Arc::new(DeleteSshKeyStep { api: api.clone() }),
        ],
    );
    registry.register(
        DIGITAL_OCEAN_DELETE_NODE,
        vec![Arc::new(DeleteDropletStep { api })],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::FakeCloud;
    use capstan_model::{NodeRole, Provider};

    fn config() -> Config {
        let mut config = Config::new(Provider::DigitalOcean, "prod", "acc");
        config.task_id = "abcd1234".into();
        config.digital_ocean_config.region = "fra1".into();
        config.ssh_config.bootstrap_public_key = "ssh-rsa AAAA test".into();
        config
    }

    #[tokio::test]
    async fn test_ensure_ssh_key_records_fingerprint() {
        let cloud = Arc::new(FakeCloud::new());
        let step = EnsureSshKeyStep { api: cloud.clone() };
        let mut out: Vec<u8> = Vec::new();
        let mut config = config();

        step.run(&CancelSignal::none(), &mut out, &mut config)
            .await
            .unwrap();

        assert!(!config.digital_ocean_config.fingerprint.is_empty());
    }

    #[tokio::test]
    async fn test_create_droplet_publishes_node() {
        let cloud = Arc::new(FakeCloud::new());
        let step = CreateDropletStep { api: cloud.clone() };
        let mut out: Vec<u8> = Vec::new();
        let mut config = config();
        config.is_master = true;
        let mut streams = config.take_event_streams().unwrap();

        step.run(&CancelSignal::none(), &mut out, &mut config)
            .await
            .unwrap();

        assert_eq!(cloud.created(), vec!["prod-master-abcd"]);
        assert_eq!(config.node.name, "prod-master-abcd");
        assert_eq!(config.node.state, NodeState::Active);
        assert_eq!(config.get_master().unwrap().role, NodeRole::Master);

        let provisioning = streams.nodes.recv().await.unwrap();
        assert_eq!(provisioning.state, NodeState::Provisioning);
        let active = streams.nodes.recv().await.unwrap();
        assert_eq!(active.state, NodeState::Active);
        assert!(!active.private_ip.is_empty());
    }

    #[tokio::test]
    async fn test_create_droplet_rollback_deletes_machine() {
        let cloud = Arc::new(FakeCloud::new());
        let step = CreateDropletStep { api: cloud.clone() };
        let mut out: Vec<u8> = Vec::new();
        let mut config = config();

        step.rollback(&CancelSignal::none(), &mut out, &mut config)
            .await
            .unwrap();

        assert_eq!(cloud.deleted(), vec!["prod-node-abcd"]);
    }

    #[tokio::test]
    async fn test_delete_node_requires_target() {
        let cloud = Arc::new(FakeCloud::new());
        let step = DeleteDropletStep { api: cloud };
        let mut out: Vec<u8> = Vec::new();
        let mut config = config();

        let err = step
            .run(&CancelSignal::none(), &mut out, &mut config)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_delete_cluster_removes_masters_and_key() {
        let cloud = Arc::new(FakeCloud::new());
        let mut config = config();
        config.digital_ocean_config.fingerprint = "aa:bb".into();

        let mut master = config.node.clone();
        master.name = "prod-master-1111".into();
        master.role = NodeRole::Master;
        master.private_ip = "10.0.0.4".into();
        config.add_master(master);

        let mut out: Vec<u8> = Vec::new();
        let machines = DeleteClusterMachinesStep { api: cloud.clone() };
        machines
            .run(&CancelSignal::none(), &mut out, &mut config)
            .await
            .unwrap();
        let key = DeleteSshKeyStep { api: cloud.clone() };
        key.run(&CancelSignal::none(), &mut out, &mut config)
            .await
            .unwrap();

        assert_eq!(cloud.deleted(), vec!["prod-master-1111"]);
        assert_eq!(cloud.deleted_keys(), vec!["aa:bb"]);
    }
}
