//! GCE workflows

use crate::config::Config;
use crate::error::StepError;
use crate::registry::{WorkflowRegistry, GCE_MASTER, GCE_NODE};
use crate::step::{say, Step};
use crate::steps::{commit_machine, planned_node, BootstrapQuorumStep, MachineInfo};
use crate::sync::CancelSignal;
use async_trait::async_trait;
use capstan_model::NodeState;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// GCE API surface the steps depend on
#[async_trait]
pub trait GceApi: Send + Sync {
    async fn insert_instance(&self, config: &Config, name: &str)
        -> Result<MachineInfo, StepError>;

    async fn delete_instance(&self, name: &str) -> Result<(), StepError>;
}

/// Insert the compute instance backing the current task's node.
/// Instance names are already lowercased by the naming rules.
pub struct InsertInstanceStep {
    api: Arc<dyn GceApi>,
}

#[async_trait]
impl Step for InsertInstanceStep {
    fn name(&self) -> &str {
        "insertInstance"
    }

    fn description(&self) -> &str {
        "insert the compute instance backing this node"
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

        say(out, format!("gce: inserting instance {}", node.name)).await?;
        let machine = tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            res = self.api.insert_instance(config, &node.name) => res?,
        };

        say(
            out,
            format!("gce: instance {} up at {}", node.name, machine.private_ip),
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
        say(out, format!("gce: deleting instance {name}")).await?;
        self.api.delete_instance(&name).await
    }
}

/// Register the GCE workflows.
pub fn register(registry: &mut WorkflowRegistry, api: Arc<dyn GceApi>) {
    registry.register(
        GCE_MASTER,
        vec![
            Arc::new(InsertInstanceStep { api: api.clone() }),
            Arc::new(BootstrapQuorumStep::after(vec!["insertInstance"])),
        ],
    );
    registry.register(GCE_NODE, vec![Arc::new(InsertInstanceStep { api })]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::FakeCloud;
    use capstan_model::Provider;

    #[tokio::test]
    async fn test_insert_instance_lowercases_name() {
        let cloud = Arc::new(FakeCloud::new());
        let step = InsertInstanceStep { api: cloud.clone() };
        let mut out: Vec<u8> = Vec::new();

        let mut config = Config::new(Provider::Gce, "Prod", "acc");
        config.task_id = "ABCD1234".into();
        config.is_master = true;
        config.gce_config.zone = "europe-west1-b".into();

        step.run(&CancelSignal::none(), &mut out, &mut config)
            .await
            .unwrap();

        assert_eq!(cloud.created(), vec!["prod-master-abcd"]);
        assert_eq!(config.node.region, "europe-west1-b");
    }
}
