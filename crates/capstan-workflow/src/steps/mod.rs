//! Built-in workflow step sets
//!
//! One module per provider plus the shared post-provision check. Cloud API
//! call bodies live behind the per-provider client traits; the steps own the
//! orchestration-relevant work: naming machines from task identities,
//! publishing node events, and gating on the bootstrap quorum latch.

pub mod aws;
pub mod cluster;
pub mod digitalocean;
pub mod gce;
pub mod testing;

use crate::config::Config;
use crate::error::StepError;
use crate::step::{say, Step};
use crate::sync::CancelSignal;
use async_trait::async_trait;
use capstan_model::{node_name, Node, NodeRole, NodeState, Provider};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Machine details returned by a cloud client once an instance exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    pub id: String,
    pub private_ip: String,
    pub public_ip: String,
}

/// Cloud client handles wired into the standard registry
#[derive(Clone)]
pub struct CloudClients {
    pub aws: Arc<dyn aws::AwsApi>,
    pub digital_ocean: Arc<dyn digitalocean::DropletApi>,
    pub gce: Arc<dyn gce::GceApi>,
    pub probe: Arc<dyn cluster::ClusterProbe>,
}

/// The node this task is about to provision, named from the task identity.
pub(crate) fn planned_node(config: &Config) -> Node {
    let role = if config.is_master {
        NodeRole::Master
    } else {
        NodeRole::Worker
    };
    let region = match config.provider {
        Provider::Aws => config.aws_config.region.clone(),
        Provider::Gce => config.gce_config.zone.clone(),
        Provider::DigitalOcean => config.digital_ocean_config.region.clone(),
        Provider::Packet => config.packet_config.facility.clone(),
        Provider::OpenStack => String::new(),
    };
    let name = node_name(
        config.provider,
        &config.cluster_name,
        &config.task_id,
        config.is_master,
    );

    Node::planned(config.task_id.clone(), name, config.provider, region, role)
}

/// Record a live machine on the config and publish it.
pub(crate) fn commit_machine(config: &mut Config, mut node: Node, machine: MachineInfo) {
    node.state = NodeState::Active;
    node.private_ip = machine.private_ip;
    node.public_ip = machine.public_ip;
    node.created_at = Some(Utc::now());

    config.node = node.clone();
    if node.is_master() {
        config.add_master(node.clone());
    }
    config.emit_node(node);
}

/// Master-only barrier: report this master's etcd as ready, then wait until
/// every master has reported (or the provisioning is cancelled) before the
/// overlay network comes up.
pub struct BootstrapQuorumStep {
    depends: Vec<&'static str>,
}

impl BootstrapQuorumStep {
    pub fn after(depends: Vec<&'static str>) -> Self {
        Self { depends }
    }
}

#[async_trait]
impl Step for BootstrapQuorumStep {
    fn name(&self) -> &str {
        "awaitEtcdQuorum"
    }

    fn description(&self) -> &str {
        "wait for the other masters' etcd members before bootstrapping"
    }

    fn depends(&self) -> &[&str] {
        &self.depends
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        let latch = config.ready_for_bootstrap_latch.clone().ok_or_else(|| {
            StepError::PreconditionFailed("bootstrap latch not initialised".to_string())
        })?;

        latch.count_down();
        say(out, "etcd member up, waiting for the remaining masters").await?;
        latch.wait().await;

        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        say(out, "all masters reported, proceeding with bootstrap").await?;
        Ok(())
    }
}
