//! AWS workflows
//!
//! AWS needs infrastructure before any machine can exist, so it contributes
//! a pre-provision workflow on top of the master/node ones. The pre-provision
//! steps fill VPC, gateway, security-group and instance-profile identifiers
//! into the config; the provisioner adopts that config and publishes it for
//! the reducer to persist.

use crate::config::{AwsConfig, Config};
use crate::error::StepError;
use crate::registry::{WorkflowRegistry, AWS_MASTER, AWS_NODE, AWS_PRE_PROVISION};
use crate::step::{say, Step};
use crate::steps::{commit_machine, planned_node, BootstrapQuorumStep, MachineInfo};
use crate::sync::CancelSignal;
use async_trait::async_trait;
use capstan_model::NodeState;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// AWS API surface the steps depend on
#[async_trait]
pub trait AwsApi: Send + Sync {
    /// Create or adopt the VPC; fills vpc id, CIDR and availability zone.
    async fn ensure_vpc(&self, config: &mut AwsConfig) -> Result<(), StepError>;

    /// Create or adopt the internet gateway and route table.
    async fn ensure_gateway(&self, config: &mut AwsConfig) -> Result<(), StepError>;

    /// Create or adopt the masters and nodes security groups.
    async fn ensure_security_groups(&self, config: &mut AwsConfig) -> Result<(), StepError>;

    /// Create or adopt the masters and nodes instance profiles.
    async fn ensure_instance_profiles(&self, config: &mut AwsConfig) -> Result<(), StepError>;

    /// Import the bootstrap public key as an EC2 key pair; fills the key
    /// pair name.
    async fn import_key_pair(
        &self,
        public_key: &str,
        config: &mut AwsConfig,
    ) -> Result<(), StepError>;

    async fn run_instance(&self, config: &Config, name: &str) -> Result<MachineInfo, StepError>;

    async fn terminate_instance(&self, name: &str) -> Result<(), StepError>;
}

macro_rules! infra_step {
    ($step:ident, $name:literal, $desc:literal, $method:ident, $depends:expr) => {
        pub struct $step {
            api: Arc<dyn AwsApi>,
        }

        #[async_trait]
        impl Step for $step {
            fn name(&self) -> &str {
                $name
            }

            fn description(&self) -> &str {
                $desc
            }

            fn depends(&self) -> &[&str] {
                $depends
            }

            async fn run(
                &self,
                cancel: &CancelSignal,
                out: &mut (dyn AsyncWrite + Send + Unpin),
                config: &mut Config,
            ) -> Result<(), StepError> {
                say(out, concat!("aws: ", $desc)).await?;
                let mut aws_config = config.aws_config.clone();
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StepError::Cancelled),
                    res = self.api.$method(&mut aws_config) => res?,
                }
                config.aws_config = aws_config;
                Ok(())
            }
        }
    };
}

infra_step!(EnsureVpcStep, "createVpc", "ensure the cluster VPC", ensure_vpc, &[]);
infra_step!(
    EnsureGatewayStep,
    "createGateway",
    "ensure the internet gateway and route table",
    ensure_gateway,
    &["createVpc"]
);
infra_step!(
    EnsureSecurityGroupsStep,
    "createSecurityGroups",
    "ensure the masters and nodes security groups",
    ensure_security_groups,
    &["createVpc"]
);
infra_step!(
    EnsureInstanceProfilesStep,
    "createInstanceProfiles",
    "ensure the masters and nodes instance profiles",
    ensure_instance_profiles,
    &[]
);

/// Import the bootstrap public key as an EC2 key pair
pub struct ImportKeyPairStep {
    api: Arc<dyn AwsApi>,
}

#[async_trait]
impl Step for ImportKeyPairStep {
    fn name(&self) -> &str {
        "importKeyPair"
    }

    fn description(&self) -> &str {
        "import the bootstrap public key as an EC2 key pair"
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        let public_key = config.ssh_config.bootstrap_public_key.clone();

        say(out, "aws: importing bootstrap key pair").await?;
        let mut aws_config = config.aws_config.clone();
        tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            res = self.api.import_key_pair(&public_key, &mut aws_config) => res?,
        }
        config.aws_config = aws_config;

        say(
            out,
            format!("aws: key pair {}", config.aws_config.key_pair_name),
        )
        .await
    }
}

/// Launch the EC2 instance backing the current task's node
pub struct RunInstanceStep {
    api: Arc<dyn AwsApi>,
}

#[async_trait]
impl Step for RunInstanceStep {
    fn name(&self) -> &str {
        "runInstance"
    }

    fn description(&self) -> &str {
        "launch the EC2 instance backing this node"
    }

    async fn run(
        &self,
        cancel: &CancelSignal,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        config: &mut Config,
    ) -> Result<(), StepError> {
        if config.aws_config.vpc_id.is_empty() {
            return Err(StepError::PreconditionFailed(
                "VPC id missing: pre-provision has not run".to_string(),
            ));
        }

        let mut node = planned_node(config);
        node.state = NodeState::Provisioning;
        config.emit_node(node.clone());

        say(out, format!("aws: launching instance {}", node.name)).await?;
        let machine = tokio::select! {
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            res = self.api.run_instance(config, &node.name) => res?,
        };

        say(
            out,
            format!("aws: instance {} up at {}", node.name, machine.private_ip),
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
        say(out, format!("aws: terminating instance {name}")).await?;
        self.api.terminate_instance(&name).await
    }
}

/// Register the AWS workflows.
pub fn register(registry: &mut WorkflowRegistry, api: Arc<dyn AwsApi>) {
    registry.register(
        AWS_PRE_PROVISION,
        vec![
            Arc::new(EnsureVpcStep { api: api.clone() }),
            Arc::new(EnsureGatewayStep { api: api.clone() }),
            Arc::new(EnsureSecurityGroupsStep { api: api.clone() }),
            Arc::new(EnsureInstanceProfilesStep { api: api.clone() }),
            Arc::new(ImportKeyPairStep { api: api.clone() }),
        ],
    );
    registry.register(
        AWS_MASTER,
        vec![
            Arc::new(RunInstanceStep { api: api.clone() }),
            Arc::new(BootstrapQuorumStep::after(vec!["runInstance"])),
        ],
    );
    registry.register(AWS_NODE, vec![Arc::new(RunInstanceStep { api })]);
}
