//! Cloud client fakes for engine and scheduler tests

use crate::config::{AwsConfig, Config, DigitalOceanConfig};
use crate::error::StepError;
use crate::steps::aws::AwsApi;
use crate::steps::cluster::ClusterProbe;
use crate::steps::digitalocean::DropletApi;
use crate::steps::gce::GceApi;
use crate::steps::{CloudClients, MachineInfo};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An in-memory cloud answering every client trait.
///
/// Machine launches succeed by default; `plan_machine_failures` scripts the
/// outcome of upcoming launches, `set_launch_delay` makes them slow enough to
/// cancel, `fail_vpc` breaks pre-provision and `fail_probe` the cluster check.
#[derive(Default)]
pub struct FakeCloud {
    machines: AtomicUsize,
    probes: AtomicUsize,
    fail_vpc: AtomicBool,
    fail_probe: AtomicBool,
    launch_delay: Mutex<Duration>,
    machine_failures: Mutex<VecDeque<bool>>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    deleted_keys: Mutex<Vec<String>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of upcoming machine launches: `true` fails the
    /// launch. Launches beyond the plan succeed.
    pub fn plan_machine_failures(&self, plan: Vec<bool>) {
        *self.machine_failures.lock().unwrap() = plan.into();
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = delay;
    }

    pub fn fail_vpc(&self) {
        self.fail_vpc.store(true, Ordering::SeqCst);
    }

    pub fn fail_probe(&self) {
        self.fail_probe.store(true, Ordering::SeqCst);
    }

    pub fn machines_launched(&self) -> usize {
        self.machines.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted_keys.lock().unwrap().clone()
    }

    async fn launch(&self, name: &str) -> Result<MachineInfo, StepError> {
        let delay = *self.launch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .machine_failures
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false);
        if fail {
            return Err(StepError::CloudProvider(format!(
                "launch of {name} refused"
            )));
        }

        let seq = self.machines.fetch_add(1, Ordering::SeqCst) + 10;
        self.created.lock().unwrap().push(name.to_string());
        Ok(MachineInfo {
            id: format!("machine-{seq}"),
            private_ip: format!("10.0.0.{seq}"),
            public_ip: format!("203.0.113.{seq}"),
        })
    }

    fn remove(&self, name: &str) -> Result<(), StepError> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl AwsApi for FakeCloud {
    async fn ensure_vpc(&self, config: &mut AwsConfig) -> Result<(), StepError> {
        if self.fail_vpc.load(Ordering::SeqCst) {
            return Err(StepError::CloudProvider("vpc quota exceeded".to_string()));
        }
        config.vpc_id = "vpc-1".to_string();
        config.vpc_cidr = "10.0.0.0/16".to_string();
        config.availability_zone = format!("{}a", config.region);
        config.subnet_id = "subnet-1".to_string();
        Ok(())
    }

    async fn ensure_gateway(&self, config: &mut AwsConfig) -> Result<(), StepError> {
        config.internet_gateway_id = "igw-1".to_string();
        config.route_table_id = "rtb-1".to_string();
        Ok(())
    }

    async fn ensure_security_groups(&self, config: &mut AwsConfig) -> Result<(), StepError> {
        config.masters_security_group_id = "sg-masters".to_string();
        config.nodes_security_group_id = "sg-nodes".to_string();
        Ok(())
    }

    async fn ensure_instance_profiles(&self, config: &mut AwsConfig) -> Result<(), StepError> {
        config.masters_instance_profile = "masters-profile".to_string();
        config.nodes_instance_profile = "nodes-profile".to_string();
        Ok(())
    }

    async fn import_key_pair(
        &self,
        _public_key: &str,
        config: &mut AwsConfig,
    ) -> Result<(), StepError> {
        config.key_pair_name = "capstan-bootstrap".to_string();
        Ok(())
    }

    async fn run_instance(&self, _config: &Config, name: &str) -> Result<MachineInfo, StepError> {
        self.launch(name).await
    }

    async fn terminate_instance(&self, name: &str) -> Result<(), StepError> {
        self.remove(name)
    }
}

#[async_trait]
impl DropletApi for FakeCloud {
    async fn ensure_ssh_key(
        &self,
        _public_key: &str,
        config: &mut DigitalOceanConfig,
    ) -> Result<(), StepError> {
        config.fingerprint = "3b:16:bf:e4:f7:2e".to_string();
        Ok(())
    }

    async fn create_droplet(&self, _config: &Config, name: &str) -> Result<MachineInfo, StepError> {
        self.launch(name).await
    }

    async fn delete_droplet(&self, name: &str) -> Result<(), StepError> {
        self.remove(name)
    }

    async fn delete_ssh_key(&self, fingerprint: &str) -> Result<(), StepError> {
        self.deleted_keys.lock().unwrap().push(fingerprint.to_string());
        Ok(())
    }
}

#[async_trait]
impl GceApi for FakeCloud {
    async fn insert_instance(
        &self,
        _config: &Config,
        name: &str,
    ) -> Result<MachineInfo, StepError> {
        self.launch(name).await
    }

    async fn delete_instance(&self, name: &str) -> Result<(), StepError> {
        self.remove(name)
    }
}

#[async_trait]
impl ClusterProbe for FakeCloud {
    async fn probe(&self, _config: &Config) -> Result<(), StepError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(StepError::CloudProvider(
                "control plane not answering".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fresh clients all backed by one `FakeCloud`.
pub fn fake_clients() -> CloudClients {
    fake_clients_with(Arc::new(FakeCloud::new()))
}

/// Clients backed by the given `FakeCloud`, so tests can steer and inspect it.
pub fn fake_clients_with(cloud: Arc<FakeCloud>) -> CloudClients {
    CloudClients {
        aws: cloud.clone(),
        digital_ocean: cloud.clone(),
        gce: cloud.clone(),
        probe: cloud,
    }
}
