//! Workflow registry
//!
//! Named, ordered step sequences. The registry is populated once at
//! construction by the per-provider step modules and read-only afterwards;
//! the provisioner owns one instance and shares it.

use crate::step::Step;
use crate::steps;
use capstan_model::Provider;
use std::collections::HashMap;
use std::sync::Arc;

/// Stable workflow names. These strings key persisted task records and must
/// never change.
pub const DIGITAL_OCEAN_MASTER: &str = "DigitalOceanMaster";
pub const DIGITAL_OCEAN_NODE: &str = "DigitalOceanNode";
pub const DIGITAL_OCEAN_DELETE_CLUSTER: &str = "DigitalOceanDeleteCluster";
pub const DIGITAL_OCEAN_DELETE_NODE: &str = "DigitalOceanDeleteNode";
pub const AWS_MASTER: &str = "AWSMaster";
pub const AWS_NODE: &str = "AWSNode";
pub const AWS_PRE_PROVISION: &str = "AWSPreProvision";
pub const GCE_MASTER: &str = "GCEMaster";
pub const GCE_NODE: &str = "GCENode";
pub const CLUSTER: &str = "Cluster";

/// The workflows a provider contributes to cluster provisioning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSet {
    /// Infrastructure creation that must run before any machine exists
    pub pre_provision: Option<&'static str>,
    pub provision_master: &'static str,
    pub provision_node: &'static str,
}

/// Look up the workflow set for a provider. Providers without registered
/// workflows yield `None`.
pub fn workflow_set(provider: Provider) -> Option<WorkflowSet> {
    match provider {
        Provider::Aws => Some(WorkflowSet {
            pre_provision: Some(AWS_PRE_PROVISION),
            provision_master: AWS_MASTER,
            provision_node: AWS_NODE,
        }),
        Provider::Gce => Some(WorkflowSet {
            pre_provision: None,
            provision_master: GCE_MASTER,
            provision_node: GCE_NODE,
        }),
        Provider::DigitalOcean => Some(WorkflowSet {
            pre_provision: None,
            provision_master: DIGITAL_OCEAN_MASTER,
            provision_node: DIGITAL_OCEAN_NODE,
        }),
        Provider::Packet | Provider::OpenStack => None,
    }
}

/// Mapping from workflow name to its ordered step list
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Vec<Arc<dyn Step>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in workflow, wired to the given cloud
    /// clients.
    pub fn standard(clients: steps::CloudClients) -> Self {
        let mut registry = Self::new();
        steps::aws::register(&mut registry, clients.aws);
        steps::digitalocean::register(&mut registry, clients.digital_ocean);
        steps::gce::register(&mut registry, clients.gce);
        steps::cluster::register(&mut registry, clients.probe);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, steps: Vec<Arc<dyn Step>>) {
        self.workflows.insert(name.into(), steps);
    }

    pub fn steps(&self, name: &str) -> Option<&[Arc<dyn Step>]> {
        self.workflows.get(name).map(|s| s.as_slice())
    }

    pub fn has_workflow(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn workflow_names(&self) -> Vec<&str> {
        self.workflows.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}
