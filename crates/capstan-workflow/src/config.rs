//! Per-provisioning config snapshot and event bus
//!
//! Every task receives the config by value: mutations inside a step stay
//! local to that task unless the step publishes an updated snapshot on the
//! config channel. The three event channels and the masters map are the
//! exceptions — they are shared across all clones of one provisioning.

use crate::sync::CountdownLatch;
use capstan_model::{KubeState, Node, Provider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// AWS-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AwsConfig {
    pub region: String,
    pub availability_zone: String,
    pub vpc_cidr: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub key_pair_name: String,
    pub masters_security_group_id: String,
    pub nodes_security_group_id: String,
    pub route_table_id: String,
    pub internet_gateway_id: String,
    pub masters_instance_profile: String,
    pub nodes_instance_profile: String,
    pub image_id: String,
    pub instance_type: String,
    pub volume_size: String,
}

/// GCE-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GceConfig {
    pub project_id: String,
    pub zone: String,
    pub machine_type: String,
    pub image_family: String,
}

/// DigitalOcean-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DigitalOceanConfig {
    pub region: String,
    pub size: String,
    pub image: String,
    /// Fingerprint of the bootstrap key registered with the account.
    /// DigitalOcean deletes keys by fingerprint, so it must be kept around.
    pub fingerprint: String,
}

/// Packet-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PacketConfig {
    pub project_id: String,
    pub facility: String,
    pub plan: String,
    pub operating_system: String,
}

/// OpenStack-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackConfig {
    pub auth_url: String,
    pub tenant_name: String,
    pub flavor_name: String,
    pub image_name: String,
}

/// SSH access material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub user: String,
    /// Key supplied by the user for their own access
    pub public_key: String,
    /// Keypair generated at bootstrap for the provisioner's access
    pub bootstrap_private_key: String,
    pub bootstrap_public_key: String,
}

/// Certificate material attached before any step runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CertificatesConfig {
    pub parent_cert: String,
    pub parent_key: String,
    pub ca_cert: String,
    pub ca_key: String,
    pub admin_cert: String,
    pub admin_key: String,
    pub username: String,
    pub password: String,
}

/// Flannel overlay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FlannelConfig {
    pub version: String,
    pub cidr: String,
    /// Filled with the first master's private address once known
    pub etcd_host: String,
}

/// Sending halves of the three event channels
#[derive(Debug, Clone)]
pub struct EventSinks {
    nodes: mpsc::UnboundedSender<Node>,
    kube_states: mpsc::UnboundedSender<KubeState>,
    configs: mpsc::UnboundedSender<Config>,
}

/// Receiving halves of the three event channels; consumed by the reducer
#[derive(Debug)]
pub struct EventStreams {
    pub nodes: mpsc::UnboundedReceiver<Node>,
    pub kube_states: mpsc::UnboundedReceiver<KubeState>,
    pub configs: mpsc::UnboundedReceiver<Config>,
}

type SharedStreams = Arc<Mutex<Option<EventStreams>>>;
type SharedMasters = Arc<Mutex<HashMap<String, Node>>>;

/// The full configuration value copied into each task at run-start
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub provider: Provider,
    pub cluster_id: String,
    pub cluster_name: String,
    pub cloud_account_name: String,
    pub is_master: bool,

    pub aws_config: AwsConfig,
    pub gce_config: GceConfig,
    pub digital_ocean_config: DigitalOceanConfig,
    pub packet_config: PacketConfig,
    pub os_config: OpenStackConfig,

    pub ssh_config: SshConfig,
    pub certificates_config: CertificatesConfig,
    pub flannel_config: FlannelConfig,

    /// Rewritten before each task run; step code names nodes from it
    pub task_id: String,
    /// The node currently being worked on
    pub node: Node,

    /// Masters accumulated as they come up; shared across config clones
    #[serde(skip)]
    masters: SharedMasters,

    /// Sized to the master count; master steps use it to wait for quorum
    #[serde(skip)]
    pub ready_for_bootstrap_latch: Option<CountdownLatch>,

    #[serde(skip)]
    sinks: Option<EventSinks>,
    #[serde(skip)]
    streams: SharedStreams,
}

impl Config {
    /// Create a config with a fresh event bus.
    pub fn new(
        provider: Provider,
        cluster_name: impl Into<String>,
        cloud_account_name: impl Into<String>,
    ) -> Self {
        let (node_tx, node_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = mpsc::unbounded_channel();

        Self {
            provider,
            cluster_name: cluster_name.into(),
            cloud_account_name: cloud_account_name.into(),
            sinks: Some(EventSinks {
                nodes: node_tx,
                kube_states: state_tx,
                configs: config_tx,
            }),
            streams: Arc::new(Mutex::new(Some(EventStreams {
                nodes: node_rx,
                kube_states: state_rx,
                configs: config_rx,
            }))),
            ..Default::default()
        }
    }

    /// Take the receiving halves of the event channels. Yields `Some` exactly
    /// once per provisioning, across all clones of this config.
    pub fn take_event_streams(&self) -> Option<EventStreams> {
        self.streams.lock().unwrap().take()
    }

    /// Publish a node event.
    pub fn emit_node(&self, node: Node) {
        match &self.sinks {
            Some(sinks) => {
                if sinks.nodes.send(node).is_err() {
                    warn!(cluster = %self.cluster_id, "node event dropped: reducer gone");
                }
            }
            None => warn!(cluster = %self.cluster_id, "node event dropped: no event bus"),
        }
    }

    /// Publish a cluster state transition.
    pub fn emit_kube_state(&self, state: KubeState) {
        match &self.sinks {
            Some(sinks) => {
                if sinks.kube_states.send(state).is_err() {
                    warn!(cluster = %self.cluster_id, "state event dropped: reducer gone");
                }
            }
            None => warn!(cluster = %self.cluster_id, "state event dropped: no event bus"),
        }
    }

    /// Publish this config snapshot (e.g. after pre-provision filled in
    /// infrastructure identifiers).
    pub fn emit_config(&self) {
        match &self.sinks {
            Some(sinks) => {
                if sinks.configs.send(self.clone()).is_err() {
                    warn!(cluster = %self.cluster_id, "config event dropped: reducer gone");
                }
            }
            None => warn!(cluster = %self.cluster_id, "config event dropped: no event bus"),
        }
    }

    /// Record a master that has come up. Visible to every clone.
    pub fn add_master(&self, node: Node) {
        self.masters.lock().unwrap().insert(node.name.clone(), node);
    }

    /// Any master with a known private address.
    pub fn get_master(&self) -> Option<Node> {
        self.masters
            .lock()
            .unwrap()
            .values()
            .find(|n| !n.private_ip.is_empty())
            .cloned()
    }

    /// Snapshot of the masters recorded so far.
    pub fn masters(&self) -> Vec<Node> {
        self.masters.lock().unwrap().values().cloned().collect()
    }
}
