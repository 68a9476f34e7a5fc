//! Persisted cluster record

use crate::node::Node;
use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cluster lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KubeState {
    #[default]
    Provisioning,
    Operational,
    Failed,
}

/// Kubernetes API credentials echoed onto the cluster record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    pub username: String,
    pub password: String,
    pub ca_cert: String,
    pub ca_key: String,
    pub admin_cert: String,
    pub admin_key: String,
}

/// Overlay network settings echoed onto the cluster record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    pub manager: String,
    pub version: String,
    #[serde(rename = "type")]
    pub network_type: String,
    pub cidr: String,
}

/// The persisted cluster record.
///
/// During provisioning this record is mutated by exactly one writer (the
/// cluster-state reducer); everything else reads snapshots of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Kube {
    pub id: String,
    pub name: String,
    pub state: KubeState,
    pub provider: Provider,
    pub account_name: String,

    pub rbac_enabled: bool,
    pub services_cidr: String,
    pub region: String,
    pub zone: String,
    pub arch: String,
    pub operating_system: String,
    pub operating_system_version: String,
    pub k8s_version: String,
    pub docker_version: String,
    pub helm_version: String,

    pub auth: Auth,

    pub ssh_user: String,
    pub ssh_public_key: String,
    pub bootstrap_public_key: String,
    pub bootstrap_private_key: String,

    pub user: String,
    pub password: String,

    pub networking: Networking,

    #[serde(default)]
    pub masters: HashMap<String, Node>,
    #[serde(default)]
    pub nodes: HashMap<String, Node>,

    /// Identities of every task that took part in provisioning this cluster
    #[serde(default)]
    pub tasks: Vec<String>,

    /// Provider-specific settings, keyed by the `cloud_spec` constants
    #[serde(default)]
    pub cloud_spec: HashMap<String, String>,
}

impl Kube {
    /// Place a node into the masters or nodes map according to its role.
    pub fn put_node(&mut self, node: Node) {
        let target = if node.is_master() {
            &mut self.masters
        } else {
            &mut self.nodes
        };
        target.insert(node.name.clone(), node);
    }

    /// First master with a known private address, if any.
    pub fn any_master(&self) -> Option<&Node> {
        self.masters.values().find(|n| !n.private_ip.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeRole, NodeState};

    fn active_node(name: &str, role: NodeRole) -> Node {
        let mut n = Node::planned("task", name, Provider::Aws, "us-east-1", role);
        n.state = NodeState::Active;
        n.private_ip = "10.0.0.5".into();
        n
    }

    #[test]
    fn test_put_node_routes_by_role() {
        let mut kube = Kube::default();
        kube.put_node(active_node("m1", NodeRole::Master));
        kube.put_node(active_node("w1", NodeRole::Worker));

        assert!(kube.masters.contains_key("m1"));
        assert!(kube.nodes.contains_key("w1"));
        assert_eq!(kube.masters.len(), 1);
        assert_eq!(kube.nodes.len(), 1);
    }

    #[test]
    fn test_put_node_replaces_planned_entry() {
        let mut kube = Kube::default();
        kube.put_node(Node::planned("task", "m1", Provider::Aws, "r", NodeRole::Master));
        kube.put_node(active_node("m1", NodeRole::Master));

        assert_eq!(kube.masters.len(), 1);
        assert_eq!(kube.masters["m1"].state, NodeState::Active);
    }

    #[test]
    fn test_any_master_needs_address() {
        let mut kube = Kube::default();
        kube.put_node(Node::planned("task", "m1", Provider::Aws, "r", NodeRole::Master));
        assert!(kube.any_master().is_none());

        kube.put_node(active_node("m2", NodeRole::Master));
        assert_eq!(kube.any_master().unwrap().name, "m2");
    }

    #[test]
    fn test_kube_serde_round_trip() {
        let mut kube = Kube {
            id: "abcd1234".into(),
            name: "prod".into(),
            state: KubeState::Provisioning,
            provider: Provider::DigitalOcean,
            ..Default::default()
        };
        kube.cloud_spec
            .insert("aws/vpcId".into(), "vpc-1".into());
        kube.tasks.push("task-1".into());

        let json = serde_json::to_string(&kube).unwrap();
        assert!(json.contains("\"cloudSpec\""));
        assert!(json.contains("\"provisioning\""));

        let parsed: Kube = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, kube);
    }
}
