//! Node records and deterministic node naming

use crate::provider::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    #[default]
    Worker,
}

/// Node lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Planned,
    Provisioning,
    Active,
    Failed,
}

/// A single machine belonging to a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Identity of the provisioning task that created this node
    pub task_id: String,
    pub name: String,
    pub provider: Provider,
    pub region: String,
    pub role: NodeRole,
    pub state: NodeState,
    #[serde(default)]
    pub private_ip: String,
    #[serde(default)]
    pub public_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Node {
    /// A planned node: named and attached to its task, no machine behind it yet.
    pub fn planned(
        task_id: impl Into<String>,
        name: impl Into<String>,
        provider: Provider,
        region: impl Into<String>,
        role: NodeRole,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            name: name.into(),
            provider,
            region: region.into(),
            role,
            state: NodeState::Planned,
            private_ip: String::new(),
            public_ip: String::new(),
            created_at: None,
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }
}

/// Build the deterministic node name for a task.
///
/// Only the first four characters of `task_id` take part in the name, so
/// callers may pass a full task identity or a pre-truncated one. GCE rejects
/// mixed-case instance names, so names are lowercased there.
pub fn node_name(provider: Provider, cluster_name: &str, task_id: &str, is_master: bool) -> String {
    let role = if is_master { "master" } else { "node" };
    let short = &task_id[..task_id.len().min(4)];
    let name = format!("{cluster_name}-{role}-{short}");

    match provider {
        Provider::Gce => name.to_lowercase(),
        _ => name,
    }
}
