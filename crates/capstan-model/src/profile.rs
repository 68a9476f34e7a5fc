//! Provisioning profiles

use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form machine parameters supplied per node, bound into the
/// provider-specific config before a task runs (e.g. `size`, `image`,
/// `instanceType`). Keys use the camelCase spellings of the config fields.
pub type NodeProfile = HashMap<String, String>;

/// Desired shape of a cluster, as submitted by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub provider: Provider,
    pub region: String,
    pub zone: String,
    pub arch: String,
    pub operating_system: String,
    pub operating_system_version: String,
    pub k8s_version: String,
    pub docker_version: String,
    pub helm_version: String,
    pub flannel_version: String,
    pub network_type: String,
    pub cidr: String,
    pub k8s_services_cidr: String,
    pub rbac_enabled: bool,
    pub user: String,
    pub password: String,

    #[serde(default)]
    pub master_profiles: Vec<NodeProfile>,
    #[serde(default)]
    pub nodes_profiles: Vec<NodeProfile>,

    /// Provider settings already known at submission time
    #[serde(default)]
    pub cloud_specific_settings: HashMap<String, String>,
}

impl Profile {
    pub fn master_count(&self) -> usize {
        self.master_profiles.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes_profiles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_counts() {
        let mut profile = Profile::default();
        assert_eq!(profile.master_count(), 0);

        profile.master_profiles.push(NodeProfile::new());
        profile.master_profiles.push(NodeProfile::new());
        profile.nodes_profiles.push(NodeProfile::new());

        assert_eq!(profile.master_count(), 2);
        assert_eq!(profile.node_count(), 1);
    }

    #[test]
    fn test_profile_serde() {
        let mut profile = Profile {
            provider: Provider::Aws,
            region: "us-east-1".into(),
            rbac_enabled: true,
            ..Default::default()
        };
        let mut node = NodeProfile::new();
        node.insert("instanceType".into(), "t3.medium".into());
        profile.nodes_profiles.push(node);

        let json = serde_json::to_string(&profile).unwrap();
        assert!(json.contains("\"rbacEnabled\":true"));
        assert!(json.contains("\"nodesProfiles\""));

        let parsed: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, profile);
    }
}
