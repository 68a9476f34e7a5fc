//! Planning helpers: node naming, profile binding, cloud-spec mapping

use capstan_model::{cloud_spec, node_name, Kube, Node, NodeProfile, NodeRole, Profile, Provider};
use capstan_workflow::{Config, Task};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Overlay free-form string parameters onto a serializable target.
///
/// Keys use the target's serialized field names; unknown keys are dropped by
/// the round trip. This is how node profiles reach the provider configs.
pub fn bind_params<T>(params: &NodeProfile, target: &mut T) -> Result<(), serde_json::Error>
where
    T: Serialize + DeserializeOwned,
{
    if params.is_empty() {
        return Ok(());
    }

    let mut value = serde_json::to_value(&*target)?;
    if let Value::Object(fields) = &mut value {
        for (key, param) in params {
            fields.insert(key.clone(), Value::String(param.clone()));
        }
    }
    *target = serde_json::from_value(value)?;
    Ok(())
}

/// Bind one node profile into the provider-specific section of the config.
pub fn fill_node_cloud_specific_data(
    provider: Provider,
    profile: &NodeProfile,
    config: &mut Config,
) -> Result<(), serde_json::Error> {
    match provider {
        Provider::Aws => bind_params(profile, &mut config.aws_config),
        Provider::Gce => bind_params(profile, &mut config.gce_config),
        Provider::DigitalOcean => bind_params(profile, &mut config.digital_ocean_config),
        Provider::Packet => bind_params(profile, &mut config.packet_config),
        Provider::OpenStack => bind_params(profile, &mut config.os_config),
    }
}

/// Planned node records for every master and worker task, keyed by name.
pub fn nodes_from_profile(
    cluster_name: &str,
    master_tasks: &[Task],
    node_tasks: &[Task],
    profile: &Profile,
) -> (HashMap<String, Node>, HashMap<String, Node>) {
    let mut masters = HashMap::new();
    let mut nodes = HashMap::new();

    for task in master_tasks {
        let name = node_name(profile.provider, cluster_name, &task.id, true);
        let node = Node::planned(
            task.id.clone(),
            name.clone(),
            profile.provider,
            profile.region.clone(),
            NodeRole::Master,
        );
        masters.insert(name, node);
    }

    for task in node_tasks {
        let short_id = &task.id[..task.id.len().min(4)];
        let name = node_name(profile.provider, cluster_name, short_id, false);
        let node = Node::planned(
            task.id.clone(),
            name.clone(),
            profile.provider,
            profile.region.clone(),
            NodeRole::Worker,
        );
        nodes.insert(name, node);
    }

    (masters, nodes)
}

/// Every task identity taking part in a provisioning: cluster first, then
/// pre-provision if any, then masters, then workers.
pub fn grab_task_ids(
    pre_provision: Option<&Task>,
    cluster: &Task,
    master_tasks: &[Task],
    node_tasks: &[Task],
) -> Vec<String> {
    let mut ids = Vec::with_capacity(2 + master_tasks.len() + node_tasks.len());
    ids.push(cluster.id.clone());

    // Not every provider has a pre-provision workflow.
    if let Some(task) = pre_provision {
        ids.push(task.id.clone());
    }
    for task in master_tasks {
        ids.push(task.id.clone());
    }
    for task in node_tasks {
        ids.push(task.id.clone());
    }

    ids
}

/// Rewrite the provider-specific section of the cluster record from a config
/// snapshot. The reducer calls this on every config event.
pub fn update_cloud_specific_data(kube: &mut Kube, config: &Config) {
    kube.bootstrap_private_key = config.ssh_config.bootstrap_private_key.clone();
    kube.ssh_public_key = config.ssh_config.public_key.clone();

    let mut settings = HashMap::new();
    match config.provider {
        Provider::Aws => {
            let aws = &config.aws_config;
            settings.insert(
                cloud_spec::AWS_AVAILABILITY_ZONE.to_string(),
                aws.availability_zone.clone(),
            );
            settings.insert(cloud_spec::AWS_VPC_CIDR.to_string(), aws.vpc_cidr.clone());
            settings.insert(cloud_spec::AWS_VPC_ID.to_string(), aws.vpc_id.clone());
            settings.insert(
                cloud_spec::AWS_KEY_PAIR_NAME.to_string(),
                aws.key_pair_name.clone(),
            );
            settings.insert(
                cloud_spec::AWS_MASTERS_SEC_GROUP_ID.to_string(),
                aws.masters_security_group_id.clone(),
            );
            settings.insert(
                cloud_spec::AWS_NODES_SEC_GROUP_ID.to_string(),
                aws.nodes_security_group_id.clone(),
            );
            settings.insert(
                cloud_spec::AWS_SSH_BOOTSTRAP_PRIVATE_KEY.to_string(),
                config.ssh_config.bootstrap_private_key.clone(),
            );
            settings.insert(
                cloud_spec::AWS_USER_PROVIDED_SSH_PUBLIC_KEY.to_string(),
                config.ssh_config.public_key.clone(),
            );
            settings.insert(
                cloud_spec::AWS_ROUTE_TABLE_ID.to_string(),
                aws.route_table_id.clone(),
            );
            settings.insert(
                cloud_spec::AWS_INTERNET_GATEWAY_ID.to_string(),
                aws.internet_gateway_id.clone(),
            );
            settings.insert(
                cloud_spec::AWS_MASTERS_INSTANCE_PROFILE.to_string(),
                aws.masters_instance_profile.clone(),
            );
            settings.insert(
                cloud_spec::AWS_NODES_INSTANCE_PROFILE.to_string(),
                aws.nodes_instance_profile.clone(),
            );
            settings.insert(cloud_spec::AWS_IMAGE_ID.to_string(), aws.image_id.clone());
        }
        Provider::DigitalOcean => {
            // DigitalOcean deletes keys by fingerprint, so the bootstrap
            // public key must survive on the record.
            kube.bootstrap_public_key = config.ssh_config.bootstrap_public_key.clone();
        }
        Provider::Gce | Provider::Packet | Provider::OpenStack => {}
    }

    kube.cloud_spec = settings;
}

/// Load provider-specific data from a persisted cluster back into a config,
/// so added nodes land in the infrastructure the cluster was built with.
pub fn load_cloud_specific_data(kube: &Kube, config: &mut Config) {
    config.ssh_config.bootstrap_private_key = kube.bootstrap_private_key.clone();
    config.ssh_config.bootstrap_public_key = kube.bootstrap_public_key.clone();
    if config.ssh_config.user.is_empty() {
        config.ssh_config.user = kube.ssh_user.clone();
    }

    let spec = &kube.cloud_spec;
    let fetch = |key: &str| spec.get(key).cloned().unwrap_or_default();

    match config.provider {
        Provider::Aws => {
            let aws = &mut config.aws_config;
            aws.availability_zone = fetch(cloud_spec::AWS_AVAILABILITY_ZONE);
            aws.vpc_cidr = fetch(cloud_spec::AWS_VPC_CIDR);
            aws.vpc_id = fetch(cloud_spec::AWS_VPC_ID);
            aws.key_pair_name = fetch(cloud_spec::AWS_KEY_PAIR_NAME);
            aws.masters_security_group_id = fetch(cloud_spec::AWS_MASTERS_SEC_GROUP_ID);
            aws.nodes_security_group_id = fetch(cloud_spec::AWS_NODES_SEC_GROUP_ID);
            aws.route_table_id = fetch(cloud_spec::AWS_ROUTE_TABLE_ID);
            aws.internet_gateway_id = fetch(cloud_spec::AWS_INTERNET_GATEWAY_ID);
            aws.masters_instance_profile = fetch(cloud_spec::AWS_MASTERS_INSTANCE_PROFILE);
            aws.nodes_instance_profile = fetch(cloud_spec::AWS_NODES_INSTANCE_PROFILE);
            aws.image_id = fetch(cloud_spec::AWS_IMAGE_ID);
            if aws.region.is_empty() {
                aws.region = kube.region.clone();
            }
            config.ssh_config.public_key = fetch(cloud_spec::AWS_USER_PROVIDED_SSH_PUBLIC_KEY);
        }
        Provider::DigitalOcean => {
            if config.digital_ocean_config.region.is_empty() {
                config.digital_ocean_config.region = kube.region.clone();
            }
        }
        Provider::Gce | Provider::Packet | Provider::OpenStack => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_model::NodeState;
    use capstan_workflow::{MemoryStorage, NoopStep, WorkflowRegistry};
    use std::sync::Arc;

    async fn make_task(registry: &WorkflowRegistry) -> Task {
        Task::new("Demo", registry, Arc::new(MemoryStorage::new()))
            .await
            .unwrap()
    }

    fn demo_registry() -> WorkflowRegistry {
        let mut registry = WorkflowRegistry::new();
        registry.register("Demo", vec![Arc::new(NoopStep::new("one"))]);
        registry
    }

    #[test]
    fn test_bind_params_overlays_fields() {
        let mut profile = NodeProfile::new();
        profile.insert("instanceType".into(), "t3.medium".into());
        profile.insert("imageId".into(), "ami-xyz".into());
        profile.insert("unknownKey".into(), "dropped".into());

        let mut config = Config::new(Provider::Aws, "c", "a");
        config.aws_config.region = "us-east-1".into();

        fill_node_cloud_specific_data(Provider::Aws, &profile, &mut config).unwrap();

        assert_eq!(config.aws_config.instance_type, "t3.medium");
        assert_eq!(config.aws_config.image_id, "ami-xyz");
        // Untouched fields survive the overlay.
        assert_eq!(config.aws_config.region, "us-east-1");
    }

    #[test]
    fn test_bind_params_other_providers() {
        let mut profile = NodeProfile::new();
        profile.insert("size".into(), "s-2vcpu-4gb".into());
        profile.insert("image".into(), "ubuntu-18-04-x64".into());

        let mut config = Config::new(Provider::DigitalOcean, "c", "a");
        fill_node_cloud_specific_data(Provider::DigitalOcean, &profile, &mut config).unwrap();

        assert_eq!(config.digital_ocean_config.size, "s-2vcpu-4gb");
        assert_eq!(config.digital_ocean_config.image, "ubuntu-18-04-x64");
    }

    #[tokio::test]
    async fn test_nodes_from_profile_naming() {
        let registry = demo_registry();
        let master_tasks = vec![make_task(&registry).await, make_task(&registry).await];
        let node_tasks = vec![make_task(&registry).await];

        let profile = Profile {
            provider: Provider::DigitalOcean,
            region: "fra1".into(),
            ..Default::default()
        };

        let (masters, nodes) = nodes_from_profile("prod", &master_tasks, &node_tasks, &profile);

        assert_eq!(masters.len(), 2);
        assert_eq!(nodes.len(), 1);
        for (name, node) in &masters {
            assert!(name.starts_with("prod-master-"));
            assert_eq!(node.state, NodeState::Planned);
            assert_eq!(node.region, "fra1");
        }
        let worker = nodes.values().next().unwrap();
        assert_eq!(worker.name, format!("prod-node-{}", &node_tasks[0].id[..4]));
        assert_eq!(worker.task_id, node_tasks[0].id);
    }

    #[tokio::test]
    async fn test_nodes_from_profile_gce_lowercase() {
        let registry = demo_registry();
        let master_tasks = vec![make_task(&registry).await];

        let profile = Profile {
            provider: Provider::Gce,
            region: "europe-west1".into(),
            ..Default::default()
        };

        let (masters, _) = nodes_from_profile("Prod", &master_tasks, &[], &profile);
        let name = masters.keys().next().unwrap();
        assert_eq!(name.as_str(), name.to_lowercase().as_str());
        assert!(name.starts_with("prod-master-"));
    }

    #[tokio::test]
    async fn test_grab_task_ids_order_and_union() {
        let registry = demo_registry();
        let pre = make_task(&registry).await;
        let cluster = make_task(&registry).await;
        let masters = vec![make_task(&registry).await, make_task(&registry).await];
        let workers = vec![make_task(&registry).await];

        let ids = grab_task_ids(Some(&pre), &cluster, &masters, &workers);
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], cluster.id);
        assert_eq!(ids[1], pre.id);
        assert!(ids.contains(&masters[1].id));
        assert!(ids.contains(&workers[0].id));

        let without_pre = grab_task_ids(None, &cluster, &masters, &workers);
        assert_eq!(without_pre.len(), 4);
    }

    #[test]
    fn test_update_cloud_specific_data_aws_keys() {
        let mut config = Config::new(Provider::Aws, "prod", "acc");
        config.aws_config.availability_zone = "us-east-1a".into();
        config.aws_config.vpc_cidr = "10.0.0.0/16".into();
        config.aws_config.vpc_id = "vpc-1".into();
        config.aws_config.key_pair_name = "kp".into();
        config.aws_config.masters_security_group_id = "sg-m".into();
        config.aws_config.nodes_security_group_id = "sg-n".into();
        config.aws_config.route_table_id = "rtb-1".into();
        config.aws_config.internet_gateway_id = "igw-1".into();
        config.aws_config.masters_instance_profile = "prof-m".into();
        config.aws_config.nodes_instance_profile = "prof-n".into();
        config.aws_config.image_id = "ami-1".into();
        config.ssh_config.bootstrap_private_key = "PRIVATE".into();
        config.ssh_config.public_key = "ssh-rsa USER".into();

        let mut kube = Kube::default();
        update_cloud_specific_data(&mut kube, &config);

        assert_eq!(kube.cloud_spec["aws/availabilityZone"], "us-east-1a");
        assert_eq!(kube.cloud_spec["aws/vpcCidr"], "10.0.0.0/16");
        assert_eq!(kube.cloud_spec["aws/vpcId"], "vpc-1");
        assert_eq!(kube.cloud_spec["aws/keyPairName"], "kp");
        assert_eq!(kube.cloud_spec["aws/mastersSecGroupId"], "sg-m");
        assert_eq!(kube.cloud_spec["aws/nodesSecGroupId"], "sg-n");
        assert_eq!(kube.cloud_spec["aws/sshBootstrapPrivateKey"], "PRIVATE");
        assert_eq!(kube.cloud_spec["aws/userProvidedSshPublicKey"], "ssh-rsa USER");
        assert_eq!(kube.cloud_spec["aws/routeTableId"], "rtb-1");
        assert_eq!(kube.cloud_spec["aws/internetGatewayId"], "igw-1");
        assert_eq!(kube.cloud_spec["aws/mastersInstanceProfile"], "prof-m");
        assert_eq!(kube.cloud_spec["aws/nodesInstanceProfile"], "prof-n");
        assert_eq!(kube.cloud_spec["aws/imageId"], "ami-1");
        assert_eq!(kube.bootstrap_private_key, "PRIVATE");
    }

    #[test]
    fn test_update_cloud_specific_data_digitalocean() {
        let mut config = Config::new(Provider::DigitalOcean, "prod", "acc");
        config.ssh_config.bootstrap_public_key = "ssh-rsa BOOT".into();

        let mut kube = Kube::default();
        update_cloud_specific_data(&mut kube, &config);

        assert_eq!(kube.bootstrap_public_key, "ssh-rsa BOOT");
        assert!(kube.cloud_spec.is_empty());
    }

    #[test]
    fn test_load_cloud_specific_data_round_trip() {
        let mut config = Config::new(Provider::Aws, "prod", "acc");
        config.aws_config.vpc_id = "vpc-1".into();
        config.aws_config.key_pair_name = "kp".into();
        config.aws_config.availability_zone = "us-east-1a".into();
        config.ssh_config.bootstrap_private_key = "PRIVATE".into();
        config.ssh_config.public_key = "ssh-rsa USER".into();

        let mut kube = Kube {
            region: "us-east-1".into(),
            ..Default::default()
        };
        update_cloud_specific_data(&mut kube, &config);

        let mut loaded = Config::new(Provider::Aws, "prod", "acc");
        load_cloud_specific_data(&kube, &mut loaded);

        assert_eq!(loaded.aws_config.vpc_id, "vpc-1");
        assert_eq!(loaded.aws_config.key_pair_name, "kp");
        assert_eq!(loaded.aws_config.availability_zone, "us-east-1a");
        assert_eq!(loaded.aws_config.region, "us-east-1");
        assert_eq!(loaded.ssh_config.bootstrap_private_key, "PRIVATE");
        assert_eq!(loaded.ssh_config.public_key, "ssh-rsa USER");
    }
}
