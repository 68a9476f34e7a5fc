//! The task provisioner
//!
//! Plans and drives cluster provisioning: one task per role, masters gated
//! by quorum latches, workers best-effort, a final cluster check, and one
//! cancel function per cluster. Only planning errors surface synchronously;
//! everything after the driver detaches is reported through kube-state
//! events and per-task statuses.

use crate::bootstrap::{bootstrap_certs, bootstrap_keys, DEFAULT_KEY_BITS};
use crate::error::{ProvisionError, Result};
use crate::monitor::ClusterStateMonitor;
use crate::rate_limiter::RateLimiter;
use crate::service::KubeService;
use crate::util::{
    fill_node_cloud_specific_data, grab_task_ids, load_cloud_specific_data, nodes_from_profile,
};
use crate::writer::{file_writer_factory, WriterFactory};
use capstan_model::{Auth, Kube, KubeState, Networking, Node, NodeProfile, Profile};
use capstan_workflow::{
    cancel_pair_with_parent, workflow_set, CancelHandle, CancelSignal, Config, CountdownLatch,
    Storage, Task, WorkflowRegistry, CLUSTER,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Task-map key for master tasks
pub const ROLE_MASTER: &str = "master";
/// Task-map key for worker tasks
pub const ROLE_NODE: &str = "node";
/// Task-map key for the post-provision cluster task
pub const ROLE_CLUSTER: &str = "cluster";
/// Task-map key for the pre-provision task, when the provider has one
pub const ROLE_PRE_PROVISION: &str = "preprovision";

/// All tasks planned for one cluster provisioning
struct Plan {
    pre_provision: Option<Task>,
    masters: Vec<Task>,
    nodes: Vec<Task>,
    cluster: Task,
}

/// Scheduler for cluster and node provisioning.
///
/// The provisioner is shared across every caller of the process: the rate
/// limiter and the cancel map are deliberately global.
#[derive(Clone)]
pub struct TaskProvisioner {
    storage: Arc<dyn Storage>,
    kube_service: Arc<dyn KubeService>,
    registry: Arc<WorkflowRegistry>,
    rate_limiter: Arc<RateLimiter>,
    cancels: Arc<Mutex<HashMap<String, CancelHandle>>>,
    get_writer: WriterFactory,
    key_bits: usize,
}

impl TaskProvisioner {
    pub fn new(
        storage: Arc<dyn Storage>,
        kube_service: Arc<dyn KubeService>,
        registry: Arc<WorkflowRegistry>,
        spawn_interval: Duration,
    ) -> Self {
        Self {
            storage,
            kube_service,
            registry,
            rate_limiter: Arc::new(RateLimiter::new(spawn_interval)),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            get_writer: file_writer_factory(std::env::temp_dir().join("capstan-tasks")),
            key_bits: DEFAULT_KEY_BITS,
        }
    }

    /// Redirect per-task progress output.
    pub fn with_writer_factory(mut self, factory: WriterFactory) -> Self {
        self.get_writer = factory;
        self
    }

    /// Override the bootstrap key size (tests use small keys).
    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    /// Provision a whole cluster.
    ///
    /// Returns the planned tasks keyed by role as soon as planning,
    /// bootstrap and the initial persist are done; execution continues in a
    /// detached driver. Execution failures surface as kube-state events and
    /// per-task statuses, never through this return value.
    pub async fn provision_cluster(
        &self,
        parent: CancelSignal,
        profile: &Profile,
        mut config: Config,
    ) -> Result<HashMap<String, Vec<Task>>> {
        if config.cluster_name.trim().is_empty() {
            return Err(ProvisionError::ValidationFailed(
                "empty cluster name".to_string(),
            ));
        }
        if profile.master_profiles.is_empty() {
            return Err(ProvisionError::ValidationFailed(
                "at least one master profile is required".to_string(),
            ));
        }

        let plan = self
            .prepare(profile.provider, profile.master_count(), profile.node_count())
            .await?;

        // The cluster task identity is the root of the cluster identity.
        if plan.cluster.id.len() < 8 {
            return Err(ProvisionError::InvalidPlan(format!(
                "cluster task id '{}' is too short",
                plan.cluster.id
            )));
        }
        config.cluster_id = plan.cluster.id[..8].to_string();

        let (handle, cancel) = cancel_pair_with_parent(parent);
        self.cancels
            .lock()
            .unwrap()
            .insert(config.cluster_id.clone(), handle);

        let (masters, nodes) =
            nodes_from_profile(&config.cluster_name, &plan.masters, &plan.nodes, profile);

        bootstrap_keys(&mut config, self.key_bits)?;
        bootstrap_certs(&mut config)?;

        let task_ids = grab_task_ids(
            plan.pre_provision.as_ref(),
            &plan.cluster,
            &plan.masters,
            &plan.nodes,
        );
        self.build_initial_cluster(profile, masters, nodes, &config, task_ids)
            .await?;

        let streams = config.take_event_streams().ok_or_else(|| {
            ProvisionError::Unknown("config event streams already taken".to_string())
        })?;
        let monitor = ClusterStateMonitor::new(self.kube_service.clone(), config.cluster_id.clone());
        tokio::spawn(monitor.run(cancel.clone(), streams));

        let mut task_map = HashMap::new();
        task_map.insert(ROLE_MASTER.to_string(), plan.masters.clone());
        task_map.insert(ROLE_NODE.to_string(), plan.nodes.clone());
        task_map.insert(ROLE_CLUSTER.to_string(), vec![plan.cluster.clone()]);
        if let Some(pre) = &plan.pre_provision {
            task_map.insert(ROLE_PRE_PROVISION.to_string(), vec![pre.clone()]);
        }

        let driver = self.clone();
        let profile = profile.clone();
        tokio::spawn(async move {
            driver.drive(cancel, profile, config, plan).await;
        });

        Ok(task_map)
    }

    /// Add nodes to an existing cluster. Task ids are returned as soon as
    /// every task is launched; per-node failures are logged, never fatal.
    pub async fn provision_nodes(
        &self,
        parent: CancelSignal,
        node_profiles: &[NodeProfile],
        kube: &Kube,
        mut config: Config,
    ) -> Result<Vec<String>> {
        if kube.masters.is_empty() {
            return Err(ProvisionError::NotFound("master node".to_string()));
        }
        for master in kube.masters.values() {
            config.add_master(master.clone());
        }
        config.cluster_id = kube.id.clone();
        config.cluster_name = kube.name.clone();
        config.is_master = false;

        let set = workflow_set(config.provider)
            .ok_or_else(|| ProvisionError::NotFound("provider workflow".to_string()))?;

        let persisted = self
            .kube_service
            .get(&config.cluster_id)
            .await
            .map_err(|err| ProvisionError::KubeService(err.to_string()))?;
        load_cloud_specific_data(&persisted, &mut config);

        let (handle, cancel) = cancel_pair_with_parent(parent);
        self.cancels
            .lock()
            .unwrap()
            .insert(config.cluster_id.clone(), handle);

        let streams = config.take_event_streams().ok_or_else(|| {
            ProvisionError::Unknown("config event streams already taken".to_string())
        })?;
        let monitor = ClusterStateMonitor::new(self.kube_service.clone(), config.cluster_id.clone());
        tokio::spawn(monitor.run(cancel.clone(), streams));

        let mut task_ids = Vec::with_capacity(node_profiles.len());
        let mut watchers = Vec::with_capacity(node_profiles.len());

        for node_profile in node_profiles {
            self.rate_limiter.take().await;

            let task = Task::new(set.provision_node, &self.registry, self.storage.clone()).await?;
            let out = (self.get_writer)(&task.id)
                .map_err(|err| ProvisionError::Unknown(format!("get writer: {err}")))?;

            fill_node_cloud_specific_data(config.provider, node_profile, &mut config).map_err(
                |err| ProvisionError::ValidationFailed(format!("bind node profile: {err}")),
            )?;

            // Step code names the machine from the task identity.
            config.task_id = task.id.clone();
            task_ids.push(task.id.clone());

            let task_id = task.id.clone();
            let cluster_id = config.cluster_id.clone();
            let done = task.spawn_run(cancel.clone(), config.clone(), out);
            watchers.push(tokio::spawn(async move {
                match done.await {
                    Ok(Ok(())) => info!(task = %task_id, cluster = %cluster_id, "add-node task finished"),
                    Ok(Err(err)) => {
                        error!(task = %task_id, cluster = %cluster_id, error = %err, "add-node task failed")
                    }
                    Err(_) => error!(task = %task_id, cluster = %cluster_id, "add-node task dropped"),
                }
            }));
        }

        // Drop the cancel entry once the batch has drained.
        let cancels = self.cancels.clone();
        let cluster_id = config.cluster_id.clone();
        tokio::spawn(async move {
            for watcher in watchers {
                let _ = watcher.await;
            }
            cancels.lock().unwrap().remove(&cluster_id);
        });

        Ok(task_ids)
    }

    /// Cancel a running provisioning by cluster id. Cancelling an unknown or
    /// already finished cluster yields NotFound.
    pub fn cancel(&self, cluster_id: &str) -> Result<()> {
        match self.cancels.lock().unwrap().get(cluster_id) {
            Some(handle) => {
                info!(cluster = %cluster_id, "cancelling provisioning");
                handle.cancel();
                Ok(())
            }
            None => Err(ProvisionError::NotFound(format!("cluster {cluster_id}"))),
        }
    }

    fn unregister_cancel(&self, cluster_id: &str) {
        self.cancels.lock().unwrap().remove(cluster_id);
    }

    /// Create every task the provider needs for this cluster.
    async fn prepare(
        &self,
        provider: capstan_model::Provider,
        master_count: usize,
        node_count: usize,
    ) -> Result<Plan> {
        let set = workflow_set(provider)
            .ok_or_else(|| ProvisionError::NotFound("provider workflow".to_string()))?;

        let pre_provision = match set.pre_provision {
            Some(name) => Some(Task::new(name, &self.registry, self.storage.clone()).await?),
            None => None,
        };

        let mut masters = Vec::with_capacity(master_count);
        for _ in 0..master_count {
            masters.push(Task::new(set.provision_master, &self.registry, self.storage.clone()).await?);
        }

        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(Task::new(set.provision_node, &self.registry, self.storage.clone()).await?);
        }

        let cluster = Task::new(CLUSTER, &self.registry, self.storage.clone()).await?;

        Ok(Plan {
            pre_provision,
            masters,
            nodes,
            cluster,
        })
    }

    /// Persist the cluster record before execution starts.
    async fn build_initial_cluster(
        &self,
        profile: &Profile,
        masters: HashMap<String, Node>,
        nodes: HashMap<String, Node>,
        config: &Config,
        task_ids: Vec<String>,
    ) -> Result<()> {
        let kube = Kube {
            id: config.cluster_id.clone(),
            name: config.cluster_name.clone(),
            state: KubeState::Provisioning,
            provider: profile.provider,
            account_name: config.cloud_account_name.clone(),

            rbac_enabled: profile.rbac_enabled,
            services_cidr: profile.k8s_services_cidr.clone(),
            region: profile.region.clone(),
            zone: profile.zone.clone(),
            arch: profile.arch.clone(),
            operating_system: profile.operating_system.clone(),
            operating_system_version: profile.operating_system_version.clone(),
            k8s_version: profile.k8s_version.clone(),
            docker_version: profile.docker_version.clone(),
            helm_version: profile.helm_version.clone(),

            auth: Auth {
                username: config.certificates_config.username.clone(),
                password: config.certificates_config.password.clone(),
                ca_cert: config.certificates_config.ca_cert.clone(),
                ca_key: config.certificates_config.ca_key.clone(),
                admin_cert: config.certificates_config.admin_cert.clone(),
                admin_key: config.certificates_config.admin_key.clone(),
            },

            ssh_user: config.ssh_config.user.clone(),
            ssh_public_key: config.ssh_config.public_key.clone(),
            bootstrap_public_key: config.ssh_config.bootstrap_public_key.clone(),
            bootstrap_private_key: config.ssh_config.bootstrap_private_key.clone(),

            user: profile.user.clone(),
            password: profile.password.clone(),

            networking: Networking {
                manager: profile.flannel_version.clone(),
                version: profile.flannel_version.clone(),
                network_type: profile.network_type.clone(),
                cidr: profile.cidr.clone(),
            },

            masters,
            nodes,
            tasks: task_ids,
            cloud_spec: profile.cloud_specific_settings.clone(),
        };

        self.kube_service
            .create(&kube)
            .await
            .map_err(|err| ProvisionError::KubeService(err.to_string()))
    }

    /// The detached driver: pre-provision, masters with quorum gating,
    /// workers, post-provision check.
    async fn drive(self, cancel: CancelSignal, profile: Profile, mut config: Config, plan: Plan) {
        let cluster_id = config.cluster_id.clone();

        if let Some(mut pre) = plan.pre_provision {
            match self.pre_provision(&cancel, &mut pre, &config).await {
                Ok(()) => {
                    // The pre-provision config now carries VPC, security
                    // group and gateway identifiers; adopt it.
                    config = pre.config.clone();
                }
                Err(err) => {
                    error!(cluster = %cluster_id, error = %err, "pre-provision failed");
                    self.unregister_cancel(&cluster_id);
                    return;
                }
            }
        }

        config.ready_for_bootstrap_latch =
            Some(CountdownLatch::new(cancel.clone(), profile.master_count()));

        let quorum = profile.master_count() / 2 + 1;
        let done_latch = CountdownLatch::new(cancel.clone(), quorum);
        let fail_latch = CountdownLatch::new(cancel.clone(), quorum);

        config.is_master = true;
        for (index, task) in plan.masters.into_iter().enumerate() {
            self.rate_limiter.take().await;

            let out = match (self.get_writer)(&task.id) {
                Ok(out) => out,
                Err(err) => {
                    error!(task = %task.id, error = %err, "cannot open task writer");
                    config.emit_kube_state(KubeState::Failed);
                    self.unregister_cancel(&cluster_id);
                    return;
                }
            };

            if let Err(err) = fill_node_cloud_specific_data(
                profile.provider,
                &profile.master_profiles[index],
                &mut config,
            ) {
                error!(task = %task.id, error = %err, "bind master profile");
            }

            config.task_id = task.id.clone();
            let task_id = task.id.clone();
            let done = done_latch.clone();
            let fail = fail_latch.clone();
            let result = task.spawn_run(cancel.clone(), config.clone(), out);
            tokio::spawn(async move {
                match result.await {
                    Ok(Ok(())) => {
                        info!(task = %task_id, "master task finished");
                        done.count_down();
                    }
                    Ok(Err(err)) => {
                        error!(task = %task_id, error = %err, "master task failed");
                        fail.count_down();
                    }
                    Err(_) => {
                        error!(task = %task_id, "master task dropped");
                        fail.count_down();
                    }
                }
            });
        }

        let quorum_lost = tokio::select! {
            _ = done_latch.wait() => false,
            _ = fail_latch.wait() => true,
        };
        if cancel.is_cancelled() {
            error!(cluster = %cluster_id, "provisioning cancelled during master phase");
            config.emit_kube_state(KubeState::Failed);
            self.unregister_cancel(&cluster_id);
            return;
        }
        if quorum_lost {
            // Once a majority of masters is gone the cluster cannot form.
            error!(cluster = %cluster_id, "master quorum lost");
            config.emit_kube_state(KubeState::Failed);
            self.unregister_cancel(&cluster_id);
            return;
        }
        info!(cluster = %cluster_id, "master quorum reached, provisioning workers");

        self.provision_workers(&cancel, &profile, &mut config, plan.nodes)
            .await;

        self.wait_cluster(&cancel, plan.cluster, &config).await;
        info!(cluster = %cluster_id, "cluster deployment finished");
        self.unregister_cancel(&cluster_id);
    }

    /// Run the pre-provision task inline and publish its outcome.
    async fn pre_provision(
        &self,
        cancel: &CancelSignal,
        task: &mut Task,
        config: &Config,
    ) -> Result<()> {
        self.rate_limiter.take().await;

        let out = (self.get_writer)(&task.id)
            .map_err(|err| ProvisionError::Unknown(format!("get writer: {err}")))?;

        match task.run(cancel.clone(), config.clone(), out).await {
            Ok(()) => {
                info!(task = %task.id, "pre-provision finished");
                config.emit_kube_state(KubeState::Provisioning);
                task.config.emit_config();
                Ok(())
            }
            Err(err) => {
                config.emit_kube_state(KubeState::Failed);
                Err(err.into())
            }
        }
    }

    /// Launch every worker task. Worker failures are logged, never fatal.
    async fn provision_workers(
        &self,
        cancel: &CancelSignal,
        profile: &Profile,
        config: &mut Config,
        tasks: Vec<Task>,
    ) {
        config.is_master = false;

        // Workers talk to etcd on the first master over the private network.
        let Some(master) = config.get_master() else {
            warn!(cluster = %config.cluster_id, "no master available, skipping workers");
            return;
        };
        config.flannel_config.etcd_host = master.private_ip.clone();

        for (index, task) in tasks.into_iter().enumerate() {
            self.rate_limiter.take().await;

            let out = match (self.get_writer)(&task.id) {
                Ok(out) => out,
                Err(err) => {
                    error!(task = %task.id, error = %err, "cannot open task writer");
                    return;
                }
            };

            if let Err(err) = fill_node_cloud_specific_data(
                profile.provider,
                &profile.nodes_profiles[index],
                config,
            ) {
                error!(task = %task.id, error = %err, "bind worker profile");
            }

            config.task_id = task.id.clone();
            let task_id = task.id.clone();
            let result = task.spawn_run(cancel.clone(), config.clone(), out);
            tokio::spawn(async move {
                match result.await {
                    Ok(Ok(())) => info!(task = %task_id, "worker task finished"),
                    Ok(Err(err)) => {
                        error!(task = %task_id, error = %err, "worker task failed")
                    }
                    Err(_) => error!(task = %task_id, "worker task dropped"),
                }
            });
        }
    }

    /// Run the post-provision check against the first master and publish the
    /// final cluster state.
    async fn wait_cluster(&self, cancel: &CancelSignal, mut task: Task, config: &Config) {
        let out = match (self.get_writer)(&task.id) {
            Ok(out) => out,
            Err(err) => {
                error!(task = %task.id, error = %err, "cannot open task writer");
                config.emit_kube_state(KubeState::Failed);
                return;
            }
        };

        let mut check_config = config.clone();
        match config.get_master() {
            Some(master) => check_config.node = master,
            None => {
                error!(cluster = %config.cluster_id, "no master found, cluster deployment failed");
                config.emit_kube_state(KubeState::Failed);
                return;
            }
        }

        match task.run(cancel.clone(), check_config, out).await {
            Ok(()) => config.emit_kube_state(KubeState::Operational),
            Err(err) => {
                error!(task = %task.id, error = %err, "cluster task failed");
                config.emit_kube_state(KubeState::Failed);
            }
        }
    }
}

impl std::fmt::Debug for TaskProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProvisioner")
            .field("registry", &self.registry)
            .field("key_bits", &self.key_bits)
            .finish_non_exhaustive()
    }
}
