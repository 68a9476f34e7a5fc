//! Cluster state reducer
//!
//! A single task owns every write to the persisted cluster record during
//! provisioning. It consumes the three event channels and applies each event
//! as fetch-modify-persist; readers always observe a linear history of
//! state transitions.

use crate::service::KubeService;
use crate::util::update_cloud_specific_data;
use capstan_model::{KubeState, Node};
use capstan_workflow::{CancelSignal, Config, EventStreams};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// How long the reducer keeps applying in-flight events after cancellation
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// The single writer of one cluster's persisted record
pub struct ClusterStateMonitor {
    kube_service: Arc<dyn KubeService>,
    cluster_id: String,
}

impl ClusterStateMonitor {
    pub fn new(kube_service: Arc<dyn KubeService>, cluster_id: impl Into<String>) -> Self {
        Self {
            kube_service,
            cluster_id: cluster_id.into(),
        }
    }

    /// Consume events until cancellation or until every sender is gone.
    /// Per-event errors are logged and the event dropped; the reducer itself
    /// never fails.
    pub async fn run(mut self, cancel: CancelSignal, mut streams: EventStreams) {
        info!(cluster = %self.cluster_id, "state reducer started");

        loop {
            tokio::select! {
                maybe = streams.nodes.recv() => match maybe {
                    Some(node) => self.apply_node(node).await,
                    None => break,
                },
                maybe = streams.kube_states.recv() => match maybe {
                    Some(state) => self.apply_state(state).await,
                    None => break,
                },
                maybe = streams.configs.recv() => match maybe {
                    Some(config) => self.apply_config(config).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    self.drain(&mut streams).await;
                    break;
                }
            }
        }

        info!(cluster = %self.cluster_id, "state reducer stopped");
    }

    /// Apply events still in flight after cancellation, then give up.
    async fn drain(&mut self, streams: &mut EventStreams) {
        let deadline = sleep(DRAIN_WINDOW);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                maybe = streams.nodes.recv() => match maybe {
                    Some(node) => self.apply_node(node).await,
                    None => return,
                },
                maybe = streams.kube_states.recv() => match maybe {
                    Some(state) => self.apply_state(state).await,
                    None => return,
                },
                maybe = streams.configs.recv() => match maybe {
                    Some(config) => self.apply_config(config).await,
                    None => return,
                },
                _ = &mut deadline => return,
            }
        }
    }

    async fn apply_node(&mut self, node: Node) {
        debug!(cluster = %self.cluster_id, node = %node.name, state = ?node.state, "node event");

        let mut kube = match self.kube_service.get(&self.cluster_id).await {
            Ok(kube) => kube,
            Err(err) => {
                error!(cluster = %self.cluster_id, error = %err, "node event dropped");
                return;
            }
        };

        kube.put_node(node);

        if let Err(err) = self.kube_service.create(&kube).await {
            error!(cluster = %self.cluster_id, error = %err, "node event not persisted");
        }
    }

    async fn apply_state(&mut self, state: KubeState) {
        debug!(cluster = %self.cluster_id, state = ?state, "state event");

        let mut kube = match self.kube_service.get(&self.cluster_id).await {
            Ok(kube) => kube,
            Err(err) => {
                error!(cluster = %self.cluster_id, error = %err, "state event dropped");
                return;
            }
        };

        kube.state = state;

        if let Err(err) = self.kube_service.create(&kube).await {
            error!(cluster = %self.cluster_id, error = %err, "state event not persisted");
        }
    }

    async fn apply_config(&mut self, config: Config) {
        debug!(cluster = %self.cluster_id, "config event");

        let mut kube = match self.kube_service.get(&self.cluster_id).await {
            Ok(kube) => kube,
            Err(err) => {
                error!(cluster = %self.cluster_id, error = %err, "config event dropped");
                return;
            }
        };

        update_cloud_specific_data(&mut kube, &config);

        if let Err(err) = self.kube_service.create(&kube).await {
            error!(cluster = %self.cluster_id, error = %err, "config event not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryKubeService;
    use capstan_model::{Kube, NodeRole, NodeState, Provider};
    use capstan_workflow::{cancel_pair, CancelSignal};
    use tokio::time::timeout;

    const CLUSTER: &str = "abcd1234";

    async fn seeded_service() -> Arc<MemoryKubeService> {
        let service = Arc::new(MemoryKubeService::new());
        service
            .create(&Kube {
                id: CLUSTER.into(),
                name: "prod".into(),
                state: KubeState::Provisioning,
                provider: Provider::DigitalOcean,
                ..Default::default()
            })
            .await
            .unwrap();
        service
    }

    fn active_node(name: &str, role: NodeRole) -> Node {
        let mut node = Node::planned("task", name, Provider::DigitalOcean, "fra1", role);
        node.state = NodeState::Active;
        node.private_ip = "10.0.0.4".into();
        node
    }

    #[tokio::test]
    async fn test_reducer_applies_all_event_kinds() {
        let service = seeded_service().await;
        let config = Config::new(Provider::DigitalOcean, "prod", "acc");
        let streams = config.take_event_streams().unwrap();

        let monitor = ClusterStateMonitor::new(service.clone(), CLUSTER);
        let reducer = tokio::spawn(monitor.run(CancelSignal::none(), streams));

        let mut snapshot = config.clone();
        snapshot.cluster_id = CLUSTER.into();
        snapshot.ssh_config.bootstrap_public_key = "ssh-rsa BOOT".into();

        config.emit_node(active_node("prod-master-1111", NodeRole::Master));
        config.emit_node(active_node("prod-node-2222", NodeRole::Worker));
        snapshot.emit_config();
        config.emit_kube_state(KubeState::Operational);

        // Dropping every sender lets the reducer quiesce.
        drop(config);
        drop(snapshot);
        timeout(Duration::from_secs(2), reducer).await.unwrap().unwrap();

        let kube = service.get(CLUSTER).await.unwrap();
        assert_eq!(kube.state, KubeState::Operational);
        assert_eq!(kube.masters.len(), 1);
        assert_eq!(kube.nodes.len(), 1);
        assert_eq!(kube.masters["prod-master-1111"].state, NodeState::Active);
        assert_eq!(kube.bootstrap_public_key, "ssh-rsa BOOT");
    }

    #[tokio::test]
    async fn test_reducer_exits_on_cancellation() {
        let service = seeded_service().await;
        let config = Config::new(Provider::DigitalOcean, "prod", "acc");
        let streams = config.take_event_streams().unwrap();

        let (handle, signal) = cancel_pair();
        let monitor = ClusterStateMonitor::new(service.clone(), CLUSTER);
        let reducer = tokio::spawn(monitor.run(signal, streams));

        // The final state lands even when it races cancellation.
        config.emit_kube_state(KubeState::Failed);
        handle.cancel();

        timeout(Duration::from_secs(2), reducer).await.unwrap().unwrap();
        assert_eq!(service.get(CLUSTER).await.unwrap().state, KubeState::Failed);
    }

    #[tokio::test]
    async fn test_reducer_drops_events_for_unknown_cluster() {
        let service = Arc::new(MemoryKubeService::new());
        let config = Config::new(Provider::DigitalOcean, "prod", "acc");
        let streams = config.take_event_streams().unwrap();

        let monitor = ClusterStateMonitor::new(service.clone(), "missing1");
        let reducer = tokio::spawn(monitor.run(CancelSignal::none(), streams));

        // Unknown cluster: the event is logged and dropped, the reducer lives.
        config.emit_node(active_node("n", NodeRole::Worker));
        config.emit_kube_state(KubeState::Failed);

        drop(config);
        timeout(Duration::from_secs(2), reducer).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reducer_is_sole_writer_round_trip() {
        // A state written by the reducer survives unrelated node events:
        // reads after quiescence return exactly the last persisted value.
        let service = seeded_service().await;
        let config = Config::new(Provider::DigitalOcean, "prod", "acc");
        let streams = config.take_event_streams().unwrap();

        let monitor = ClusterStateMonitor::new(service.clone(), CLUSTER);
        let reducer = tokio::spawn(monitor.run(CancelSignal::none(), streams));

        for i in 0..20 {
            config.emit_node(active_node(&format!("prod-node-{i}"), NodeRole::Worker));
        }
        config.emit_kube_state(KubeState::Operational);

        drop(config);
        timeout(Duration::from_secs(2), reducer).await.unwrap().unwrap();

        let kube = service.get(CLUSTER).await.unwrap();
        assert_eq!(kube.state, KubeState::Operational);
        assert_eq!(kube.nodes.len(), 20);
    }
}
