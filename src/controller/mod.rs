mod topology;

pub use self::topology::{RemoteCluster, RouteAgentPod, Topology};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crd::Endpoint;
use crate::error::{Result, RouteAgentError};
use crate::informer::InformerEvent;
use crate::watch::WatchConfiguration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Controller: Send + Sync {
    /// Runs until `shutdown` is cancelled or the controller can no longer
    /// make progress.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

struct EventStreams {
    endpoints: broadcast::Receiver<InformerEvent<Endpoint>>,
    pods: broadcast::Receiver<InformerEvent<Pod>>,
}

pub struct RouteController {
    cluster_id: String,
    cluster_cidr: Vec<String>,
    service_cidr: Vec<String>,
    namespace: String,
    default_interface: String,
    watches: WatchConfiguration,
    events: Mutex<EventStreams>,
    topology: RwLock<Topology>,
}

impl RouteController {
    /// Subscribes to both informers immediately so that nothing delivered
    /// after construction is missed.
    pub fn new(
        cluster_id: &str,
        cluster_cidr: Vec<String>,
        service_cidr: Vec<String>,
        namespace: &str,
        default_interface: &str,
        watches: WatchConfiguration,
    ) -> Self {
        let events = EventStreams {
            endpoints: watches.endpoint_informer.subscribe(),
            pods: watches.pod_informer.subscribe(),
        };

        Self {
            cluster_id: cluster_id.to_string(),
            cluster_cidr,
            service_cidr,
            namespace: namespace.to_string(),
            default_interface: default_interface.to_string(),
            watches,
            events: Mutex::new(events),
            topology: RwLock::new(Topology::new(cluster_id)),
        }
    }

    pub fn default_interface(&self) -> &str {
        &self.default_interface
    }

    pub async fn topology(&self) -> Topology {
        self.topology.read().await.clone()
    }

    async fn rebuild(&self) {
        let mut topology = self.topology.write().await;
        topology.clear();
        for endpoint in self.watches.endpoint_informer.store().state() {
            topology.apply_endpoint(&endpoint);
        }
        for pod in self.watches.pod_informer.store().state() {
            topology.apply_pod(&pod);
        }
        info!(
            "Rebuilt view from caches: {} remote clusters, {} route agents",
            topology.remote_clusters().len(),
            topology.agent_count()
        );
        debug!(
            "Remote subnets {:?}, route agent IPs {:?}",
            topology.remote_subnets(),
            topology.agent_ips()
        );
    }

    async fn handle_endpoint(
        &self,
        event: std::result::Result<InformerEvent<Endpoint>, RecvError>,
    ) -> Result<()> {
        let mut topology = self.topology.write().await;
        match event {
            Ok(InformerEvent::Applied(endpoint)) | Ok(InformerEvent::Resynced(endpoint)) => {
                if topology.apply_endpoint(&endpoint) {
                    info!(
                        "Remote cluster {} reachable via endpoint {} with subnets {:?}",
                        endpoint.spec.cluster_id,
                        endpoint.name_any(),
                        endpoint.spec.subnets
                    );
                }
            }
            Ok(InformerEvent::Deleted(endpoint)) => {
                if topology.remove_endpoint(&endpoint) {
                    info!(
                        "Remote cluster {} removed with endpoint {}",
                        endpoint.spec.cluster_id,
                        endpoint.name_any()
                    );
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Endpoint events lagged by {}, rebuilding", missed);
                drop(topology);
                self.rebuild().await;
            }
            Err(RecvError::Closed) => {
                return Err(RouteAgentError::ControllerFailure(
                    "endpoint event stream closed".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn handle_pod(
        &self,
        event: std::result::Result<InformerEvent<Pod>, RecvError>,
    ) -> Result<()> {
        let mut topology = self.topology.write().await;
        match event {
            Ok(InformerEvent::Applied(pod)) | Ok(InformerEvent::Resynced(pod)) => {
                if topology.apply_pod(&pod) {
                    debug!("Route agent pod {} updated", pod.name_any());
                }
            }
            Ok(InformerEvent::Deleted(pod)) => {
                if topology.remove_pod(&pod) {
                    debug!("Route agent pod {} removed", pod.name_any());
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Pod events lagged by {}, rebuilding", missed);
                drop(topology);
                self.rebuild().await;
            }
            Err(RecvError::Closed) => {
                return Err(RouteAgentError::ControllerFailure(
                    "pod event stream closed".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for RouteController {
    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut events = self.events.try_lock().map_err(|_| {
            RouteAgentError::ControllerFailure("route controller is already running".to_string())
        })?;

        info!(
            "Starting route controller for cluster {} in namespace {} via {} \
             (cluster CIDRs {:?}, service CIDRs {:?})",
            self.cluster_id,
            self.namespace,
            self.default_interface,
            self.cluster_cidr,
            self.service_cidr
        );
        self.rebuild().await;

        let EventStreams { endpoints, pods } = &mut *events;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Route controller shutting down");
                    return Ok(());
                }
                event = endpoints.recv() => self.handle_endpoint(event).await?,
                event = pods.recv() => self.handle_pod(event).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiClients;
    use crate::testing;
    use crate::watch;
    use kube::runtime::watcher;
    use std::time::Duration;
    use wiremock::MockServer;

    async fn controller(server: &MockServer) -> RouteController {
        let clients = ApiClients {
            routing: testing::client(server),
            core: testing::client(server),
        };
        let (_factories, watches) = watch::compose(&clients, "submariner", Duration::ZERO);
        RouteController::new(
            "east",
            vec!["10.0.0.0/16".to_string()],
            vec!["10.96.0.0/12".to_string()],
            "submariner",
            "eth0",
            watches,
        )
    }

    async fn eventually<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn test_run_tracks_events_until_cancelled() {
        let server = MockServer::start().await;
        let controller = std::sync::Arc::new(controller(&server).await);
        let shutdown = CancellationToken::new();

        let task = {
            let controller = controller.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { controller.run(shutdown).await })
        };

        controller
            .watches
            .endpoint_informer
            .dispatch(watcher::Event::Applied(testing::endpoint(
                "west",
                "west-gw",
                &["10.1.0.0/16"],
            )));
        controller
            .watches
            .pod_informer
            .dispatch(watcher::Event::Applied(testing::route_agent_pod(
                "node-1", "10.0.1.5",
            )));

        let observed = &controller;
        eventually(move || async move {
            let topology = observed.topology().await;
            topology.remote_subnets() == vec!["10.1.0.0/16"] && topology.agent_count() == 1
        })
        .await;

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("controller ignored cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_relist_removes_vanished_remote_cluster() {
        let server = MockServer::start().await;
        let controller = std::sync::Arc::new(controller(&server).await);
        let shutdown = CancellationToken::new();

        let task = {
            let controller = controller.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { controller.run(shutdown).await })
        };

        let endpoints = &controller.watches.endpoint_informer;
        endpoints.dispatch(watcher::Event::Restarted(vec![
            testing::endpoint("west", "west-gw", &["10.1.0.0/16"]),
            testing::endpoint("north", "north-gw", &["10.2.0.0/16"]),
        ]));
        let observed = &controller;
        eventually(move || async move { observed.topology().await.remote_clusters().len() == 2 })
            .await;

        endpoints.dispatch(watcher::Event::Restarted(vec![testing::endpoint(
            "west",
            "west-gw",
            &["10.1.0.0/16"],
        )]));
        eventually(move || async move {
            observed.topology().await.remote_subnets() == vec!["10.1.0.0/16"]
        })
        .await;

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_second_concurrent_run_fails() {
        let server = MockServer::start().await;
        let controller = std::sync::Arc::new(controller(&server).await);
        let shutdown = CancellationToken::new();

        let first = {
            let controller = controller.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { controller.run(shutdown).await })
        };
        let running = &controller;
        eventually(move || async move { running.events.try_lock().is_err() }).await;

        let err = controller.run(shutdown.clone()).await.unwrap_err();
        assert!(matches!(err, RouteAgentError::ControllerFailure(_)));

        shutdown.cancel();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_local_cluster_endpoint_ignored() {
        let server = MockServer::start().await;
        let controller = controller(&server).await;

        controller
            .handle_endpoint(Ok(InformerEvent::Applied(std::sync::Arc::new(
                testing::endpoint("east", "east-gw", &["10.0.0.0/16"]),
            ))))
            .await
            .unwrap();

        assert!(controller.topology().await.remote_clusters().is_empty());
        assert_eq!(controller.default_interface(), "eth0");
    }

    #[tokio::test]
    async fn test_closed_stream_is_controller_failure() {
        let server = MockServer::start().await;
        let controller = controller(&server).await;

        let err = controller
            .handle_pod(Err(RecvError::Closed))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteAgentError::ControllerFailure(_)));
    }
}
