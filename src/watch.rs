use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::ApiClients;
use crate::crd::Endpoint;
use crate::error::Result;
use crate::informer::{Informer, ListTweak, SharedInformerFactory};

pub const ROUTE_AGENT_SELECTOR: &str = "app=submariner-routeagent";

/// Everything the route controller reads from the cluster. Never mutated
/// after composition.
#[derive(Clone)]
pub struct WatchConfiguration {
    pub submariner_client: Client,
    pub client: Client,
    pub endpoint_informer: Informer<Endpoint>,
    pub pod_informer: Informer<Pod>,
}

pub struct WatchFactories {
    pub submariner: SharedInformerFactory,
    pub core: SharedInformerFactory,
}

impl WatchFactories {
    pub fn start(&mut self, shutdown: &CancellationToken) {
        self.submariner.start(shutdown);
        self.core.start(shutdown);
    }

    pub async fn wait_for_cache_sync(&self, shutdown: &CancellationToken) -> Result<()> {
        tokio::try_join!(
            self.submariner.wait_for_cache_sync(shutdown),
            self.core.wait_for_cache_sync(shutdown),
        )?;
        Ok(())
    }
}

pub fn compose(
    clients: &ApiClients,
    namespace: &str,
    resync: Duration,
) -> (WatchFactories, WatchConfiguration) {
    let mut submariner = SharedInformerFactory::new("submariner", clients.routing.clone(), resync)
        .with_namespace(namespace);
    let mut core = SharedInformerFactory::new("core", clients.core.clone(), resync)
        .with_namespace(namespace)
        .with_tweak(ListTweak::labels(ROUTE_AGENT_SELECTOR));

    let config = WatchConfiguration {
        submariner_client: clients.routing.clone(),
        client: clients.core.clone(),
        endpoint_informer: submariner.informer::<Endpoint>(),
        pod_informer: core.informer::<Pod>(),
    };

    info!(
        "Composed endpoint and pod informers for namespace {} (pod selector {})",
        namespace, ROUTE_AGENT_SELECTOR
    );

    (WatchFactories { submariner, core }, config)
}
