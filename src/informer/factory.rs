use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::{reflector, watcher};
use kube::{Api, Client, Resource};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{run_informer, CacheState, Informer, Watched};
use crate::error::{Result, RouteAgentError};

/// Selectors attached to every list and watch request a factory sends, so
/// filtering happens on the API server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListTweak {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListTweak {
    pub fn labels(selector: &str) -> Self {
        Self {
            label_selector: Some(selector.to_string()),
            field_selector: None,
        }
    }

    pub fn apply(&self, config: watcher::Config) -> watcher::Config {
        let mut config = config;
        if let Some(labels) = &self.label_selector {
            config = config.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            config = config.fields(fields);
        }
        config
    }
}

type InformerTask = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

struct PendingInformer {
    kind: String,
    run: InformerTask,
    synced: watch::Receiver<CacheState>,
}

pub struct SharedInformerFactory {
    name: String,
    client: Client,
    resync: Duration,
    namespace: Option<String>,
    tweak: ListTweak,
    informers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    pending: Vec<PendingInformer>,
    started: Vec<(String, watch::Receiver<CacheState>)>,
}

impl SharedInformerFactory {
    pub fn new(name: &str, client: Client, resync: Duration) -> Self {
        Self {
            name: name.to_string(),
            client,
            resync,
            namespace: None,
            tweak: ListTweak::default(),
            informers: HashMap::new(),
            pending: Vec::new(),
            started: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_tweak(mut self, tweak: ListTweak) -> Self {
        self.tweak = tweak;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tweak(&self) -> &ListTweak {
        &self.tweak
    }

    pub fn watcher_config(&self) -> watcher::Config {
        self.tweak.apply(watcher::Config::default())
    }

    /// Returns the shared informer for `K`, registering it on first use.
    /// Registered informers only begin watching once `start` is called.
    pub fn informer<K>(&mut self) -> Informer<K>
    where
        K: Watched + Resource<Scope = NamespaceResourceScope>,
    {
        let type_id = TypeId::of::<K>();
        if let Some(existing) = self
            .informers
            .get(&type_id)
            .and_then(|handle| handle.downcast_ref::<Informer<K>>())
        {
            return existing.clone();
        }

        let (store, writer) = reflector::store::<K>();
        let informer = Informer::new(store);

        let api: Api<K> = match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let config = self.watcher_config();
        let resync = self.resync;
        let handle = informer.clone();

        debug!(
            "Registered {} informer in {} factory",
            Informer::<K>::kind(),
            self.name
        );
        self.pending.push(PendingInformer {
            kind: Informer::<K>::kind(),
            synced: informer.synced_receiver(),
            run: Box::new(move |shutdown| {
                Box::pin(run_informer(api, config, writer, handle, resync, shutdown))
            }),
        });
        self.informers.insert(type_id, Box::new(informer.clone()));

        informer
    }

    /// Spawns a watch task for every informer registered since the last call.
    pub fn start(&mut self, shutdown: &CancellationToken) {
        for pending in self.pending.drain(..) {
            info!(
                "Starting {} informer from {} factory (labels {:?}, fields {:?})",
                pending.kind, self.name, self.tweak.label_selector, self.tweak.field_selector
            );
            tokio::spawn((pending.run)(shutdown.clone()));
            self.started.push((pending.kind, pending.synced));
        }
    }

    pub fn started_count(&self) -> usize {
        self.started.len()
    }

    pub async fn wait_for_cache_sync(&self, shutdown: &CancellationToken) -> Result<()> {
        for (kind, synced) in &self.started {
            let mut synced = synced.clone();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Err(RouteAgentError::CacheSync(format!(
                        "shutdown requested before {} cache synced",
                        kind
                    )));
                }
                state = settled(&mut synced) => {
                    if state != Some(CacheState::Synced) {
                        return Err(RouteAgentError::CacheSync(format!(
                            "{} informer stopped before its cache synced",
                            kind
                        )));
                    }
                }
            }
        }
        debug!("All {} factory caches synced", self.name);
        Ok(())
    }
}

async fn settled(synced: &mut watch::Receiver<CacheState>) -> Option<CacheState> {
    let state = synced.wait_for(|state| *state != CacheState::Pending).await;
    state.map(|state| *state).ok()
}
