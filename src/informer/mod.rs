//! Shared informers: a reflector-backed local cache per resource kind plus a
//! broadcast of the changes applied to it.

mod factory;

pub use self::factory::{ListTweak, SharedInformerFactory};

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

pub trait Watched:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> Watched for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

#[derive(Clone, Debug)]
pub enum InformerEvent<K> {
    Applied(Arc<K>),
    Deleted(Arc<K>),
    Resynced(Arc<K>),
}

impl<K> InformerEvent<K> {
    pub fn object(&self) -> &Arc<K> {
        match self {
            InformerEvent::Applied(obj)
            | InformerEvent::Deleted(obj)
            | InformerEvent::Resynced(obj) => obj,
        }
    }
}

/// Progress of an informer towards its first complete list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Pending,
    Synced,
    /// The watch task ended before the first list completed.
    Stopped,
}

pub struct Informer<K: Watched> {
    store: Store<K>,
    events: broadcast::Sender<InformerEvent<K>>,
    synced: Arc<watch::Sender<CacheState>>,
    // Last published state per object, used to turn a re-list into deletions.
    known: Arc<Mutex<HashMap<ObjectRef<K>, Arc<K>>>>,
}

impl<K: Watched> Informer<K> {
    pub(crate) fn new(store: Store<K>) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (synced, _) = watch::channel(CacheState::Pending);
        Self {
            store,
            events,
            synced: Arc::new(synced),
            known: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn kind() -> String {
        K::kind(&()).into_owned()
    }

    pub fn store(&self) -> &Store<K> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InformerEvent<K>> {
        self.events.subscribe()
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow() == CacheState::Synced
    }

    pub(crate) fn synced_receiver(&self) -> watch::Receiver<CacheState> {
        self.synced.subscribe()
    }

    /// Publishes the change carried by a watch event. A re-list also
    /// publishes `Deleted` for every object it no longer contains, so
    /// subscribers see removals that happened while the watch was down.
    pub(crate) fn dispatch(&self, event: watcher::Event<K>) {
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            watcher::Event::Applied(obj) => {
                let obj = Arc::new(obj);
                known.insert(ObjectRef::from_obj(&*obj), obj.clone());
                self.publish(InformerEvent::Applied(obj));
            }
            watcher::Event::Deleted(obj) => {
                known.remove(&ObjectRef::from_obj(&obj));
                self.publish(InformerEvent::Deleted(Arc::new(obj)));
            }
            watcher::Event::Restarted(objs) => {
                debug!("{} informer listed {} objects", Self::kind(), objs.len());
                let mut previous = std::mem::take(&mut *known);
                for obj in objs {
                    let obj = Arc::new(obj);
                    let key = ObjectRef::from_obj(&*obj);
                    previous.remove(&key);
                    known.insert(key, obj.clone());
                    self.publish(InformerEvent::Applied(obj));
                }
                for (key, obj) in previous {
                    debug!("{} {} disappeared during re-list", Self::kind(), key.name);
                    self.publish(InformerEvent::Deleted(obj));
                }
                let was = self.synced.send_replace(CacheState::Synced);
                if was != CacheState::Synced {
                    info!("{} informer cache synced", Self::kind());
                }
            }
        }
    }

    /// Records that the watch task ended. Only an informer that never synced
    /// changes state, which fails anyone still waiting for its cache.
    pub(crate) fn mark_stopped(&self) {
        self.synced.send_if_modified(|state| {
            if *state == CacheState::Pending {
                *state = CacheState::Stopped;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn resync(&self) {
        let cached = self.store.state();
        debug!("Resyncing {} cached {} objects", cached.len(), Self::kind());
        for obj in cached {
            self.publish(InformerEvent::Resynced(obj));
        }
    }

    fn publish(&self, event: InformerEvent<K>) {
        // An error only means nobody is subscribed yet.
        let _ = self.events.send(event);
    }
}

impl<K: Watched> Clone for Informer<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            events: self.events.clone(),
            synced: Arc::clone(&self.synced),
            known: Arc::clone(&self.known),
        }
    }
}

pub(crate) async fn run_informer<K: Watched>(
    api: Api<K>,
    config: watcher::Config,
    writer: reflector::store::Writer<K>,
    informer: Informer<K>,
    resync: Duration,
    shutdown: CancellationToken,
) {
    let kind = Informer::<K>::kind();
    let stream = reflector::reflector(writer, watcher::watcher(api, config)).default_backoff();
    let mut stream = std::pin::pin!(stream);
    let mut resync_timer = resync_timer(resync);

    info!(
        "Starting {} informer (resync {:?})",
        kind,
        resync_timer.as_ref().map(|_| resync)
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Stopping {} informer", kind);
                break;
            }
            event = stream.next() => match event {
                Some(Ok(event)) => informer.dispatch(event),
                Some(Err(e)) => warn!("{} watch failed, backing off: {}", kind, e),
                None => {
                    warn!("{} watch stream ended", kind);
                    break;
                }
            },
            _ = next_resync(&mut resync_timer) => informer.resync(),
        }
    }
    informer.mark_stopped();
}

fn resync_timer(resync: Duration) -> Option<Interval> {
    if resync.is_zero() {
        return None;
    }
    let mut timer = tokio::time::interval_at(Instant::now() + resync, resync);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(timer)
}

async fn next_resync(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
