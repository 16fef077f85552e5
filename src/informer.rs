//! Kubernetes watches feeding the registry.
//!
//! [`Informers`] owns one reflector per resource kind. Pods only populate the
//! cache; `Service` and `Endpoints` events are also dispatched to an
//! [`EndpointsWatcher`] once the pod cache has synced, so that the first
//! address sets can resolve their pods.
//!
//! A re-list after a watch outage replays what exists, not what went away.
//! Objects known before the re-list that it does not return are treated as
//! deleted once it completes.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;
use futures::future::try_join3;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::serde::de::DeserializeOwned;
use kube::runtime::reflector::{self, Store, store::Writer};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};

use crate::cache::StoreCache;
use crate::error::{Error, Result};
use crate::id::ServiceId;
use crate::watcher::EndpointsWatcher;

/// Reflector stores for services, endpoints and pods, and the writers that fill them.
pub struct Informers {
    services: Store<Service>,
    services_writer: Writer<Service>,
    endpoints: Store<Endpoints>,
    endpoints_writer: Writer<Endpoints>,
    pods: Store<Pod>,
    pods_writer: Writer<Pod>,
}

impl Default for Informers {
    fn default() -> Self {
        Self::new()
    }
}

impl Informers {
    /// Creates empty stores.
    #[must_use]
    pub fn new() -> Self {
        let (services, services_writer) = reflector::store();
        let (endpoints, endpoints_writer) = reflector::store();
        let (pods, pods_writer) = reflector::store();
        Self {
            services,
            services_writer,
            endpoints,
            endpoints_writer,
            pods,
            pods_writer,
        }
    }

    /// Returns a [`ClusterCache`](crate::ClusterCache) reading from these stores.
    #[must_use]
    pub fn cache(&self) -> StoreCache {
        StoreCache::new(
            self.services.clone(),
            self.endpoints.clone(),
            self.pods.clone(),
        )
    }

    /// Watches the cluster using the default client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no client can be configured, or as [`Informers::run_with_client`].
    pub async fn run(self, watcher: Arc<EndpointsWatcher>) -> Result<()> {
        let client = Client::try_default().await?;
        self.run_with_client(client, watcher).await
    }

    /// Watches services, endpoints and pods in all namespaces until the
    /// watches end, dispatching changes to `watcher`.
    ///
    /// Watch errors are logged and retried with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheNotReady`](crate::Error::CacheNotReady) if the
    /// pod cache is dropped before it syncs.
    pub async fn run_with_client(
        self,
        client: Client,
        watcher: Arc<EndpointsWatcher>,
    ) -> Result<()> {
        let Self {
            services_writer,
            endpoints_writer,
            pods,
            pods_writer,
            ..
        } = self;

        let pod_events = async {
            drive("pods", Api::<Pod>::all(client.clone()), pods_writer, |_| {}).await;
            Ok::<_, Error>(())
        };

        let service_events = async {
            pods.wait_until_ready().await?;
            tracing::info!("pod cache synced, dispatching service events");
            let mut relist = Relist::default();
            drive(
                "services",
                Api::<Service>::all(client.clone()),
                services_writer,
                |event| dispatch_service(&watcher, &mut relist, &event),
            )
            .await;
            Ok::<_, Error>(())
        };

        let endpoint_events = async {
            pods.wait_until_ready().await?;
            tracing::info!("pod cache synced, dispatching endpoints events");
            let mut relist = Relist::default();
            drive(
                "endpoints",
                Api::<Endpoints>::all(client.clone()),
                endpoints_writer,
                |event| dispatch_endpoints(&watcher, &mut relist, &event),
            )
            .await;
            Ok::<_, Error>(())
        };

        try_join3(pod_events, service_events, endpoint_events).await?;
        Ok(())
    }
}

/// Reflects every object of `api` into `writer`, passing each event to `dispatch`.
async fn drive<K>(
    kind: &'static str,
    api: Api<K>,
    writer: Writer<K>,
    mut dispatch: impl FnMut(Event<K>),
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    let stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer);
    tokio::pin!(stream);

    tracing::debug!(kind, "starting watch");
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => dispatch(event),
            Err(error) => tracing::warn!(kind, %error, "watch failed, retrying"),
        }
    }
    tracing::warn!(kind, "watch ended");
}

/// Objects a watch has reported, and those seen so far by a re-list in progress.
#[derive(Debug, Default)]
struct Relist {
    known: HashSet<ServiceId>,
    seen: Option<HashSet<ServiceId>>,
}

impl Relist {
    fn start(&mut self) {
        self.seen = Some(HashSet::new());
    }

    fn applied(&mut self, meta: &ObjectMeta) {
        let Some(id) = ServiceId::from_meta(meta) else {
            return;
        };
        if let Some(seen) = &mut self.seen {
            seen.insert(id.clone());
        }
        self.known.insert(id);
    }

    fn deleted(&mut self, meta: &ObjectMeta) {
        let Some(id) = ServiceId::from_meta(meta) else {
            return;
        };
        self.known.remove(&id);
        if let Some(seen) = &mut self.seen {
            seen.remove(&id);
        }
    }

    /// Ends the re-list, returning the known objects it did not return.
    fn finish(&mut self) -> Vec<ServiceId> {
        let Some(seen) = self.seen.take() else {
            return Vec::new();
        };
        let mut gone: Vec<ServiceId> = self.known.difference(&seen).cloned().collect();
        gone.sort_unstable();
        self.known = seen;
        gone
    }
}

fn dispatch_service(watcher: &EndpointsWatcher, relist: &mut Relist, event: &Event<Service>) {
    match event {
        Event::Apply(service) | Event::InitApply(service) => {
            relist.applied(&service.metadata);
            watcher.apply_service(service);
        }
        Event::Delete(service) => {
            relist.deleted(&service.metadata);
            watcher.delete_service(service);
        }
        Event::Init => {
            tracing::debug!("starting service resync");
            relist.start();
        }
        Event::InitDone => {
            for id in relist.finish() {
                tracing::info!(service = %id, "service gone after resync");
                watcher.delete(&id);
            }
            tracing::debug!("service resync complete");
        }
    }
}

fn dispatch_endpoints(watcher: &EndpointsWatcher, relist: &mut Relist, event: &Event<Endpoints>) {
    match event {
        Event::Apply(endpoints) | Event::InitApply(endpoints) => {
            relist.applied(&endpoints.metadata);
            watcher.apply_endpoints(endpoints);
        }
        Event::Delete(endpoints) => {
            relist.deleted(&endpoints.metadata);
            watcher.delete_endpoints(endpoints);
        }
        Event::Init => {
            tracing::debug!("starting endpoints resync");
            relist.start();
        }
        Event::InitDone => {
            for id in relist.finish() {
                tracing::info!(service = %id, "endpoints gone after resync");
                watcher.delete(&id);
            }
            tracing::debug!("endpoints resync complete");
        }
    }
}
