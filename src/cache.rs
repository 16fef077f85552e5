//! Lookup capability over locally cached cluster objects.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::runtime::reflector::{ObjectRef, Store};

use crate::id::{PodId, ServiceId};

/// Synchronous, eventually consistent lookups of cluster objects.
///
/// Publishers use this to seed new ports and to resolve the pods behind
/// `Endpoints` addresses.
pub trait ClusterCache: Send + Sync {
    /// Returns the `Service` named by `id`, if it is known.
    fn service(&self, id: &ServiceId) -> Option<Arc<Service>>;

    /// Returns the `Endpoints` named by `id`, if it is known.
    fn endpoints(&self, id: &ServiceId) -> Option<Arc<Endpoints>>;

    /// Returns the `Pod` named by `id`, if it is known.
    fn pod(&self, id: &PodId) -> Option<Arc<Pod>>;
}

/// A [`ClusterCache`] backed by kube reflector stores.
#[derive(Clone)]
pub struct StoreCache {
    services: Store<Service>,
    endpoints: Store<Endpoints>,
    pods: Store<Pod>,
}

impl StoreCache {
    /// Creates a cache reading from the given stores.
    #[must_use]
    pub fn new(services: Store<Service>, endpoints: Store<Endpoints>, pods: Store<Pod>) -> Self {
        Self {
            services,
            endpoints,
            pods,
        }
    }
}

impl ClusterCache for StoreCache {
    fn service(&self, id: &ServiceId) -> Option<Arc<Service>> {
        self.services
            .get(&ObjectRef::new(&id.name).within(&id.namespace))
    }

    fn endpoints(&self, id: &ServiceId) -> Option<Arc<Endpoints>> {
        self.endpoints
            .get(&ObjectRef::new(&id.name).within(&id.namespace))
    }

    fn pod(&self, id: &PodId) -> Option<Arc<Pod>> {
        self.pods.get(&ObjectRef::new(&id.name).within(&id.namespace))
    }
}
