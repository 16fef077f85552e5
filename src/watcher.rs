//! The registry of service publishers.
//!
//! The [`EndpointsWatcher`] routes cluster events and subscriptions to one
//! publisher per service. Its own lock only guards the map of publishers;
//! publisher operations run after the lock is released, so a slow listener
//! never holds up unrelated services.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::RwLock;

use crate::cache::ClusterCache;
use crate::config::WatcherConfig;
use crate::error::Result;
use crate::id::{Port, ServiceId, parse_authority};
use crate::listener::SharedListener;
use crate::metrics::EndpointsMetrics;
use crate::publisher::ServicePublisher;

/// Watches services and endpoints and publishes address set changes per
/// service port to subscribed listeners.
///
/// Publishers are created on first reference and kept for the lifetime of
/// the watcher.
pub struct EndpointsWatcher {
    publishers: RwLock<HashMap<ServiceId, Arc<ServicePublisher>>>,
    cache: Arc<dyn ClusterCache>,
    config: WatcherConfig,
    metrics: EndpointsMetrics,
}

impl EndpointsWatcher {
    /// Creates a watcher resolving objects through `cache`.
    #[must_use]
    pub fn new(
        cache: Arc<dyn ClusterCache>,
        config: WatcherConfig,
        metrics: EndpointsMetrics,
    ) -> Self {
        Self {
            publishers: RwLock::new(HashMap::new()),
            cache,
            config,
            metrics,
        }
    }

    /// Subscribes `listener` to the service port named by `authority`.
    ///
    /// The listener receives the current state before this returns, and every
    /// later change until it is unsubscribed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`](crate::Error::InvalidReference) if
    /// `authority` does not name a service port. No subscription is made.
    pub fn subscribe(&self, authority: &str, listener: SharedListener) -> Result<()> {
        let (id, port) = parse_authority(authority)?;
        self.subscribe_service(id, port, listener);
        Ok(())
    }

    /// Removes `listener` from the service port named by `authority`.
    pub fn unsubscribe(&self, authority: &str, listener: &SharedListener) {
        match parse_authority(authority) {
            Ok((id, port)) => self.unsubscribe_service(&id, port, listener),
            Err(error) => tracing::error!(%error, "cannot unsubscribe"),
        }
    }

    /// Subscribes `listener` to port `port` of service `id`.
    pub fn subscribe_service(&self, id: ServiceId, port: Port, listener: SharedListener) {
        tracing::info!(ns = %id.namespace, svc = %id.name, port, "establishing watch on endpoint");
        self.get_or_new_publisher(id).subscribe(port, listener);
    }

    /// Removes `listener` from port `port` of service `id`.
    ///
    /// Unsubscribing a listener that is not subscribed is logged and ignored.
    pub fn unsubscribe_service(&self, id: &ServiceId, port: Port, listener: &SharedListener) {
        tracing::info!(ns = %id.namespace, svc = %id.name, port, "stopping watch on endpoint");

        let Some(publisher) = self.publisher(id) else {
            tracing::warn!(
                ns = %id.namespace,
                svc = %id.name,
                port,
                "cannot unsubscribe from unknown service"
            );
            return;
        };

        if !publisher.unsubscribe(port, listener) {
            tracing::warn!(ns = %id.namespace, svc = %id.name, port, "listener was not subscribed");
        }
    }

    /// Handles an added or updated `Service`.
    pub fn apply_service(&self, service: &Service) {
        if let Some(id) = self.service_id(&service.metadata) {
            self.get_or_new_publisher(id).update_service(service);
        }
    }

    /// Handles a deleted `Service`.
    pub fn delete_service(&self, service: &Service) {
        if let Some(id) = self.service_id(&service.metadata) {
            self.delete(&id);
        }
    }

    /// Handles added or updated `Endpoints`.
    pub fn apply_endpoints(&self, endpoints: &Endpoints) {
        if let Some(id) = self.service_id(&endpoints.metadata) {
            self.get_or_new_publisher(id).update_endpoints(endpoints);
        }
    }

    /// Handles deleted `Endpoints`.
    pub fn delete_endpoints(&self, endpoints: &Endpoints) {
        if let Some(id) = self.service_id(&endpoints.metadata) {
            self.delete(&id);
        }
    }

    /// Handles a `Service` or its `Endpoints` going away when only its
    /// identifier is known, e.g. a deletion missed while a watch was down.
    pub fn delete(&self, id: &ServiceId) {
        if self.config.is_ignored(&id.namespace) {
            return;
        }
        if let Some(publisher) = self.publisher(id) {
            publisher.delete_endpoints();
        }
    }

    /// Returns the service an object belongs to, unless its namespace is ignored.
    fn service_id(&self, meta: &ObjectMeta) -> Option<ServiceId> {
        ServiceId::from_meta(meta).filter(|id| !self.config.is_ignored(&id.namespace))
    }

    fn get_or_new_publisher(&self, id: ServiceId) -> Arc<ServicePublisher> {
        if let Some(publisher) = self.publisher(&id) {
            return publisher;
        }

        // The service may not exist yet; a stub publisher lets listeners
        // register before it does.
        let mut publishers = self.publishers.write();
        publishers
            .entry(id)
            .or_insert_with_key(|id| {
                Arc::new(ServicePublisher::new(
                    id.clone(),
                    self.cache.clone(),
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    fn publisher(&self, id: &ServiceId) -> Option<Arc<ServicePublisher>> {
        self.publishers.read().get(id).cloned()
    }
}
