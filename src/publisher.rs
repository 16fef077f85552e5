//! Per service and per service port publishers.
//!
//! A [`ServicePublisher`] owns one [`PortPublisher`] per subscribed port. All
//! of a service's port state is guarded by the service publisher's lock;
//! port publishers are never locked on their own.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{EndpointSubset, Endpoints, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use parking_lot::Mutex;

use crate::address::{Address, AddressSet, diff_pods, owner_kind_and_name};
use crate::cache::ClusterCache;
use crate::id::{PodId, Port, ServiceId, TargetPort};
use crate::listener::{SharedListener, same_listener};
use crate::metrics::{EndpointsMetrics, PortMetrics};

/// Annotation carrying the identity of the gateway fronting mirrored endpoints.
pub const REMOTE_GATEWAY_IDENTITY_ANNOTATION: &str = "mirror.linkerd.io/remote-gateway-identity";

/// Annotation carrying the fully qualified name of a mirrored remote service.
pub const REMOTE_SERVICE_FQ_NAME_ANNOTATION: &str = "mirror.linkerd.io/remote-svc-fq-name";

/// Observable state of a port publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PortState {
    NoService,
    ExistsNoEndpoints,
    ExistsWithAddresses,
}

pub(crate) struct ServicePublisher {
    id: ServiceId,
    cache: Arc<dyn ClusterCache>,
    metrics: EndpointsMetrics,
    ports: Mutex<HashMap<Port, PortPublisher>>,
}

struct PortPublisher {
    id: ServiceId,
    port: Port,
    target_port: TargetPort,
    exists: bool,
    pods: AddressSet,
    listeners: Vec<SharedListener>,
    metrics: PortMetrics,
}

// === impl ServicePublisher ===

impl ServicePublisher {
    pub(crate) fn new(
        id: ServiceId,
        cache: Arc<dyn ClusterCache>,
        metrics: EndpointsMetrics,
    ) -> Self {
        Self {
            id,
            cache,
            metrics,
            ports: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn update_endpoints(&self, endpoints: &Endpoints) {
        let mut ports = self.ports.lock();
        tracing::debug!(ns = %self.id.namespace, svc = %self.id.name, "updating endpoints");

        for port in ports.values_mut() {
            port.update_endpoints(self.cache.as_ref(), endpoints);
        }
    }

    pub(crate) fn delete_endpoints(&self) {
        let mut ports = self.ports.lock();
        tracing::debug!(ns = %self.id.namespace, svc = %self.id.name, "deleting endpoints");

        for port in ports.values_mut() {
            port.no_endpoints(false);
        }
    }

    pub(crate) fn update_service(&self, service: &Service) {
        let mut ports = self.ports.lock();
        tracing::debug!(ns = %self.id.namespace, svc = %self.id.name, "updating service");

        for (src_port, port) in ports.iter_mut() {
            let target_port = get_target_port(Some(service), *src_port);
            if target_port != port.target_port {
                port.update_port(self.cache.as_ref(), target_port);
            }
        }
    }

    pub(crate) fn subscribe(&self, src_port: Port, listener: SharedListener) {
        let mut ports = self.ports.lock();
        ports
            .entry(src_port)
            .or_insert_with(|| self.new_port_publisher(src_port))
            .subscribe(listener);
    }

    /// Returns `false` if nothing was subscribed to `src_port`.
    pub(crate) fn unsubscribe(&self, src_port: Port, listener: &SharedListener) -> bool {
        let mut ports = self.ports.lock();
        let Some(port) = ports.get_mut(&src_port) else {
            return false;
        };

        let removed = port.unsubscribe(listener);
        if port.listeners.is_empty() {
            if let Some(port) = ports.remove(&src_port) {
                self.metrics.unregister(&port.metrics);
            }
        }
        removed
    }

    fn new_port_publisher(&self, src_port: Port) -> PortPublisher {
        let mut target_port = TargetPort::Number(src_port);
        let mut exists = false;

        match self.cache.service(&self.id) {
            // Clients resolve ExternalName services through DNS, so they are
            // reported as not existing.
            Some(service) if !is_external_name(&service) => {
                target_port = get_target_port(Some(&service), src_port);
                exists = true;
            }
            Some(_) => {
                tracing::debug!(
                    ns = %self.id.namespace,
                    svc = %self.id.name,
                    "service is ExternalName"
                );
            }
            None => {
                tracing::debug!(ns = %self.id.namespace, svc = %self.id.name, "service not found");
            }
        }

        let mut port = PortPublisher {
            id: self.id.clone(),
            port: src_port,
            target_port,
            exists,
            pods: AddressSet::new(self.set_labels()),
            listeners: Vec::new(),
            metrics: self.metrics.port_metrics(&self.id, src_port),
        };
        port.metrics.set_exists(exists);

        if let Some(endpoints) = self.cache.endpoints(&self.id) {
            port.update_endpoints(self.cache.as_ref(), &endpoints);
        }

        port
    }

    fn set_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("namespace".to_string(), self.id.namespace.clone()),
            ("service".to_string(), self.id.name.clone()),
        ])
    }

    #[cfg(test)]
    pub(crate) fn port_count(&self) -> usize {
        self.ports.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self, src_port: Port) -> usize {
        self.ports
            .lock()
            .get(&src_port)
            .map_or(0, |port| port.listeners.len())
    }

    #[cfg(test)]
    pub(crate) fn port_state(&self, src_port: Port) -> Option<PortState> {
        self.ports.lock().get(&src_port).map(PortPublisher::state)
    }
}

// === impl PortPublisher ===

impl PortPublisher {
    fn state(&self) -> PortState {
        match (self.exists, self.pods.is_empty()) {
            (false, _) => PortState::NoService,
            (true, true) => PortState::ExistsNoEndpoints,
            (true, false) => PortState::ExistsWithAddresses,
        }
    }

    fn update_endpoints(&mut self, cache: &dyn ClusterCache, endpoints: &Endpoints) {
        let new_pods = self.endpoints_to_addresses(cache, endpoints);
        if new_pods.is_empty() {
            for listener in &self.listeners {
                listener.no_endpoints(true);
            }
        } else {
            let (add, remove) = diff_pods(&self.pods, &new_pods);
            for listener in &self.listeners {
                if !add.is_empty() {
                    listener.add(&add);
                }
                if !remove.is_empty() {
                    listener.remove(&remove);
                }
            }
        }

        self.exists = true;
        self.pods = new_pods;

        self.metrics.inc_updates();
        self.metrics.set_pods(self.pods.len());
        self.metrics.set_exists(true);
    }

    fn endpoints_to_addresses(
        &self,
        cache: &dyn ClusterCache,
        endpoints: &Endpoints,
    ) -> AddressSet {
        let mut pods = AddressSet::new(self.pods.labels.clone());
        let annotations = endpoints.metadata.annotations.as_ref();
        let identity = annotations
            .and_then(|a| a.get(REMOTE_GATEWAY_IDENTITY_ANNOTATION))
            .cloned();
        let fq_name = annotations.and_then(|a| a.get(REMOTE_SERVICE_FQ_NAME_ANNOTATION));

        for subset in endpoints.subsets.iter().flatten() {
            let Some(resolved_port) = self.resolve_target_port(subset) else {
                tracing::warn!(
                    ns = %self.id.namespace,
                    svc = %self.id.name,
                    port = self.port,
                    target_port = ?self.target_port,
                    "unable to resolve target port, skipping subset"
                );
                continue;
            };

            for endpoint in subset.addresses.iter().flatten() {
                let Ok(ip) = endpoint.ip.parse::<IpAddr>() else {
                    tracing::warn!(ip = %endpoint.ip, "skipping endpoint with invalid IP");
                    continue;
                };

                let target = endpoint
                    .target_ref
                    .as_ref()
                    .filter(|target| target.kind.as_deref() == Some("Pod"));

                if let Some(target) = target {
                    let id = PodId::new(
                        target
                            .namespace
                            .as_deref()
                            .unwrap_or(self.id.namespace.as_str()),
                        target.name.as_deref().unwrap_or_default(),
                    );
                    let Some(pod) = cache.pod(&id) else {
                        tracing::error!(pod = %id, "unable to fetch pod");
                        continue;
                    };
                    let (owner_kind, owner_name) = owner_kind_and_name(&pod);
                    pods.insert(
                        id,
                        Address {
                            ip,
                            port: resolved_port,
                            pod: Some(pod),
                            owner_kind,
                            owner_name,
                            identity: None,
                            authority_override: None,
                        },
                    );
                } else {
                    let id = PodId::new(self.id.namespace.clone(), ip.to_string());
                    pods.insert(
                        id,
                        Address {
                            ip,
                            port: resolved_port,
                            pod: None,
                            owner_kind: String::new(),
                            owner_name: String::new(),
                            identity: identity.clone(),
                            authority_override: fq_name
                                .map(|name| format!("{name}:{resolved_port}")),
                        },
                    );
                }
            }
        }

        pods
    }

    fn resolve_target_port(&self, subset: &EndpointSubset) -> Option<Port> {
        match &self.target_port {
            TargetPort::Number(port) => Some(*port),
            TargetPort::Name(name) => subset
                .ports
                .iter()
                .flatten()
                .find(|p| p.name.as_deref().unwrap_or_default() == name)
                .and_then(|p| Port::try_from(p.port).ok()),
        }
    }

    fn update_port(&mut self, cache: &dyn ClusterCache, target_port: TargetPort) {
        self.target_port = target_port;
        if let Some(endpoints) = cache.endpoints(&self.id) {
            self.update_endpoints(cache, &endpoints);
        } else {
            tracing::error!(
                ns = %self.id.namespace,
                svc = %self.id.name,
                port = self.port,
                "unable to get endpoints during port update"
            );
        }
    }

    fn no_endpoints(&mut self, exists: bool) {
        self.exists = exists;
        self.pods = AddressSet::new(self.pods.labels.clone());
        for listener in &self.listeners {
            listener.no_endpoints(exists);
        }

        self.metrics.inc_updates();
        self.metrics.set_exists(exists);
        self.metrics.set_pods(0);
    }

    fn subscribe(&mut self, listener: SharedListener) {
        match self.state() {
            PortState::ExistsWithAddresses => listener.add(&self.pods),
            PortState::ExistsNoEndpoints => listener.no_endpoints(true),
            PortState::NoService => listener.no_endpoints(false),
        }
        self.listeners.push(listener);

        self.metrics.set_subscribers(self.listeners.len());
    }

    fn unsubscribe(&mut self, listener: &SharedListener) -> bool {
        let position = self
            .listeners
            .iter()
            .position(|l| same_listener(l, listener));
        if let Some(i) = position {
            self.listeners.swap_remove(i);
        }

        self.metrics.set_subscribers(self.listeners.len());
        position.is_some()
    }
}

/// Returns the rule mapping `port` onto the ports of `Endpoints` subsets.
///
/// When the service has a port spec for `port` with a target port, the
/// subset port carrying the service port's name is used, since `Endpoints`
/// name their ports after the service's. Otherwise `port` is used as-is.
pub(crate) fn get_target_port(service: Option<&Service>, port: Port) -> TargetPort {
    let specs = service
        .and_then(|service| service.spec.as_ref())
        .and_then(|spec| spec.ports.as_ref());

    for spec in specs.into_iter().flatten() {
        let has_target = spec
            .target_port
            .as_ref()
            .is_some_and(|target| *target != IntOrString::Int(0));
        if Port::try_from(spec.port).ok() == Some(port) && has_target {
            return TargetPort::Name(spec.name.clone().unwrap_or_default());
        }
    }

    TargetPort::Number(port)
}

fn is_external_name(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some("ExternalName")
}
