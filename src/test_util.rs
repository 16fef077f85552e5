//! Fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectReference, Pod, PodSpec,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use parking_lot::{Mutex, RwLock};

use crate::address::AddressSet;
use crate::cache::ClusterCache;
use crate::id::{PodId, ServiceId};
use crate::listener::EndpointUpdateListener;

/// Installs a log subscriber honoring `RUST_LOG`, once per test binary.
pub(crate) fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A call received by a [`Collector`], with addresses rendered as sorted `ip:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Add(Vec<String>),
    Remove(Vec<String>),
    NoEndpoints(bool),
}

/// A listener that records every call it receives.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    calls: Mutex<Vec<Call>>,
}

impl Collector {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn render(set: &AddressSet) -> Vec<String> {
        let mut addrs: Vec<String> = set
            .addresses
            .values()
            .map(|a| std::net::SocketAddr::new(a.ip, u16::try_from(a.port).unwrap()).to_string())
            .collect();
        addrs.sort();
        addrs
    }
}

impl EndpointUpdateListener for Collector {
    fn add(&self, set: &AddressSet) {
        self.calls.lock().push(Call::Add(Self::render(set)));
    }

    fn remove(&self, set: &AddressSet) {
        self.calls.lock().push(Call::Remove(Self::render(set)));
    }

    fn no_endpoints(&self, exists: bool) {
        self.calls.lock().push(Call::NoEndpoints(exists));
    }
}

/// An in-memory [`ClusterCache`].
#[derive(Debug, Default)]
pub(crate) struct FakeCache {
    services: RwLock<HashMap<ServiceId, Arc<Service>>>,
    endpoints: RwLock<HashMap<ServiceId, Arc<Endpoints>>>,
    pods: RwLock<HashMap<PodId, Arc<Pod>>>,
}

impl FakeCache {
    pub(crate) fn put_service(&self, service: Service) {
        let id = service_id(&service.metadata);
        self.services.write().insert(id, Arc::new(service));
    }

    pub(crate) fn put_endpoints(&self, endpoints: Endpoints) {
        let id = service_id(&endpoints.metadata);
        self.endpoints.write().insert(id, Arc::new(endpoints));
    }

    pub(crate) fn remove_endpoints(&self, id: &ServiceId) {
        self.endpoints.write().remove(id);
    }

    pub(crate) fn put_pod(&self, pod: Pod) {
        let id = PodId::new(
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.write().insert(id, Arc::new(pod));
    }
}

impl ClusterCache for FakeCache {
    fn service(&self, id: &ServiceId) -> Option<Arc<Service>> {
        self.services.read().get(id).cloned()
    }

    fn endpoints(&self, id: &ServiceId) -> Option<Arc<Endpoints>> {
        self.endpoints.read().get(id).cloned()
    }

    fn pod(&self, id: &PodId) -> Option<Arc<Pod>> {
        self.pods.read().get(id).cloned()
    }
}

fn service_id(meta: &ObjectMeta) -> ServiceId {
    ServiceId::new(
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

pub(crate) fn object_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Builds a `Service` from `(name, port, target_port)` port specs.
pub(crate) fn make_service(
    namespace: &str,
    name: &str,
    ports: &[(Option<&str>, i32, Option<IntOrString>)],
) -> Service {
    Service {
        metadata: object_meta(namespace, name),
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port, target_port)| ServicePort {
                        name: port_name.map(String::from),
                        port: *port,
                        target_port: target_port.clone(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds a single-subset `Endpoints` from `(ip, pod)` addresses and `(name, port)` ports.
pub(crate) fn make_endpoints(
    namespace: &str,
    name: &str,
    addresses: &[(&str, &str)],
    ports: &[(Option<&str>, i32)],
) -> Endpoints {
    Endpoints {
        metadata: object_meta(namespace, name),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(ip, pod)| EndpointAddress {
                        ip: (*ip).to_string(),
                        target_ref: Some(ObjectReference {
                            kind: Some("Pod".to_string()),
                            name: Some((*pod).to_string()),
                            namespace: Some(namespace.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| EndpointPort {
                        name: port_name.map(String::from),
                        port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }]),
    }
}

/// Builds a `Pod` owned by the `ReplicaSet` named `owner`.
pub(crate) fn make_pod(namespace: &str, name: &str, owner: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            owner_references: Some(vec![OwnerReference {
                kind: "ReplicaSet".to_string(),
                name: owner.to_string(),
                ..Default::default()
            }]),
            ..object_meta(namespace, name)
        },
        ..Default::default()
    }
}

/// Builds a meshed `Pod` with the given control plane, identity mode and service account.
pub(crate) fn make_meshed_pod(
    namespace: &str,
    name: &str,
    controller_ns: &str,
    identity_mode: Option<&str>,
    service_account: &str,
) -> Pod {
    let mut pod = make_pod(namespace, name, "rs-1");
    pod.metadata.labels = Some(BTreeMap::from([(
        crate::translator::CONTROLLER_NS_LABEL.to_string(),
        controller_ns.to_string(),
    )]));
    pod.metadata.annotations = identity_mode.map(|mode| {
        BTreeMap::from([(
            crate::translator::IDENTITY_MODE_ANNOTATION.to_string(),
            mode.to_string(),
        )])
    });
    pod.spec = Some(PodSpec {
        service_account_name: Some(service_account.to_string()),
        ..Default::default()
    });
    pod
}
