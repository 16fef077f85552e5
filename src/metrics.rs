//! Per service port metrics.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::id::{Port, ServiceId};

/// Metric families shared by every port publisher.
#[derive(Clone, Debug, Default)]
pub struct EndpointsMetrics {
    updates: Family<EndpointsLabels, Counter>,
    pods: Family<EndpointsLabels, Gauge>,
    exists: Family<EndpointsLabels, Gauge>,
    subscribers: Family<EndpointsLabels, Gauge>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EndpointsLabels {
    namespace: String,
    service: String,
    port: String,
}

/// Metrics of a single service port.
#[derive(Debug)]
pub(crate) struct PortMetrics {
    labels: EndpointsLabels,
    updates: Counter,
    pods: Gauge,
    exists: Gauge,
    subscribers: Gauge,
}

// === impl EndpointsMetrics ===

impl EndpointsMetrics {
    /// Registers the endpoint families under the `endpoints` prefix.
    #[must_use]
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();
        let reg = reg.sub_registry_with_prefix("endpoints");
        reg.register(
            "updates",
            "Number of endpoint updates received for a service port",
            metrics.updates.clone(),
        );
        reg.register(
            "pods",
            "Number of addresses currently known for a service port",
            metrics.pods.clone(),
        );
        reg.register(
            "exists",
            "Whether the service of a service port exists",
            metrics.exists.clone(),
        );
        reg.register(
            "subscribers",
            "Number of listeners subscribed to a service port",
            metrics.subscribers.clone(),
        );
        metrics
    }

    pub(crate) fn port_metrics(&self, id: &ServiceId, port: Port) -> PortMetrics {
        let labels = EndpointsLabels {
            namespace: id.namespace.clone(),
            service: id.name.clone(),
            port: port.to_string(),
        };
        PortMetrics {
            updates: self.updates.get_or_create(&labels).clone(),
            pods: self.pods.get_or_create(&labels).clone(),
            exists: self.exists.get_or_create(&labels).clone(),
            subscribers: self.subscribers.get_or_create(&labels).clone(),
            labels,
        }
    }

    /// Drops every series of a port that no longer has a publisher.
    pub(crate) fn unregister(&self, port: &PortMetrics) {
        self.updates.remove(&port.labels);
        self.pods.remove(&port.labels);
        self.exists.remove(&port.labels);
        self.subscribers.remove(&port.labels);
    }
}

// === impl PortMetrics ===

impl PortMetrics {
    pub(crate) fn inc_updates(&self) {
        self.updates.inc();
    }

    pub(crate) fn set_pods(&self, n: usize) {
        self.pods.set(i64::try_from(n).unwrap_or(i64::MAX));
    }

    pub(crate) fn set_exists(&self, exists: bool) {
        self.exists.set(i64::from(exists));
    }

    pub(crate) fn set_subscribers(&self, n: usize) {
        self.subscribers.set(i64::try_from(n).unwrap_or(i64::MAX));
    }
}
