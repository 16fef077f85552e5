//! Translation of address set changes into destination updates.
//!
//! An [`EndpointTranslator`] is the listener bound to one destination stream.
//! It enriches every address with metric labels, a mesh identity when the
//! peer can participate in identity, and a protocol hint when the peer is
//! meshed. Writes are fire-and-forget: a failed write is logged and the
//! translator stays subscribed.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc;

use crate::address::{Address, AddressSet, POD_TEMPLATE_HASH_LABEL};
use crate::api::{
    AddrSet, AuthorityOverride, DEFAULT_WEIGHT, NoEndpoints, ProtocolHint, TcpAddress,
    TlsIdentity, Update, WeightedAddr, WeightedAddrSet,
};
use crate::config::DestinationConfig;
use crate::error::{Error, Result};
use crate::listener::EndpointUpdateListener;

/// Label identifying the namespace of the control plane a pod is meshed with.
pub const CONTROLLER_NS_LABEL: &str = "linkerd.io/control-plane-ns";

/// Annotation controlling how a pod participates in identity.
pub const IDENTITY_MODE_ANNOTATION: &str = "linkerd.io/identity-mode";

/// Identity mode using the control plane's default identity scheme.
pub const IDENTITY_MODE_DEFAULT: &str = "default";

/// The outbound half of a destination stream.
pub trait UpdateSink: Send + Sync {
    /// Writes `update` to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamFull`] if the stream cannot take the update
    /// now, or [`Error::StreamClosed`] if the stream is gone.
    fn send(&self, update: Update) -> Result<()>;
}

impl UpdateSink for mpsc::Sender<Result<Update, tonic::Status>> {
    fn send(&self, update: Update) -> Result<()> {
        self.try_send(Ok(update)).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => Error::StreamFull,
            mpsc::error::TrySendError::Closed(_) => Error::StreamClosed,
        })
    }
}

/// Translates address set changes into [`Update`]s written to a sink.
pub struct EndpointTranslator<S> {
    controller_namespace: String,
    identity_trust_domain: Option<String>,
    enable_h2_upgrade: bool,
    service: String,
    sink: S,
}

impl<S: UpdateSink> EndpointTranslator<S> {
    /// Creates a translator for `service` writing to `sink`.
    #[must_use]
    pub fn new(config: &DestinationConfig, service: impl Into<String>, sink: S) -> Self {
        Self {
            controller_namespace: config.controller_namespace.clone(),
            identity_trust_domain: config.identity_trust_domain.clone(),
            enable_h2_upgrade: config.enable_h2_upgrade,
            service: service.into(),
            sink,
        }
    }

    fn send(&self, update: Update) {
        tracing::debug!(service = %self.service, ?update, "sending destination update");
        if let Err(error) = self.sink.send(update) {
            tracing::error!(service = %self.service, %error, "failed to send address update");
        }
    }

    fn h2_hint(&self) -> Option<ProtocolHint> {
        self.enable_h2_upgrade.then_some(ProtocolHint::H2)
    }

    fn to_weighted_addr(&self, address: &Address, pod: &Pod) -> WeightedAddr {
        let controller_ns = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CONTROLLER_NS_LABEL))
            .map(String::as_str)
            .unwrap_or_default();
        let identity_mode = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(IDENTITY_MODE_ANNOTATION))
            .map(String::as_str);

        // Any control plane's proxies understand HTTP/2 upgrades.
        let protocol_hint = if controller_ns.is_empty() {
            None
        } else {
            self.h2_hint()
        };

        // Only peers of this control plane participate in identity with us.
        let tls_identity = self
            .identity_trust_domain
            .as_deref()
            .filter(|_| {
                controller_ns == self.controller_namespace
                    && identity_mode == Some(IDENTITY_MODE_DEFAULT)
            })
            .map(|trust_domain| {
                let (sa, ns) = service_account_and_ns(pod);
                TlsIdentity::DnsLikeIdentity(format!(
                    "{sa}.{ns}.serviceaccount.identity.{controller_ns}.{trust_domain}"
                ))
            });

        WeightedAddr {
            addr: to_addr(address),
            weight: DEFAULT_WEIGHT,
            metric_labels: pod_labels(&address.owner_kind, &address.owner_name, pod),
            tls_identity,
            protocol_hint,
            authority_override: None,
        }
    }

    fn to_external_addr(&self, address: &Address) -> WeightedAddr {
        let tls_identity = address.identity.clone().map(TlsIdentity::DnsLikeIdentity);
        // An identity means there is most likely a proxy on the other side.
        let protocol_hint = tls_identity.as_ref().and_then(|_| self.h2_hint());

        WeightedAddr {
            addr: to_addr(address),
            weight: DEFAULT_WEIGHT,
            metric_labels: BTreeMap::new(),
            tls_identity,
            protocol_hint,
            authority_override: address
                .authority_override
                .clone()
                .map(|authority_override| AuthorityOverride { authority_override }),
        }
    }
}

impl<S: UpdateSink> EndpointUpdateListener for EndpointTranslator<S> {
    fn add(&self, set: &AddressSet) {
        let mut addrs: Vec<WeightedAddr> = set
            .addresses
            .values()
            .map(|address| match &address.pod {
                Some(pod) => self.to_weighted_addr(address, pod),
                None => self.to_external_addr(address),
            })
            .collect();
        addrs.sort_by_key(|wa| wa.addr);

        self.send(Update::Add(WeightedAddrSet {
            addrs,
            metric_labels: set.labels.clone(),
        }));
    }

    fn remove(&self, set: &AddressSet) {
        let mut addrs: Vec<TcpAddress> = set.addresses.values().map(to_addr).collect();
        addrs.sort();

        self.send(Update::Remove(AddrSet { addrs }));
    }

    fn no_endpoints(&self, exists: bool) {
        self.send(Update::NoEndpoints(NoEndpoints { exists }));
    }
}

fn to_addr(address: &Address) -> TcpAddress {
    TcpAddress {
        ip: address.ip,
        port: address.port,
    }
}

/// Returns the pod's service account and namespace, each defaulting to `default`.
fn service_account_and_ns(pod: &Pod) -> (&str, &str) {
    let sa = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.service_account_name.as_deref())
        .filter(|sa| !sa.is_empty())
        .unwrap_or("default");
    let ns = pod
        .metadata
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or("default");
    (sa, ns)
}

/// Returns the metric label name used for an owner kind.
fn kind_to_label(kind: &str) -> String {
    if kind.eq_ignore_ascii_case("ReplicationController") {
        return "replication_controller".to_string();
    }
    kind.to_lowercase()
}

/// Returns the metric labels describing the workload behind a pod.
fn pod_labels(owner_kind: &str, owner_name: &str, pod: &Pod) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "pod".to_string(),
        pod.metadata.name.clone().unwrap_or_default(),
    );
    labels.insert(kind_to_label(owner_kind), owner_name.to_string());

    let (sa, _) = service_account_and_ns(pod);
    labels.insert("serviceaccount".to_string(), sa.to_string());

    let pod_labels = pod.metadata.labels.as_ref();
    if let Some(controller_ns) = pod_labels
        .and_then(|l| l.get(CONTROLLER_NS_LABEL))
        .filter(|ns| !ns.is_empty())
    {
        labels.insert("control_plane_ns".to_string(), controller_ns.clone());
    }
    if let Some(hash) = pod_labels
        .and_then(|l| l.get(POD_TEMPLATE_HASH_LABEL))
        .filter(|hash| !hash.is_empty())
    {
        labels.insert("pod_template_hash".to_string(), hash.clone());
    }

    labels
}
