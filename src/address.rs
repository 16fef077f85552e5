//! Routable addresses and the per-port address sets published to listeners.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;

use crate::id::{PodId, Port};

/// Label set on pods created by a `Deployment`'s `ReplicaSet`.
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// One routable endpoint of a service port.
#[derive(Clone, Debug, PartialEq)]
pub struct Address {
    /// The endpoint IP.
    pub ip: IpAddr,
    /// The resolved target port.
    pub port: Port,
    /// The pod backing this address, if any.
    pub pod: Option<Arc<Pod>>,
    /// Kind of the pod's owning workload, e.g. `deployment`.
    pub owner_kind: String,
    /// Name of the pod's owning workload.
    pub owner_name: String,
    /// Explicit mesh identity for addresses not backed by a pod.
    pub identity: Option<String>,
    /// Authority the client should use instead of the requested one.
    pub authority_override: Option<String>,
}

/// All current addresses for one service port, keyed by pod.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddressSet {
    /// Addresses keyed by the pod that serves them.
    pub addresses: HashMap<PodId, Address>,
    /// Metric labels shared by every address in the set.
    pub labels: BTreeMap<String, String>,
}

impl AddressSet {
    /// Creates an empty set carrying the given labels.
    #[must_use]
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self {
            addresses: HashMap::new(),
            labels,
        }
    }

    /// Returns the number of addresses in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Returns `true` if the set has no addresses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Returns `true` if the set holds an address for `id`.
    #[must_use]
    pub fn contains(&self, id: &PodId) -> bool {
        self.addresses.contains_key(id)
    }

    /// Inserts or replaces the address for `id`.
    pub fn insert(&mut self, id: PodId, address: Address) {
        self.addresses.insert(id, address);
    }

    fn with_same_labels(&self) -> Self {
        Self::new(self.labels.clone())
    }
}

/// Computes the addresses added and removed between two sets, keyed by pod.
///
/// An address whose pod is present in both sets is not reported, even when
/// its other fields changed.
#[must_use]
pub fn diff_pods(old: &AddressSet, new: &AddressSet) -> (AddressSet, AddressSet) {
    let mut add = new.with_same_labels();
    let mut remove = new.with_same_labels();

    for (id, address) in &new.addresses {
        if !old.contains(id) {
            add.insert(id.clone(), address.clone());
        }
    }

    for (id, address) in &old.addresses {
        if !new.contains(id) {
            remove.insert(id.clone(), address.clone());
        }
    }

    (add, remove)
}

/// Returns the kind and name of the workload owning `pod`.
///
/// A `ReplicaSet` named after the pod's template hash is reported as its
/// `Deployment`. A pod without owner references owns itself.
#[must_use]
pub fn owner_kind_and_name(pod: &Pod) -> (String, String) {
    let owner = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|owners| owners.first());

    let Some(owner) = owner else {
        return (
            "pod".to_string(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
    };

    if owner.kind == "ReplicaSet" {
        let hash = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(POD_TEMPLATE_HASH_LABEL));
        if let Some(deployment) = hash.and_then(|hash| {
            owner
                .name
                .strip_suffix(hash.as_str())
                .and_then(|name| name.strip_suffix('-'))
        }) {
            return ("deployment".to_string(), deployment.to_string());
        }
    }

    (owner.kind.to_lowercase(), owner.name.clone())
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    use super::*;

    fn address(ip: &str) -> Address {
        Address {
            ip: ip.parse().unwrap(),
            port: 8080,
            pod: None,
            owner_kind: "pod".to_string(),
            owner_name: ip.to_string(),
            identity: None,
            authority_override: None,
        }
    }

    fn set(pods: &[(&str, &str)]) -> AddressSet {
        let mut set = AddressSet::default();
        for (name, ip) in pods {
            set.insert(PodId::new("ns", *name), address(ip));
        }
        set
    }

    fn pod_owned_by(kind: &str, name: &str, hash: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("pod-1".to_string()),
                namespace: Some("ns".to_string()),
                labels: hash.map(|hash| {
                    BTreeMap::from([(POD_TEMPLATE_HASH_LABEL.to_string(), hash.to_string())])
                }),
                owner_references: Some(vec![OwnerReference {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn diff_reports_added_and_removed() {
        let old = set(&[("a", "10.0.0.1"), ("b", "10.0.0.2")]);
        let new = set(&[("b", "10.0.0.2"), ("c", "10.0.0.3")]);

        let (add, remove) = diff_pods(&old, &new);

        assert_eq!(add.len(), 1);
        assert!(add.contains(&PodId::new("ns", "c")));
        assert_eq!(remove.len(), 1);
        assert!(remove.contains(&PodId::new("ns", "a")));
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let s = set(&[("a", "10.0.0.1"), ("b", "10.0.0.2")]);
        let (add, remove) = diff_pods(&s, &s);
        assert!(add.is_empty());
        assert!(remove.is_empty());
    }

    #[test]
    fn diff_add_and_remove_are_disjoint() {
        let old = set(&[("a", "10.0.0.1"), ("b", "10.0.0.2"), ("c", "10.0.0.3")]);
        let new = set(&[("c", "10.0.0.3"), ("d", "10.0.0.4"), ("e", "10.0.0.5")]);

        let (add, remove) = diff_pods(&old, &new);

        for id in add.addresses.keys() {
            assert!(!remove.contains(id));
            assert!(new.contains(id) && !old.contains(id));
        }
        for id in remove.addresses.keys() {
            assert!(old.contains(id) && !new.contains(id));
        }
        assert_eq!(add.len(), 2);
        assert_eq!(remove.len(), 2);
    }

    #[test]
    fn diff_ignores_changed_address_with_same_pod() {
        let old = set(&[("a", "10.0.0.1")]);
        let new = set(&[("a", "10.0.0.9")]);
        let (add, remove) = diff_pods(&old, &new);
        assert!(add.is_empty());
        assert!(remove.is_empty());
    }

    #[test]
    fn diff_does_not_mutate_inputs() {
        let old = set(&[("a", "10.0.0.1")]);
        let new = set(&[("b", "10.0.0.2")]);
        let (old_copy, new_copy) = (old.clone(), new.clone());
        let _ = diff_pods(&old, &new);
        assert_eq!(old, old_copy);
        assert_eq!(new, new_copy);
    }

    #[test]
    fn owner_of_replicaset_pod() {
        let pod = pod_owned_by("ReplicaSet", "rs-1", None);
        assert_eq!(
            owner_kind_and_name(&pod),
            ("replicaset".to_string(), "rs-1".to_string())
        );
    }

    #[test]
    fn owner_of_deployment_pod() {
        let pod = pod_owned_by("ReplicaSet", "web-5d4f8c7b9", Some("5d4f8c7b9"));
        assert_eq!(
            owner_kind_and_name(&pod),
            ("deployment".to_string(), "web".to_string())
        );
    }

    #[test]
    fn owner_of_statefulset_pod() {
        let pod = pod_owned_by("StatefulSet", "db", None);
        assert_eq!(
            owner_kind_and_name(&pod),
            ("statefulset".to_string(), "db".to_string())
        );
    }

    #[test]
    fn pod_without_owner_owns_itself() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("standalone".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            owner_kind_and_name(&pod),
            ("pod".to_string(), "standalone".to_string())
        );
    }
}
