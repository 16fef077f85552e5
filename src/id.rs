//! Identifiers for services, pods and ports, and parsing of destination authorities.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::{Error, Result};

/// A numeric service or pod port.
pub type Port = u32;

/// Port assumed when an authority carries none.
pub const DEFAULT_PORT: Port = 80;

/// Namespace and name of a Kubernetes `Service`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId {
    /// The service namespace.
    pub namespace: String,
    /// The service name.
    pub name: String,
}

impl ServiceId {
    /// Creates a service identifier.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the service a `Service` or `Endpoints` object belongs to.
    ///
    /// Objects without a namespace are taken to be in `default`.
    pub(crate) fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        let name = meta.name.as_deref()?;
        Some(Self::new(
            meta.namespace.as_deref().unwrap_or("default"),
            name,
        ))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Namespace and name of a Kubernetes `Pod`.
///
/// Addresses that are not backed by a pod use their IP as the name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodId {
    /// The pod namespace.
    pub namespace: String,
    /// The pod name.
    pub name: String,
}

impl PodId {
    /// Creates a pod identifier.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How a service port maps onto the port addresses are reached at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetPort {
    /// A numeric port number.
    Number(Port),
    /// A named port, resolved per `Endpoints` subset.
    Name(String),
}

/// Parses an authority of the form `name.namespace.svc[.cluster-domain][:port]`.
///
/// The port defaults to [`DEFAULT_PORT`] when absent.
///
/// # Errors
///
/// Returns [`Error::InvalidReference`] if the authority has more than one `:`,
/// a port that is not a valid `u16`, fewer than three host labels, or a third
/// label other than `svc`.
pub fn parse_authority(authority: &str) -> Result<(ServiceId, Port)> {
    let mut parts = authority.split(':');
    let host = parts.next().unwrap_or_default();
    let port = match parts.next() {
        None => DEFAULT_PORT,
        Some(port) => port
            .parse::<u16>()
            .map(Port::from)
            .map_err(|_| Error::invalid_reference(authority, "invalid port"))?,
    };

    if parts.next().is_some() {
        return Err(Error::invalid_reference(authority, "too many colons"));
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return Err(Error::invalid_reference(
            authority,
            "expected name.namespace.svc",
        ));
    }

    if labels[2] != "svc" {
        return Err(Error::invalid_reference(authority, "not a service name"));
    }

    if labels[0].is_empty() || labels[1].is_empty() {
        return Err(Error::invalid_reference(
            authority,
            "empty name or namespace",
        ));
    }

    Ok((ServiceId::new(labels[1], labels[0]), port))
}
