//! Destination updates streamed to proxies.
//!
//! These mirror the messages of the destination API without committing to a
//! wire encoding.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Weight given to every address.
pub const DEFAULT_WEIGHT: u32 = 10_000;

/// One update on a destination stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    /// Addresses to add to the destination's endpoints.
    Add(WeightedAddrSet),
    /// Addresses to remove from the destination's endpoints.
    Remove(AddrSet),
    /// The destination has no endpoints.
    NoEndpoints(NoEndpoints),
}

/// Addresses added to a destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightedAddrSet {
    /// The added addresses.
    pub addrs: Vec<WeightedAddr>,
    /// Labels that apply to every address in the set.
    pub metric_labels: BTreeMap<String, String>,
}

/// Addresses removed from a destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddrSet {
    /// The removed addresses.
    pub addrs: Vec<TcpAddress>,
}

/// Signals that a destination has no endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoEndpoints {
    /// Whether the destination exists. When it does not, clients may fall
    /// back to another resolution mechanism.
    pub exists: bool,
}

/// One routable address along with how to reach it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightedAddr {
    /// The address.
    pub addr: TcpAddress,
    /// Load balancing weight.
    pub weight: u32,
    /// Labels describing the workload behind the address.
    pub metric_labels: BTreeMap<String, String>,
    /// Identity to expect when establishing mutual TLS, if any.
    pub tls_identity: Option<TlsIdentity>,
    /// Protocol the peer is known to support, if any.
    pub protocol_hint: Option<ProtocolHint>,
    /// Authority to use in place of the requested one, if any.
    pub authority_override: Option<AuthorityOverride>,
}

/// An IP and port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TcpAddress {
    /// The IP address.
    pub ip: IpAddr,
    /// The port.
    pub port: u32,
}

impl fmt::Display for TcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

impl TryFrom<TcpAddress> for SocketAddr {
    type Error = std::num::TryFromIntError;

    fn try_from(addr: TcpAddress) -> Result<Self, Self::Error> {
        Ok(SocketAddr::new(addr.ip, u16::try_from(addr.port)?))
    }
}

/// The identity a peer presents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsIdentity {
    /// A DNS-like name, e.g. `sa.ns.serviceaccount.identity.linkerd.cluster.local`.
    DnsLikeIdentity(String),
}

/// A protocol the peer is known to support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolHint {
    /// The peer accepts HTTP/2 and handles upgraded HTTP/1 traffic.
    H2,
}

/// Authority to use when talking to an address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityOverride {
    /// The authority, as `host:port`.
    pub authority_override: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_address_display() {
        let v4 = TcpAddress {
            ip: "172.17.0.12".parse().unwrap(),
            port: 8989,
        };
        let v6 = TcpAddress {
            ip: "2001:db8::1".parse().unwrap(),
            port: 8989,
        };
        assert_eq!(v4.to_string(), "172.17.0.12:8989");
        assert_eq!(v6.to_string(), "[2001:db8::1]:8989");
    }

    #[test]
    fn tcp_address_to_socket_addr() {
        let addr = TcpAddress {
            ip: "10.0.0.1".parse().unwrap(),
            port: 50051,
        };
        assert_eq!(
            SocketAddr::try_from(addr).unwrap(),
            "10.0.0.1:50051".parse::<SocketAddr>().unwrap()
        );

        let out_of_range = TcpAddress { port: 70_000, ..addr };
        assert!(SocketAddr::try_from(out_of_range).is_err());
    }
}
