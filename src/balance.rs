//! In-process discovery for [Tonic](https://docs.rs/tonic) balance channels.
//!
//! A [`BalanceListener`] is subscribed to a service port like any destination
//! stream, but feeds `Change`s into a balance channel instead of producing
//! [`Update`](crate::Update)s.
//!
//! # Example
//!
//! ```ignore
//! use std::net::SocketAddr;
//! use tonic::transport::{Channel, Endpoint};
//! use tonic_dst_k8s::{SharedListener, discover};
//!
//! const WEB: &str = "web.emojivoto.svc.cluster.local:8080";
//!
//! let (channel, tx) = Channel::balance_channel::<SocketAddr>(64);
//! let listener = discover(&watcher, WEB, tx, |addr| {
//!     Endpoint::from_shared(format!("http://{addr}")).expect("socket addresses form valid URIs")
//! })?;
//! let client = WebClient::new(channel);
//!
//! // Later: stop following the service. The channel keeps the endpoints it has.
//! let listener: SharedListener = listener;
//! watcher.unsubscribe(WEB, &listener);
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tonic::transport::Endpoint;
use tonic::transport::channel::Change;

use crate::address::AddressSet;
use crate::error::Result;
use crate::listener::EndpointUpdateListener;
use crate::watcher::EndpointsWatcher;

/// A listener that inserts and removes balance channel endpoints.
///
/// Sends never wait. Changes that do not fit in the channel are retried on
/// the next update this listener receives.
pub struct BalanceListener<F> {
    tx: Sender<Change<SocketAddr, Endpoint>>,
    build: F,
    endpoints: Mutex<Tracked>,
}

/// The addresses a listener should expose and those the channel has been told about.
#[derive(Debug, Default)]
struct Tracked {
    wanted: HashSet<SocketAddr>,
    sent: HashSet<SocketAddr>,
}

/// Subscribes a [`BalanceListener`] feeding `tx` to the service port named by `authority`.
///
/// Discovery runs until the returned listener is unsubscribed from `watcher`.
///
/// # Errors
///
/// Returns [`Error::InvalidReference`](crate::Error::InvalidReference) if
/// `authority` does not name a service port.
pub fn discover<F>(
    watcher: &EndpointsWatcher,
    authority: &str,
    tx: Sender<Change<SocketAddr, Endpoint>>,
    build: F,
) -> Result<Arc<BalanceListener<F>>>
where
    F: Fn(SocketAddr) -> Endpoint + Send + Sync + 'static,
{
    let listener = Arc::new(BalanceListener::new(tx, build));
    watcher.subscribe(authority, listener.clone())?;
    Ok(listener)
}

impl<F> BalanceListener<F>
where
    F: Fn(SocketAddr) -> Endpoint + Send + Sync,
{
    /// Creates a listener sending to `tx`, building endpoints with `build`.
    #[must_use]
    pub fn new(tx: Sender<Change<SocketAddr, Endpoint>>, build: F) -> Self {
        Self {
            tx,
            build,
            endpoints: Mutex::new(Tracked::default()),
        }
    }

    /// Sends whatever separates the channel's endpoints from the wanted ones,
    /// inserts first, until the channel refuses a change.
    fn reconcile(&self, tracked: &mut Tracked) {
        let mut inserts: Vec<SocketAddr> =
            tracked.wanted.difference(&tracked.sent).copied().collect();
        let mut removes: Vec<SocketAddr> =
            tracked.sent.difference(&tracked.wanted).copied().collect();
        inserts.sort_unstable();
        removes.sort_unstable();

        for addr in inserts {
            tracing::debug!(%addr, "inserting endpoint");
            if !self.send(Change::Insert(addr, (self.build)(addr))) {
                return;
            }
            tracked.sent.insert(addr);
        }

        for addr in removes {
            tracing::debug!(%addr, "removing endpoint");
            if !self.send(Change::Remove(addr)) {
                return;
            }
            tracked.sent.remove(&addr);
        }

        tracing::debug!(endpoints = tracked.sent.len(), "balance channel in sync");
    }

    fn send(&self, change: Change<SocketAddr, Endpoint>) -> bool {
        match self.tx.try_send(change) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("balance channel full, deferring endpoint changes");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("balance channel closed, dropping endpoint changes");
                false
            }
        }
    }
}

impl<F> EndpointUpdateListener for BalanceListener<F>
where
    F: Fn(SocketAddr) -> Endpoint + Send + Sync,
{
    fn add(&self, set: &AddressSet) {
        let mut tracked = self.endpoints.lock();
        tracked.wanted.extend(socket_addrs(set));
        self.reconcile(&mut tracked);
    }

    fn remove(&self, set: &AddressSet) {
        let mut tracked = self.endpoints.lock();
        for addr in socket_addrs(set) {
            tracked.wanted.remove(&addr);
        }
        self.reconcile(&mut tracked);
    }

    fn no_endpoints(&self, exists: bool) {
        tracing::debug!(exists, "no endpoints, removing all");
        let mut tracked = self.endpoints.lock();
        tracked.wanted.clear();
        self.reconcile(&mut tracked);
    }
}

/// Returns the socket addresses of a set, skipping ports out of range.
fn socket_addrs(set: &AddressSet) -> impl Iterator<Item = SocketAddr> + '_ {
    set.addresses
        .values()
        .filter_map(|address| match u16::try_from(address.port) {
            Ok(port) => Some(SocketAddr::new(address.ip, port)),
            Err(_) => {
                tracing::warn!(ip = %address.ip, port = address.port, "port out of range");
                None
            }
        })
}
