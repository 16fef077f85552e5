#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes endpoint watching and fan-out for service mesh destination lookups.
//!
//! An [`EndpointsWatcher`] tracks `Service`, `Endpoints` and `Pod` objects and
//! keeps, per service port, the set of addresses backing it. Any number of
//! listeners can subscribe to a service port; each receives the current state
//! on subscription and then every change as an add or remove delta.
//!
//! # Features
//!
//! - **Per-port publishers**: one subscription per `name.namespace.svc.<zone>:port` authority
//! - **Target port resolution**: numeric and named service `targetPort`s
//! - **Destination updates**: weighted addresses with mutual TLS identities and HTTP/2 hints
//! - **Balance channels**: feed endpoint changes straight into a Tonic balance channel
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use prometheus_client::registry::Registry;
//! use tonic_dst_k8s::{
//!     Destination, DestinationConfig, EndpointsMetrics, EndpointsWatcher, Informers,
//!     WatcherConfig,
//! };
//!
//! let mut registry = Registry::default();
//! let informers = Informers::new();
//! let watcher = Arc::new(EndpointsWatcher::new(
//!     Arc::new(informers.cache()),
//!     WatcherConfig::default(),
//!     EndpointsMetrics::register(&mut registry),
//! ));
//! tokio::spawn(informers.run(watcher.clone()));
//!
//! let destination = Destination::new(watcher, DestinationConfig::new("linkerd"));
//! let mut updates = destination.get("web.emojivoto.svc.cluster.local:8080")?;
//! while let Some(update) = updates.next().await {
//!     println!("{:?}", update?);
//! }
//! ```

mod address;
mod api;
mod balance;
mod cache;
mod config;
mod error;
mod id;
mod informer;
mod listener;
mod metrics;
mod publisher;
mod server;
mod translator;
mod watcher;

#[cfg(test)]
mod test_util;

pub use address::{Address, AddressSet, POD_TEMPLATE_HASH_LABEL, diff_pods, owner_kind_and_name};
pub use api::{
    AddrSet, AuthorityOverride, DEFAULT_WEIGHT, NoEndpoints, ProtocolHint, TcpAddress,
    TlsIdentity, Update, WeightedAddr, WeightedAddrSet,
};
pub use balance::{BalanceListener, discover};
pub use cache::{ClusterCache, StoreCache};
pub use config::{DEFAULT_STREAM_CAPACITY, DestinationConfig, KUBE_SYSTEM, WatcherConfig};
pub use error::{Error, Result};
pub use id::{DEFAULT_PORT, PodId, Port, ServiceId, TargetPort, parse_authority};
pub use informer::Informers;
pub use listener::{EndpointUpdateListener, SharedListener};
pub use metrics::EndpointsMetrics;
pub use publisher::{REMOTE_GATEWAY_IDENTITY_ANNOTATION, REMOTE_SERVICE_FQ_NAME_ANNOTATION};
pub use server::{Destination, UpdateStream};
pub use translator::{
    CONTROLLER_NS_LABEL, EndpointTranslator, IDENTITY_MODE_ANNOTATION, IDENTITY_MODE_DEFAULT,
    UpdateSink,
};
pub use watcher::EndpointsWatcher;
