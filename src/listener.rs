//! The capability publishers deliver address set changes through.

use std::sync::Arc;

use crate::address::AddressSet;

/// A per-subscription sink for address set changes.
///
/// Calls are made while the owning service's lock is held, so implementations
/// must not block and must not call back into the [`EndpointsWatcher`].
///
/// [`EndpointsWatcher`]: crate::EndpointsWatcher
pub trait EndpointUpdateListener: Send + Sync {
    /// Addresses became available.
    fn add(&self, set: &AddressSet);

    /// Addresses went away.
    fn remove(&self, set: &AddressSet);

    /// There are no addresses. `exists` tells whether the service exists at all.
    fn no_endpoints(&self, exists: bool);
}

/// A listener shared between a publisher and whoever subscribed it.
pub type SharedListener = Arc<dyn EndpointUpdateListener>;

/// Listeners are identified by the allocation they point to.
pub(crate) fn same_listener(a: &SharedListener, b: &SharedListener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
