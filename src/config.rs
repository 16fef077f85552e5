//! Configuration for the watcher and the endpoint translators.

/// Namespace whose events are ignored unless configured otherwise.
pub const KUBE_SYSTEM: &str = "kube-system";

/// Updates a destination stream buffers before further updates are dropped.
pub const DEFAULT_STREAM_CAPACITY: usize = 100;

/// Configuration for the [`EndpointsWatcher`](crate::EndpointsWatcher).
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// Namespaces whose `Service` and `Endpoints` events are dropped.
    pub ignored_namespaces: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            ignored_namespaces: vec![KUBE_SYSTEM.to_string()],
        }
    }
}

impl WatcherConfig {
    /// Creates a configuration that ignores no namespace.
    #[must_use]
    pub fn watch_all() -> Self {
        Self {
            ignored_namespaces: Vec::new(),
        }
    }

    /// Adds a namespace whose events are dropped.
    #[must_use]
    pub fn ignore_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.ignored_namespaces.push(namespace.into());
        self
    }

    pub(crate) fn is_ignored(&self, namespace: &str) -> bool {
        self.ignored_namespaces.iter().any(|ns| ns == namespace)
    }
}

/// Configuration for translating address sets into destination updates.
#[derive(Clone, Debug)]
pub struct DestinationConfig {
    /// Namespace of the control plane serving the updates.
    pub controller_namespace: String,

    /// Trust domain identities are issued in. Identity is disabled when `None`.
    pub identity_trust_domain: Option<String>,

    /// Whether meshed peers are hinted to support HTTP/2 upgrades.
    pub enable_h2_upgrade: bool,

    /// Updates buffered per destination stream.
    pub stream_capacity: usize,
}

impl DestinationConfig {
    /// Creates a configuration for the control plane in `controller_namespace`.
    ///
    /// Identity is disabled and HTTP/2 upgrade hints are enabled.
    #[must_use]
    pub fn new(controller_namespace: impl Into<String>) -> Self {
        Self {
            controller_namespace: controller_namespace.into(),
            identity_trust_domain: None,
            enable_h2_upgrade: true,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Sets the identity trust domain, enabling identity.
    #[must_use]
    pub fn identity_trust_domain(mut self, trust_domain: impl Into<String>) -> Self {
        self.identity_trust_domain = Some(trust_domain.into());
        self
    }

    /// Enables or disables HTTP/2 upgrade hints.
    #[must_use]
    pub fn enable_h2_upgrade(mut self, enable: bool) -> Self {
        self.enable_h2_upgrade = enable;
        self
    }

    /// Sets how many updates each destination stream buffers. Clamped to at least 1.
    #[must_use]
    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }
}
