//! Error types for discovery operations.

/// Errors returned by the discovery core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The authority could not be parsed into a service and port.
    #[error("invalid service reference {authority:?}: {reason}")]
    InvalidReference {
        /// The authority as received from the caller.
        authority: String,
        /// Why the authority was rejected.
        reason: &'static str,
    },

    /// The outbound stream of a subscriber has no room for another update.
    #[error("update stream full")]
    StreamFull,

    /// The outbound stream of a subscriber is gone.
    #[error("update stream closed")]
    StreamClosed,

    /// A Kubernetes API request failed.
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// A reflector store was abandoned before its initial sync completed.
    #[error("cache never became ready: {0}")]
    CacheNotReady(#[from] kube::runtime::reflector::store::WriterDropped),
}

impl Error {
    pub(crate) fn invalid_reference(authority: &str, reason: &'static str) -> Self {
        Self::InvalidReference {
            authority: authority.to_string(),
            reason,
        }
    }
}

/// Result type for discovery operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
