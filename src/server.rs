//! The destination front door.
//!
//! [`Destination::get`] binds a new [`EndpointTranslator`] to a stream and
//! subscribes it to the requested service port. The subscription lives as
//! long as the returned [`UpdateStream`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tonic::Status;

use crate::api::Update;
use crate::config::DestinationConfig;
use crate::error::Error;
use crate::listener::SharedListener;
use crate::translator::EndpointTranslator;
use crate::watcher::EndpointsWatcher;

/// Serves destination lookups from an [`EndpointsWatcher`].
#[derive(Clone)]
pub struct Destination {
    watcher: Arc<EndpointsWatcher>,
    config: Arc<DestinationConfig>,
}

impl Destination {
    /// Creates a front door over `watcher`.
    #[must_use]
    pub fn new(watcher: Arc<EndpointsWatcher>, config: DestinationConfig) -> Self {
        Self {
            watcher,
            config: Arc::new(config),
        }
    }

    /// Streams updates for the service port named by `path`.
    ///
    /// The stream yields the current state first. Dropping it unsubscribes.
    /// Updates that find the stream's buffer full are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `path` does not name a service port.
    pub fn get(&self, path: &str) -> Result<UpdateStream, Status> {
        tracing::debug!(authority = path, "get");

        let (tx, rx) = mpsc::channel(self.config.stream_capacity);
        let listener: SharedListener = Arc::new(EndpointTranslator::new(&self.config, path, tx));

        match self.watcher.subscribe(path, listener.clone()) {
            Ok(()) => Ok(UpdateStream {
                rx,
                subscription: Some(Subscription {
                    watcher: self.watcher.clone(),
                    authority: path.to_string(),
                    listener,
                }),
            }),
            Err(error @ Error::InvalidReference { .. }) => {
                tracing::debug!(authority = path, %error, "rejecting lookup");
                Err(Status::invalid_argument(error.to_string()))
            }
            Err(error) => Err(Status::internal(error.to_string())),
        }
    }
}

/// Updates for one destination lookup.
pub struct UpdateStream {
    rx: mpsc::Receiver<Result<Update, Status>>,
    subscription: Option<Subscription>,
}

impl UpdateStream {
    /// Unsubscribes, leaving already queued updates readable.
    pub fn cancel(&mut self) {
        self.subscription = None;
    }
}

impl Stream for UpdateStream {
    type Item = Result<Update, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Unsubscribes its listener when dropped.
struct Subscription {
    watcher: Arc<EndpointsWatcher>,
    authority: String,
    listener: SharedListener,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.watcher.unsubscribe(&self.authority, &self.listener);
    }
}
