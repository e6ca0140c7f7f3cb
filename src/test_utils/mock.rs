use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use alloy::{
    network::Network,
    providers::{RootProvider, mock::Asserter},
    rpc::{
        client::RpcClient,
        types::{Filter, Log},
    },
    transports::TransportErrorKind,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::robust_provider::{Connector, Error, LogStream};

/// A [`Connector`] whose endpoints are scripted in memory.
///
/// Each URL gets its own [`Asserter`]; responses pushed to it are consumed in order by whatever
/// provider was handed out for that URL. Subscriptions are fed through [`MockConnector::feed`],
/// and every new subscription on a URL replaces the previous feed, which ends the old stream.
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<Endpoints>>,
}

#[derive(Default)]
struct Endpoints {
    polling: HashMap<String, Asserter>,
    subscription: HashMap<String, Asserter>,
    down: HashSet<String>,
    feeds: HashMap<String, mpsc::UnboundedSender<Log>>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script for the polling endpoint `url`.
    #[must_use]
    pub fn polling(&self, url: &str) -> Asserter {
        self.inner.lock().polling.entry(url.to_string()).or_default().clone()
    }

    /// Script for the subscription endpoint `url`, including its liveness probes.
    #[must_use]
    pub fn subscription(&self, url: &str) -> Asserter {
        self.inner.lock().subscription.entry(url.to_string()).or_default().clone()
    }

    /// Refuses future subscription connections to `url`.
    pub fn set_down(&self, url: &str) {
        self.inner.lock().down.insert(url.to_string());
    }

    pub fn set_up(&self, url: &str) {
        self.inner.lock().down.remove(url);
    }

    /// Sender for the current subscription on `url`, if one was opened.
    #[must_use]
    pub fn feed(&self, url: &str) -> Option<mpsc::UnboundedSender<Log>> {
        self.inner.lock().feeds.get(url).cloned()
    }

    /// Pushes `log` into the current subscription on `url`. Returns whether it was delivered.
    pub fn push_log(&self, url: &str, log: Log) -> bool {
        self.feed(url).is_some_and(|feed| feed.send(log).is_ok())
    }

    /// Ends the current subscription stream on `url`, as a dropped socket would.
    pub fn drop_feed(&self, url: &str) {
        self.inner.lock().feeds.remove(url);
    }
}

impl<N: Network> Connector<N> for MockConnector {
    fn connect_polling(&self, url: &str) -> Result<RootProvider<N>, Error> {
        if !url.contains("://") {
            return Err(Error::InvalidEndpoint(url.to_string()));
        }
        Ok(RootProvider::new(RpcClient::mocked(self.polling(url))))
    }

    async fn connect_subscription(&self, url: &str) -> Result<RootProvider<N>, Error> {
        if self.inner.lock().down.contains(url) {
            return Err(Error::RpcError(Arc::new(TransportErrorKind::custom_str(
                "connection refused",
            ))));
        }
        Ok(RootProvider::new(RpcClient::mocked(self.subscription(url))))
    }

    async fn subscribe_logs(
        &self,
        url: &str,
        _provider: &RootProvider<N>,
        _filter: &Filter,
    ) -> Result<LogStream, Error> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.lock().feeds.insert(url.to_string(), sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}
