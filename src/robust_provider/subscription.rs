use std::sync::Arc;

use alloy::{network::Network, rpc::types::Filter};

use crate::robust_provider::{
    Connector, HealthRegistry, LogStream, Outcome, RetryExecutor, RetryPolicy, RobustProvider,
    TransportKind,
};

/// The accepted push connection.
pub struct LiveSubscription<N: Network> {
    provider: RobustProvider<N>,
    stream: Option<LogStream>,
}

impl<N: Network> LiveSubscription<N> {
    #[must_use]
    pub fn provider(&self) -> &RobustProvider<N> {
        &self.provider
    }
}

/// Keeps at most one live log subscription open.
///
/// [`SubscriptionManager::connect`] walks the eligible subscription endpoints best-first and
/// accepts the first one that answers a liveness probe and opens a log subscription. Any
/// previous connection is torn down before a new one is attempted.
pub struct SubscriptionManager<N: Network, C: Connector<N>> {
    connector: Arc<C>,
    registry: HealthRegistry,
    executor: RetryExecutor,
    lookup_policy: RetryPolicy,
    filter: Filter,
    active: Option<LiveSubscription<N>>,
}

impl<N: Network, C: Connector<N>> SubscriptionManager<N, C> {
    pub fn new(
        connector: Arc<C>,
        registry: HealthRegistry,
        executor: RetryExecutor,
        lookup_policy: RetryPolicy,
        filter: Filter,
    ) -> Self {
        Self { connector, registry, executor, lookup_policy, filter, active: None }
    }

    /// Tries every eligible subscription endpoint in score order. Returns whether one was
    /// accepted.
    pub async fn connect(&mut self) -> bool {
        if self.active.is_some() {
            self.disconnect(false);
        }

        for url in self.registry.eligible(TransportKind::Subscription) {
            let root = match self.connector.connect_subscription(&url).await {
                Ok(root) => root,
                Err(err) => {
                    warn!(url = %url, error = %err, "Subscription connect failed");
                    self.registry.report(&url, Outcome::Failure(err.kind()));
                    continue;
                }
            };

            let provider = RobustProvider::new(url.as_str(), root, self.executor.clone())
                .with_lookup_policy(self.lookup_policy);

            if let Err(err) = provider.block_number(RetryPolicy::LIVENESS).await {
                warn!(url = %url, error = %err, "Subscription endpoint failed liveness check");
                continue;
            }

            let stream =
                match self.connector.subscribe_logs(&url, provider.root(), &self.filter).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(url = %url, error = %err, "eth_subscribe failed");
                        self.registry.report(&url, Outcome::Failure(err.kind()));
                        continue;
                    }
                };

            info!(url = %url, "Subscription established");
            self.registry.mark_current_subscription(&url);
            self.active = Some(LiveSubscription { provider, stream: Some(stream) });
            return true;
        }

        false
    }

    /// Hands the log stream of the live connection to its consumer. Returns `None` when there is
    /// no connection or the stream was already taken.
    pub fn take_stream(&mut self) -> Option<(RobustProvider<N>, LogStream)> {
        let active = self.active.as_mut()?;
        let stream = active.stream.take()?;
        Some((active.provider.clone(), stream))
    }

    #[must_use]
    pub fn current(&self) -> Option<&LiveSubscription<N>> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn current_url(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.provider.url())
    }

    /// Releases the live connection. With `failed`, the endpoint is also suspended.
    pub fn disconnect(&mut self, failed: bool) {
        let Some(active) = self.active.take() else {
            return;
        };
        let url = active.provider.url().to_string();
        drop(active);

        if failed {
            warn!(url = %url, "Tearing down failed subscription");
            self.registry.mark_failed_subscription(&url);
        } else {
            debug!(url = %url, "Tearing down subscription");
            self.registry.clear_current_subscription();
        }
    }
}
