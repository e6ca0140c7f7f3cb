use std::time::Duration;

use alloy::network::{Ethereum, Network};

use crate::{
    ScannerConfig, ScannerError,
    listener::MintListener,
    robust_provider::{Connector, DefaultConnector},
};

/// Builder for [`MintListener`].
///
/// Starts from [`ScannerConfig::default`] (or a loaded config via
/// [`MintListenerBuilder::from_config`]); every setter overrides one field.
#[derive(Clone, Debug, Default)]
pub struct MintListenerBuilder {
    config: ScannerConfig,
}

impl MintListenerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Sets the push-style (WebSocket) endpoints, replacing any previous list.
    #[must_use]
    pub fn subscription_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.subscription_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the pull-style (HTTP) endpoints, replacing any previous list.
    #[must_use]
    pub fn polling_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.polling_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Mints of token ids above `max_token_id` are dropped silently.
    #[must_use]
    pub fn max_token_id(mut self, max_token_id: u64) -> Self {
        self.config.max_token_id = max_token_id;
        self
    }

    /// Retry budget for transaction and block lookups.
    #[must_use]
    pub fn retry(mut self, attempts: usize, base_delay: Duration) -> Self {
        self.config.retry_attempts = attempts;
        self.config.retry_delay = base_delay;
        self
    }

    /// Deadline for a single RPC attempt.
    #[must_use]
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.config.call_timeout = call_timeout;
        self
    }

    /// Bounds for the adaptive poll interval.
    ///
    /// `min` must not exceed `max`, and the default interval must lie between them.
    #[must_use]
    pub fn poll_interval_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_poll_interval = min;
        self.config.max_poll_interval = max;
        self
    }

    #[must_use]
    pub fn default_poll_interval(mut self, interval: Duration) -> Self {
        self.config.default_poll_interval = interval;
        self
    }

    /// Wait before the first polling cycle of each polling period.
    #[must_use]
    pub fn initial_poll_delay(mut self, delay: Duration) -> Self {
        self.config.initial_poll_delay = delay;
        self
    }

    #[must_use]
    pub fn initial_lookback_blocks(mut self, blocks: u64) -> Self {
        self.config.initial_lookback_blocks = blocks;
        self
    }

    /// How many of the best polling endpoints are raced per request. Must be greater than 0.
    #[must_use]
    pub fn race_candidates(mut self, candidates: usize) -> Self {
        self.config.race_candidates = candidates;
        self
    }

    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// How often subscriptions are retried while polling.
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// How often the live subscription is probed with `eth_blockNumber`.
    #[must_use]
    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.config.liveness_interval = interval;
        self
    }

    #[must_use]
    pub fn timestamp_cache_size(mut self, size: usize) -> Self {
        self.config.timestamp_cache_size = size;
        self
    }

    /// Sets the stream buffer capacity.
    ///
    /// Controls how many items can wait in the stream before the listener applies backpressure.
    #[must_use]
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.stream_buffer_capacity = capacity;
        self
    }

    /// Builds a listener that connects over HTTP and WebSocket.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found by [`ScannerConfig::validate`].
    pub fn build(self) -> Result<MintListener<Ethereum, DefaultConnector>, ScannerError> {
        self.build_with(DefaultConnector)
    }

    /// Builds a listener that opens its connections through `connector`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found by [`ScannerConfig::validate`].
    pub fn build_with<N: Network, C: Connector<N>>(
        self,
        connector: C,
    ) -> Result<MintListener<N, C>, ScannerError> {
        self.config.validate()?;
        Ok(MintListener::new(self.config, connector))
    }
}
