//! The mint listener: transport failover, polling and per-log enrichment.
//!
//! A [`MintListener`] owns one controller task. The controller prefers a live log subscription and
//! falls back to racing polling endpoints when no subscription endpoint connects, retrying
//! subscriptions in the background while it polls. Exactly one transport delivers logs at a time.

use std::{marker::PhantomData, sync::Arc, time::Duration};

use alloy::{
    network::{Ethereum, Network},
    rpc::types::Log,
};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, sleep_until},
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;

use crate::{
    Notification, ScannerConfig, ScannerError,
    robust_provider::{
        Connector, DefaultConnector, EndpointHealth, HealthRegistry, LogStream, RaceScope,
        RetryExecutor, RetryPolicy, RobustProvider, SubscriptionManager,
    },
    types::{MintStreamItem, TransportState, TryStream},
};

mod builder;
mod enrichment;
mod filter;
mod polling;

pub use builder::MintListenerBuilder;
pub use enrichment::{Enrichment, LogEnricher, SkipReason, UNNAMED_COLLECTION};
pub use filter::{TRANSFER_TOPIC, Transfer, mint_filter};
pub use polling::{PollingSettings, next_poll_interval};

use polling::PollingEngine;

/// Listens for ERC-721 mints across a pool of unreliable RPC endpoints.
///
/// Lifecycle is `build -> start -> stop`, and a stopped listener can be started again. Endpoint
/// health and the polling scan point survive transport switches; [`MintListener::stop`] resets
/// health and the next start scans from just behind the tip again.
///
/// # Example
///
/// ```no_run
/// # use mint_scanner::{MintListenerBuilder, ScannerMessage};
/// # use tokio_stream::StreamExt;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut listener = MintListenerBuilder::new()
///     .subscription_urls(["wss://ethereum-rpc.publicnode.com"])
///     .polling_urls(["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"])
///     .build()?;
///
/// let mut stream = listener.start()?;
/// while let Some(item) = stream.next().await {
///     match item {
///         Ok(ScannerMessage::Data(mint)) => println!("{} #{}", mint.collection_name, mint.token_id),
///         Ok(ScannerMessage::Notification(notification)) => println!("{notification:?}"),
///         Err(err) => eprintln!("{err} (rate limited: {})", err.is_rate_limit()),
///     }
/// }
/// listener.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct MintListener<N: Network = Ethereum, C: Connector<N> = DefaultConnector> {
    config: ScannerConfig,
    connector: Arc<C>,
    registry: HealthRegistry,
    state: Arc<Mutex<TransportState>>,
    running: Option<Running>,
    _network: PhantomData<fn() -> N>,
}

/// One started run: the controller task and the races it launched.
struct Running {
    controller: Background,
    races: RaceScope,
}

impl<N: Network, C: Connector<N>> MintListener<N, C> {
    pub(crate) fn new(config: ScannerConfig, connector: C) -> Self {
        let registry =
            HealthRegistry::new(&config.subscription_urls, &config.polling_urls, config.cooldown);
        Self {
            config,
            connector: Arc::new(connector),
            registry,
            state: Arc::new(Mutex::new(TransportState::Initializing)),
            running: None,
            _network: PhantomData,
        }
    }

    /// Starts the controller and returns the stream of mints, errors and notifications.
    ///
    /// [`Notification::SetupComplete`] arrives once the first transport has been chosen.
    ///
    /// # Errors
    ///
    /// * [`ScannerError::AlreadyStarted`] if the listener is still running.
    /// * [`ScannerError::NoEndpointsConfigured`], [`ScannerError::InvalidConfig`] or
    ///   [`ScannerError::InvalidEndpoint`] for unusable configuration.
    pub fn start(&mut self) -> Result<ReceiverStream<MintStreamItem>, ScannerError> {
        let live = self.running.as_ref().is_some_and(|r| !r.controller.handle.is_finished());
        if live {
            return Err(ScannerError::AlreadyStarted);
        }
        self.config.validate()?;

        let executor =
            RetryExecutor::new(self.config.call_timeout).with_registry(self.registry.clone());
        let lookup_policy = self.config.lookup_policy();
        let polling_providers = self
            .config
            .polling_urls
            .iter()
            .map(|url| {
                let root = self.connector.connect_polling(url)?;
                Ok(RobustProvider::new(url.as_str(), root, executor.clone())
                    .with_lookup_policy(lookup_policy))
            })
            .collect::<Result<Vec<_>, crate::robust_provider::Error>>()?;

        let enricher = Arc::new(LogEnricher::new(
            self.config.max_token_id,
            self.config.timestamp_cache_capacity(),
        ));
        let subscriptions = SubscriptionManager::new(
            self.connector.clone(),
            self.registry.clone(),
            executor,
            lookup_policy,
            mint_filter(),
        );

        let (sender, receiver) = mpsc::channel(self.config.stream_buffer_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let races = RaceScope::new();
        *self.state.lock() = TransportState::Initializing;

        let controller = Controller {
            subscriptions,
            polling_providers,
            has_subscription_endpoints: !self.config.subscription_urls.is_empty(),
            registry: self.registry.clone(),
            races: races.clone(),
            parked: None,
            enricher,
            settings: polling_settings(&self.config),
            reconnect_interval: self.config.reconnect_interval,
            liveness_interval: self.config.liveness_interval,
            state: self.state.clone(),
            sender,
            control_tx,
            control_rx,
            cancel: cancel.clone(),
            active: Active::Idle,
            reconnect_at: None,
        };
        let handle = tokio::spawn(controller.run());
        self.running = Some(Running { controller: Background { cancel, handle }, races });

        info!(
            subscription_endpoints = self.config.subscription_urls.len(),
            polling_endpoints = self.config.polling_urls.len(),
            "Mint listener started"
        );
        Ok(ReceiverStream::new(receiver))
    }

    /// Stops every transport, clears all timers and resets endpoint health to untested.
    ///
    /// Requests still in flight are cancelled before health is reset, so nothing from this run
    /// reports afterwards. Safe to call repeatedly and before [`MintListener::start`].
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.controller.shutdown().await;
            running.races.shutdown().await;
            info!("Mint listener stopped");
        }
        *self.state.lock() = TransportState::Stopped;
        self.registry.reset();
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Health of every configured endpoint, subscription endpoints first.
    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointHealth> {
        self.registry.snapshot()
    }

    #[must_use]
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }
}

impl<N: Network, C: Connector<N>> Drop for MintListener<N, C> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.controller.cancel.cancel();
            running.races.abort();
        }
    }
}

fn polling_settings(config: &ScannerConfig) -> PollingSettings {
    PollingSettings {
        min_interval: config.min_poll_interval,
        max_interval: config.max_poll_interval,
        default_interval: config.default_poll_interval,
        initial_delay: config.initial_poll_delay,
        initial_lookback_blocks: config.initial_lookback_blocks,
        race_candidates: config.race_candidates,
    }
}

/// Enriches one log and forwards the outcome. Returns `false` once the consumer is gone.
pub(crate) async fn emit<N: Network>(
    enricher: &LogEnricher,
    log: &Log,
    source: &RobustProvider<N>,
    sender: &mpsc::Sender<MintStreamItem>,
) -> bool {
    match enricher.process(log, source).await {
        Ok(Enrichment::Mint(record)) => sender.try_stream(record).await,
        Ok(Enrichment::Skipped(reason)) => {
            trace!(reason = ?reason, tx_hash = ?log.transaction_hash, "Log skipped");
            true
        }
        Err(err) => sender.try_stream(err).await,
    }
}

/// A spawned task together with the token that stops it.
struct Background<T = ()> {
    cancel: CancellationToken,
    handle: JoinHandle<T>,
}

impl<T> Background<T> {
    /// Cancels the task and returns what it handed back, unless it panicked.
    async fn shutdown(self) -> Option<T> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(output) => Some(output),
            Err(err) => {
                if err.is_panic() {
                    error!(error = %err, "Background task panicked");
                }
                None
            }
        }
    }
}

/// The transport currently feeding the stream.
enum Active<N: Network> {
    Idle,
    Subscription(Background),
    Polling(Background<PollingEngine<N>>),
}

enum ControlEvent {
    SubscriptionLost { url: String },
}

struct Controller<N: Network, C: Connector<N>> {
    subscriptions: SubscriptionManager<N, C>,
    polling_providers: Vec<RobustProvider<N>>,
    has_subscription_endpoints: bool,
    registry: HealthRegistry,
    races: RaceScope,
    /// The polling engine between polling periods.
    parked: Option<PollingEngine<N>>,
    enricher: Arc<LogEnricher>,
    settings: PollingSettings,
    reconnect_interval: Duration,
    liveness_interval: Duration,
    state: Arc<Mutex<TransportState>>,
    sender: mpsc::Sender<MintStreamItem>,
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    control_rx: mpsc::UnboundedReceiver<ControlEvent>,
    cancel: CancellationToken,
    active: Active<N>,
    reconnect_at: Option<Instant>,
}

impl<N: Network, C: Connector<N>> Controller<N, C> {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            () = cancel.cancelled() => debug!("Controller cancelled"),
            () = self.drive() => {}
        }
        self.teardown().await;
    }

    async fn drive(&mut self) {
        if !self.establish().await {
            return;
        }

        loop {
            let open = tokio::select! {
                () = self.sender.closed() => {
                    info!("Mint stream dropped by consumer");
                    false
                }
                Some(ControlEvent::SubscriptionLost { url }) = self.control_rx.recv() => {
                    self.on_subscription_lost(url).await
                }
                () = reconnect_timer(self.reconnect_at) => self.try_reconnect().await,
            };
            if !open {
                return;
            }
        }
    }

    /// Initial transport selection, followed by the one-time setup notification.
    async fn establish(&mut self) -> bool {
        let open = if self.subscriptions.connect().await {
            self.activate_subscription().await
        } else {
            info!("No subscription endpoint connected, polling");
            self.activate_polling().await
        };
        open && self.sender.try_stream(Notification::SetupComplete).await
    }

    async fn on_subscription_lost(&mut self, url: String) -> bool {
        let is_current = matches!(self.active, Active::Subscription(_))
            && self.subscriptions.current_url() == Some(url.as_str());
        if !is_current {
            debug!(url = %url, "Ignoring loss of a subscription that is no longer active");
            return true;
        }

        warn!(url = %url, "Subscription lost, switching");
        self.set_state(TransportState::Switching);
        self.stop_active().await;
        self.subscriptions.disconnect(true);

        if !self.sender.try_stream(ScannerError::SubscriptionLost { url }).await {
            return false;
        }

        if self.subscriptions.connect().await {
            self.activate_subscription().await
        } else {
            info!("No subscription endpoint connected, falling back to polling");
            self.activate_polling().await
        }
    }

    async fn try_reconnect(&mut self) -> bool {
        self.reconnect_at = None;
        debug!("Retrying subscription endpoints");

        if !self.subscriptions.connect().await {
            self.schedule_reconnect();
            return true;
        }

        info!("Subscription restored, stopping polling");
        self.set_state(TransportState::Switching);
        self.stop_active().await;
        self.activate_subscription().await
    }

    async fn activate_subscription(&mut self) -> bool {
        let Some((provider, stream)) = self.subscriptions.take_stream() else {
            return self.activate_polling().await;
        };
        self.reconnect_at = None;

        let cancel = self.cancel.child_token();
        let delivery = Delivery {
            provider,
            enricher: self.enricher.clone(),
            sender: self.sender.clone(),
            liveness_interval: self.liveness_interval,
            control: self.control_tx.clone(),
        };
        let handle = tokio::spawn(delivery.run(stream, cancel.clone()));
        self.active = Active::Subscription(Background { cancel, handle });
        self.set_state(TransportState::SubscriptionActive);
        self.sender.try_stream(Notification::SubscriptionActive).await
    }

    async fn activate_polling(&mut self) -> bool {
        let engine = match self.parked.take() {
            Some(engine) => engine,
            None => PollingEngine::new(
                self.polling_providers.clone(),
                self.registry.clone(),
                self.races.clone(),
                self.enricher.clone(),
                mint_filter(),
                self.settings,
            ),
        };
        let cancel = self.cancel.child_token();
        let handle = engine.spawn(self.sender.clone(), cancel.clone());
        self.active = Active::Polling(Background { cancel, handle });
        self.set_state(TransportState::PollingActive);
        self.schedule_reconnect();
        self.sender.try_stream(Notification::PollingActive).await
    }

    fn schedule_reconnect(&mut self) {
        if self.has_subscription_endpoints {
            self.reconnect_at = Some(Instant::now() + self.reconnect_interval);
        }
    }

    async fn stop_active(&mut self) {
        match std::mem::replace(&mut self.active, Active::Idle) {
            Active::Idle => {}
            Active::Subscription(task) => {
                task.shutdown().await;
            }
            Active::Polling(task) => self.parked = task.shutdown().await,
        }
    }

    async fn teardown(&mut self) {
        self.reconnect_at = None;
        self.stop_active().await;
        self.subscriptions.disconnect(false);
        self.races.shutdown().await;
        self.set_state(TransportState::Stopped);
        debug!("Controller stopped");
    }

    fn set_state(&self, state: TransportState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = %*current, to = %state, "Transport state changed");
            *current = state;
        }
    }
}

async fn reconnect_timer(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Pumps logs from a live subscription into the stream and probes the connection periodically.
struct Delivery<N: Network> {
    provider: RobustProvider<N>,
    enricher: Arc<LogEnricher>,
    sender: mpsc::Sender<MintStreamItem>,
    liveness_interval: Duration,
    control: mpsc::UnboundedSender<ControlEvent>,
}

impl<N: Network> Delivery<N> {
    async fn run(self, stream: LogStream, cancel: CancellationToken) {
        let lost = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            lost = self.pump(stream) => lost,
        };
        if lost {
            let url = self.provider.url().to_string();
            // the controller may already be gone
            let _ = self.control.send(ControlEvent::SubscriptionLost { url });
        }
    }

    /// Returns `true` when the connection failed and `false` when the consumer went away.
    async fn pump(&self, mut stream: LogStream) -> bool {
        let mut probe = tokio::time::interval_at(
            Instant::now() + self.liveness_interval,
            self.liveness_interval,
        );
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                log = stream.next() => {
                    let Some(log) = log else {
                        warn!(url = %self.provider.url(), "Subscription stream ended");
                        return true;
                    };
                    if !emit(&self.enricher, &log, &self.provider, &self.sender).await {
                        return false;
                    }
                }
                _ = probe.tick() => {
                    if let Err(err) = self.provider.block_number(RetryPolicy::LIVENESS).await {
                        warn!(url = %self.provider.url(), error = %err, "Liveness probe failed");
                        return true;
                    }
                    trace!(url = %self.provider.url(), "Liveness probe ok");
                }
            }
        }
    }
}
