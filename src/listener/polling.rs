use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy::{network::Network, rpc::types::Filter};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    ScannerError,
    listener::{emit, enrichment::LogEnricher},
    robust_provider::{Error, HealthRegistry, RaceScope, RetryPolicy, RobustProvider, TransportKind},
    types::{MintStreamItem, TryStream},
};

/// Poll cadence limits and starting points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingSettings {
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub default_interval: Duration,
    pub initial_delay: Duration,
    pub initial_lookback_blocks: u64,
    pub race_candidates: usize,
}

/// Interval for the next cycle: shorter by a factor of 1.2 after a cycle that found logs, longer by
/// 1.2 otherwise, clamped to `[min, max]` and truncated to whole milliseconds.
#[must_use]
pub fn next_poll_interval(
    previous: Duration,
    found_logs: bool,
    min: Duration,
    max: Duration,
) -> Duration {
    let previous = u64::try_from(previous.as_millis()).unwrap_or(u64::MAX);
    let next = if found_logs {
        Duration::from_millis(previous.saturating_mul(5) / 6)
    } else {
        Duration::from_millis(previous.saturating_mul(6) / 5)
    };
    next.clamp(min, max)
}

/// What one polling cycle achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// Logs in `[from, to]` were fetched; `found` of them came back.
    Scanned { from: u64, to: u64, found: usize },
    /// The chain has not moved since the last cycle.
    NoNewBlocks,
    /// No endpoint was eligible; the interval is left alone.
    NoCandidates,
    Failed,
    /// The consumer went away.
    Closed,
}

/// Races the best polling endpoints for new mint logs at an adaptive interval.
///
/// The scan point starts just behind the tip on the first cycle and only moves forward once a log
/// fetch succeeds, so a range is never requested twice. A spawned engine hands itself back when it
/// stops; the controller parks it between polling periods, so the scan point and the interval
/// carry across transport switches and only a new start begins afresh.
pub(crate) struct PollingEngine<N: Network> {
    providers: HashMap<String, RobustProvider<N>>,
    registry: HealthRegistry,
    races: RaceScope,
    enricher: Arc<LogEnricher>,
    filter: Filter,
    settings: PollingSettings,
    interval: Duration,
    last_scanned: Option<u64>,
}

impl<N: Network> PollingEngine<N> {
    pub(crate) fn new(
        providers: Vec<RobustProvider<N>>,
        registry: HealthRegistry,
        races: RaceScope,
        enricher: Arc<LogEnricher>,
        filter: Filter,
        settings: PollingSettings,
    ) -> Self {
        let providers = providers.into_iter().map(|p| (p.url().to_string(), p)).collect();
        Self {
            providers,
            registry,
            races,
            enricher,
            filter,
            settings,
            interval: settings.default_interval,
            last_scanned: None,
        }
    }

    pub(crate) fn spawn(
        self,
        sender: mpsc::Sender<MintStreamItem>,
        cancel: CancellationToken,
    ) -> JoinHandle<Self> {
        tokio::spawn(self.run(sender, cancel))
    }

    async fn run(mut self, sender: mpsc::Sender<MintStreamItem>, cancel: CancellationToken) -> Self {
        info!(
            interval_ms = self.interval.as_millis(),
            last_scanned = ?self.last_scanned,
            "Polling started"
        );
        let mut delay = self.settings.initial_delay;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(delay) => {}
            }

            let open = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                open = self.poll_once(&sender) => open,
            };
            if !open {
                break;
            }
            delay = self.interval;
        }
        info!(last_scanned = ?self.last_scanned, "Polling stopped");
        self
    }

    /// Runs one cycle and adapts the interval. Returns `false` once the consumer is gone.
    pub(crate) async fn poll_once(&mut self, sender: &mpsc::Sender<MintStreamItem>) -> bool {
        match self.cycle(sender).await {
            CycleOutcome::Closed => return false,
            CycleOutcome::NoCandidates => {}
            CycleOutcome::Scanned { found, .. } => self.adapt(found > 0),
            CycleOutcome::NoNewBlocks | CycleOutcome::Failed => self.adapt(false),
        }
        true
    }

    fn adapt(&mut self, found_logs: bool) {
        let next = next_poll_interval(
            self.interval,
            found_logs,
            self.settings.min_interval,
            self.settings.max_interval,
        );
        trace!(previous_ms = self.interval.as_millis(), next_ms = next.as_millis(), "Poll interval");
        self.interval = next;
    }

    fn candidates(&self) -> Vec<RobustProvider<N>> {
        self.registry
            .eligible(TransportKind::Polling)
            .into_iter()
            .filter_map(|url| self.providers.get(&url).cloned())
            .take(self.settings.race_candidates)
            .collect()
    }

    pub(crate) async fn cycle(&mut self, sender: &mpsc::Sender<MintStreamItem>) -> CycleOutcome {
        let candidates = self.candidates();
        if candidates.is_empty() {
            warn!("No eligible polling endpoints this cycle");
            let err = ScannerError::NoHealthyEndpoints(TransportKind::Polling);
            return if sender.try_stream(err).await {
                CycleOutcome::NoCandidates
            } else {
                CycleOutcome::Closed
            };
        }

        let heights = candidates.iter().cloned().map(|provider| async move {
            provider.block_number(RetryPolicy::POLL_BLOCK_NUMBER).await
        });
        let height = match self.races.race(heights).await {
            Ok(height) => height,
            Err(errors) => {
                error!(candidates = candidates.len(), "Block height race failed");
                let err = ScannerError::BlockHeightUnavailable { rate_limited: any_rate_limit(&errors) };
                return self.report(sender, err).await;
            }
        };

        let last_scanned = *self
            .last_scanned
            .get_or_insert_with(|| height.saturating_sub(self.settings.initial_lookback_blocks));
        if height <= last_scanned {
            trace!(height = height, "No new blocks");
            return CycleOutcome::NoNewBlocks;
        }

        let (from, to) = (last_scanned + 1, height);
        let filter = self.filter.clone().from_block(from).to_block(to);
        let fetched = self.races.race(candidates.into_iter().map(|provider| {
            let filter = filter.clone();
            async move {
                let logs = provider.logs(&filter, RetryPolicy::POLL_LOGS).await?;
                Ok::<_, Error>((logs, provider))
            }
        }))
        .await;

        let (logs, winner) = match fetched {
            Ok(fetched) => fetched,
            Err(errors) => {
                error!(from = from, to = to, "Log range race failed");
                let err =
                    ScannerError::LogFetchFailed { from, to, rate_limited: any_rate_limit(&errors) };
                return self.report(sender, err).await;
            }
        };

        self.last_scanned = Some(to);
        debug!(from = from, to = to, logs = logs.len(), winner = %winner.url(), "Scanned range");

        let found = logs.len();
        for log in &logs {
            if !emit(&self.enricher, log, &winner, sender).await {
                return CycleOutcome::Closed;
            }
        }

        CycleOutcome::Scanned { from, to, found }
    }

    async fn report(
        &self,
        sender: &mpsc::Sender<MintStreamItem>,
        err: ScannerError,
    ) -> CycleOutcome {
        if sender.try_stream(err).await { CycleOutcome::Failed } else { CycleOutcome::Closed }
    }

    #[cfg(test)]
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    #[cfg(test)]
    pub(crate) fn last_scanned(&self) -> Option<u64> {
        self.last_scanned
    }
}

fn any_rate_limit(errors: &[Error]) -> bool {
    errors.iter().any(Error::is_rate_limit)
}
