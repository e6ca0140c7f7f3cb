//! Per-endpoint reputation tracking.
//!
//! Every endpoint starts at [`INITIAL_SCORE`] and moves within `[0, MAX_SCORE]` as calls succeed or
//! fail. An endpoint is put in cooldown when its score drops below [`MIN_HEALTHY_SCORE`], when it
//! fails [`MAX_CONSECUTIVE_FAILURES`] times in a row, or as soon as it rate-limits us. Cooldown is
//! lifted lazily by [`HealthRegistry::eligible`] once its deadline has passed. A subscription
//! endpoint whose live connection broke stays out until [`HealthRegistry::reset`].

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::robust_provider::FailureKind;

pub const INITIAL_SCORE: u32 = 100;
pub const MAX_SCORE: u32 = 150;
pub const MIN_HEALTHY_SCORE: u32 = 50;
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const SUCCESS_REWARD: u32 = 5;
pub const FAILURE_PENALTY: u32 = 10;
pub const SEVERE_FAILURE_PENALTY: u32 = 20;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Subscription,
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Subscription => f.write_str("subscription"),
            TransportKind::Polling => f.write_str("polling"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointStatus {
    Untested,
    Active,
    Cooldown,
    FailedSubscription,
}

/// Result of one attempt against an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

impl Outcome {
    pub(crate) fn of<T>(result: &Result<T, crate::robust_provider::Error>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(err) => Outcome::Failure(err.kind()),
        }
    }
}

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointHealth {
    pub url: String,
    pub kind: TransportKind,
    pub score: u32,
    pub status: EndpointStatus,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    #[serde(skip)]
    pub cooldown_until: Option<Instant>,
    pub is_current_subscription: bool,
}

impl EndpointHealth {
    fn new(url: String, kind: TransportKind) -> Self {
        Self {
            url,
            kind,
            score: INITIAL_SCORE,
            status: EndpointStatus::Untested,
            consecutive_failures: 0,
            total_failures: 0,
            cooldown_until: None,
            is_current_subscription: false,
        }
    }

    fn record_success(&mut self) {
        self.score = (self.score + SUCCESS_REWARD).min(MAX_SCORE);
        self.consecutive_failures = 0;
        if self.status == EndpointStatus::Untested {
            self.status = EndpointStatus::Active;
        }
    }

    fn record_failure(&mut self, kind: FailureKind, cooldown: Duration, now: Instant) {
        let severe = matches!(kind, FailureKind::RateLimit | FailureKind::Timeout);
        let penalty = if severe { SEVERE_FAILURE_PENALTY } else { FAILURE_PENALTY };
        self.score = self.score.saturating_sub(penalty);
        self.consecutive_failures += 1;
        self.total_failures += 1;

        if matches!(self.status, EndpointStatus::Cooldown | EndpointStatus::FailedSubscription) {
            return;
        }

        if self.score < MIN_HEALTHY_SCORE ||
            self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES ||
            kind == FailureKind::RateLimit
        {
            warn!(
                url = %self.url,
                score = self.score,
                consecutive_failures = self.consecutive_failures,
                "Endpoint entering cooldown"
            );
            self.status = EndpointStatus::Cooldown;
            self.cooldown_until = Some(now + cooldown);
        }
    }

    /// Reinstates the endpoint if its cooldown has run out.
    fn refresh(&mut self, now: Instant) {
        let cooling = self.status == EndpointStatus::Cooldown;
        if cooling && self.cooldown_until.is_some_and(|until| until <= now) {
            debug!(url = %self.url, "Endpoint cooldown expired, reinstating");
            self.status = EndpointStatus::Active;
            self.consecutive_failures = 0;
            self.cooldown_until = None;
        }
    }

    fn is_eligible(&self) -> bool {
        !matches!(self.status, EndpointStatus::Cooldown | EndpointStatus::FailedSubscription)
    }
}

#[derive(Debug)]
struct Registry {
    subscription: Vec<EndpointHealth>,
    polling: Vec<EndpointHealth>,
    cooldown: Duration,
}

impl Registry {
    fn endpoints_mut(&mut self, kind: TransportKind) -> &mut Vec<EndpointHealth> {
        match kind {
            TransportKind::Subscription => &mut self.subscription,
            TransportKind::Polling => &mut self.polling,
        }
    }

    fn find_mut(&mut self, url: &str) -> impl Iterator<Item = &mut EndpointHealth> {
        self.subscription.iter_mut().chain(self.polling.iter_mut()).filter(move |e| e.url == url)
    }
}

/// Shared, cheaply clonable health table for every configured endpoint.
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl HealthRegistry {
    #[must_use]
    pub fn new(subscription_urls: &[String], polling_urls: &[String], cooldown: Duration) -> Self {
        let track = |urls: &[String], kind| {
            let mut endpoints: Vec<EndpointHealth> = Vec::with_capacity(urls.len());
            for url in urls {
                if !endpoints.iter().any(|e| &e.url == url) {
                    endpoints.push(EndpointHealth::new(url.clone(), kind));
                }
            }
            endpoints
        };
        Self {
            inner: Arc::new(Mutex::new(Registry {
                subscription: track(subscription_urls, TransportKind::Subscription),
                polling: track(polling_urls, TransportKind::Polling),
                cooldown,
            })),
        }
    }

    /// URLs of the endpoints of `kind` that may be used right now, best score first.
    ///
    /// Endpoints whose cooldown has expired are reinstated as a side effect. Ties keep the
    /// configured order.
    #[must_use]
    pub fn eligible(&self, kind: TransportKind) -> Vec<String> {
        let now = Instant::now();
        let mut registry = self.inner.lock();
        let endpoints = registry.endpoints_mut(kind);
        for endpoint in endpoints.iter_mut() {
            endpoint.refresh(now);
        }
        let mut eligible: Vec<&EndpointHealth> =
            endpoints.iter().filter(|e| e.is_eligible()).collect();
        eligible.sort_by(|a, b| b.score.cmp(&a.score));
        eligible.into_iter().map(|e| e.url.clone()).collect()
    }

    pub fn report(&self, url: &str, outcome: Outcome) {
        let now = Instant::now();
        let mut registry = self.inner.lock();
        let cooldown = registry.cooldown;
        for endpoint in registry.find_mut(url) {
            match outcome {
                Outcome::Success => endpoint.record_success(),
                Outcome::Failure(kind) => endpoint.record_failure(kind, cooldown, now),
            }
            trace!(url = %url, score = endpoint.score, status = ?endpoint.status, "Health updated");
        }
    }

    /// Flags `url` as the live subscription, clearing the flag everywhere else.
    pub fn mark_current_subscription(&self, url: &str) {
        let mut registry = self.inner.lock();
        for endpoint in &mut registry.subscription {
            endpoint.is_current_subscription = endpoint.url == url;
            if endpoint.is_current_subscription && endpoint.status == EndpointStatus::Untested {
                endpoint.status = EndpointStatus::Active;
            }
        }
    }

    pub fn clear_current_subscription(&self) {
        let mut registry = self.inner.lock();
        for endpoint in &mut registry.subscription {
            endpoint.is_current_subscription = false;
        }
    }

    /// Excludes a subscription endpoint whose live connection broke. Only [`HealthRegistry::reset`]
    /// makes it eligible again.
    pub fn mark_failed_subscription(&self, url: &str) {
        let mut registry = self.inner.lock();
        for endpoint in registry.subscription.iter_mut().filter(|e| e.url == url) {
            endpoint.status = EndpointStatus::FailedSubscription;
            endpoint.is_current_subscription = false;
            endpoint.cooldown_until = None;
        }
    }

    /// Returns every endpoint to `untested`, keeping scores and counters.
    pub fn reset(&self) {
        let mut registry = self.inner.lock();
        let Registry { subscription, polling, .. } = &mut *registry;
        for endpoint in subscription.iter_mut().chain(polling.iter_mut()) {
            endpoint.status = EndpointStatus::Untested;
            endpoint.cooldown_until = None;
            endpoint.is_current_subscription = false;
        }
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<EndpointHealth> {
        let mut registry = self.inner.lock();
        registry.find_mut(url).next().map(|e| e.clone())
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<EndpointHealth> {
        let registry = self.inner.lock();
        registry.subscription.iter().chain(registry.polling.iter()).cloned().collect()
    }

    #[must_use]
    pub fn current_subscription(&self) -> Option<String> {
        let registry = self.inner.lock();
        registry.subscription.iter().find(|e| e.is_current_subscription).map(|e| e.url.clone())
    }
}
