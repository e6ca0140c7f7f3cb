use std::time::Duration;

use backon::Retryable;
use tokio::time::timeout;

use crate::robust_provider::{
    Error, HealthRegistry, JitteredBackoffBuilder, health::Outcome,
};

/// Default per-attempt timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20);
/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay between retries.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// How many times to retry a call, and how long to wait before the first retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Subscription liveness probe.
    pub const LIVENESS: RetryPolicy = RetryPolicy::new(1, Duration::from_millis(2000));
    /// Block height lookups while polling.
    pub const POLL_BLOCK_NUMBER: RetryPolicy = RetryPolicy::new(1, Duration::from_millis(1000));
    /// Log range fetches while polling.
    pub const POLL_LOGS: RetryPolicy = RetryPolicy::new(1, Duration::from_millis(3000));
    /// `supportsInterface` and `name` probes during enrichment.
    pub const CONTRACT_PROBE: RetryPolicy = RetryPolicy::new(1, Duration::from_millis(1000));

    #[must_use]
    pub const fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// A single attempt with no retries.
    #[must_use]
    pub const fn fragile() -> Self {
        Self::new(0, Duration::ZERO)
    }

    #[must_use]
    pub fn backoff(&self) -> JitteredBackoffBuilder {
        JitteredBackoffBuilder::new(self.base_delay, self.max_retries)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY)
    }
}

/// Runs endpoint calls with a per-attempt timeout and jittered exponential backoff.
///
/// Only rate limits, timeouts and transport faults are retried; anything else is returned straight
/// away. When a [`HealthRegistry`] is attached, the outcome of every attempt is reported against
/// the endpoint the call was made to.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    registry: Option<HealthRegistry>,
    call_timeout: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl RetryExecutor {
    #[must_use]
    pub fn new(call_timeout: Duration) -> Self {
        Self { registry: None, call_timeout }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: HealthRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Execute `operation` against `endpoint` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt once the retry budget is spent, or the first
    /// non-retryable error. [`Error::is_rate_limit`] tells callers whether throttling was the
    /// cause.
    pub async fn execute<T, F, Fut>(
        &self,
        endpoint: &str,
        operation: &'static str,
        policy: RetryPolicy,
        mut call: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let call_timeout = self.call_timeout;
        let registry = self.registry.as_ref();

        let result = (|| {
            let attempt = call();
            async move {
                let result = match timeout(call_timeout, attempt).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(elapsed.into()),
                };
                if let Some(registry) = registry {
                    registry.report(endpoint, Outcome::of(&result));
                }
                result
            }
        })
        .retry(policy.backoff())
        .when(Error::is_retryable)
        .notify(|err: &Error, delay: Duration| {
            warn!(
                url = %endpoint,
                operation = operation,
                rate_limited = err.is_rate_limit(),
                error = %err,
                "Call failed, retrying after {:?}", delay
            );
        })
        .sleep(tokio::time::sleep)
        .await;

        if let Err(err) = &result {
            debug!(url = %endpoint, operation = operation, error = %err, "Call gave up");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robust_provider::{EndpointStatus, FailureKind, TransportKind};
    use alloy::transports::{RpcError, TransportErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const URL: &str = "https://rpc.test";

    fn registry() -> HealthRegistry {
        HealthRegistry::new(&[], &[URL.to_string()], Duration::from_secs(120))
    }

    fn network_error() -> Error {
        RpcError::Transport(TransportErrorKind::BackendGone).into()
    }

    fn rate_limited() -> Error {
        TransportErrorKind::custom_str("429 Too Many Requests").into()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt() {
        let executor = RetryExecutor::default().with_registry(registry());
        let calls = AtomicUsize::new(0);

        let result = executor
            .execute(URL, "test", RetryPolicy::default(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(7)
            })
            .await;

        assert!(matches!(result, Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_network_errors_until_success() {
        let registry = registry();
        let executor = RetryExecutor::default().with_registry(registry.clone());
        let calls = AtomicUsize::new(0);

        let result = executor
            .execute(URL, "test", RetryPolicy::default(), || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(network_error()),
                    n => Ok(n),
                }
            })
            .await;

        assert!(matches!(result, Ok(2)));
        let health = registry.get(URL).unwrap();
        assert_eq!(health.total_failures, 2);
        assert_eq!(health.consecutive_failures, 0);
        assert_eq!(health.status, EndpointStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_and_keeps_last_error() {
        let executor = RetryExecutor::default();
        let calls = AtomicUsize::new(0);

        let result: Result<(), Error> = executor
            .execute(URL, "test", RetryPolicy::new(2, Duration::from_millis(10)), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_abort_immediately() {
        let executor = RetryExecutor::default();
        let calls = AtomicUsize::new(0);

        let result: Result<(), Error> = executor
            .execute(URL, "test", RetryPolicy::default(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::CallException("execution reverted".into()))
            })
            .await;

        assert!(matches!(result, Err(Error::CallException(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_carries_its_own_timeout() {
        let registry = registry();
        let executor =
            RetryExecutor::new(Duration::from_millis(50)).with_registry(registry.clone());
        let calls = AtomicUsize::new(0);

        let result = executor
            .execute(URL, "test", RetryPolicy::new(1, Duration::from_millis(10)), || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok::<_, Error>("late")
            })
            .await;

        assert!(matches!(result, Ok("late")));
        assert_eq!(registry.get(URL).unwrap().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_attempt_puts_endpoint_in_cooldown() {
        let registry = registry();
        let executor = RetryExecutor::default().with_registry(registry.clone());

        let _ = executor
            .execute(URL, "test", RetryPolicy::fragile(), || async {
                Err::<(), _>(rate_limited())
            })
            .await;

        assert_eq!(registry.get(URL).unwrap().status, EndpointStatus::Cooldown);
        assert!(registry.eligible(TransportKind::Polling).is_empty());
        assert_eq!(rate_limited().kind(), FailureKind::RateLimit);
    }
}
