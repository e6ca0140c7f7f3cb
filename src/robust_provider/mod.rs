//! Everything that talks to RPC endpoints.
//!
//! * [`RetryExecutor`] wraps each call in a per-attempt timeout and jittered exponential backoff,
//!   retrying only rate limits, timeouts and transport faults.
//! * [`HealthRegistry`] keeps a bounded score, status and failure counters per endpoint and decides
//!   which endpoints are eligible for the next connection attempt or race.
//! * [`RaceScope`] issues the same request to several endpoints and adopts the first success. The
//!   losers finish in the background and report their health until the scope is shut down.
//! * [`RobustProvider`] binds one endpoint URL to its provider and the shared executor.
//! * [`SubscriptionManager`] keeps at most one live log subscription open.
//! * [`Connector`] is the seam that turns URLs into providers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use alloy::providers::RootProvider;
//! use mint_scanner::robust_provider::{
//!     HealthRegistry, RetryExecutor, RetryPolicy, RobustProvider, TransportKind,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let urls = vec!["https://eth.llamarpc.com".to_string()];
//! let registry = HealthRegistry::new(&[], &urls, Duration::from_secs(120));
//! let executor = RetryExecutor::new(Duration::from_secs(20)).with_registry(registry.clone());
//!
//! for url in registry.eligible(TransportKind::Polling) {
//!     let root: RootProvider = RootProvider::new_http(url.parse()?);
//!     let provider = RobustProvider::new(url.as_str(), root, executor.clone());
//!     let height = provider.block_number(RetryPolicy::POLL_BLOCK_NUMBER).await?;
//!     println!("{url} is at block {height}");
//! }
//! # Ok(()) }
//! ```

mod backoff;
mod connector;
mod error;
mod health;
mod provider;
mod race;
mod retry;
mod subscription;

pub use backoff::{JitteredBackoff, JitteredBackoffBuilder};
pub use connector::{Connector, DefaultConnector, LogStream};
pub use error::{Error, FailureKind};
pub use health::{
    DEFAULT_COOLDOWN, EndpointHealth, EndpointStatus, HealthRegistry, INITIAL_SCORE,
    MAX_CONSECUTIVE_FAILURES, MAX_SCORE, MIN_HEALTHY_SCORE, Outcome, TransportKind,
};
pub use provider::{ERC721_INTERFACE_ID, IERC721Metadata, RobustProvider};
pub use race::RaceScope;
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, RetryExecutor, RetryPolicy,
};
pub use subscription::{LiveSubscription, SubscriptionManager};
