//! Listener configuration.
//!
//! A [`ScannerConfig`] can be built in code, deserialized from TOML, or both: every field has a
//! default, so a file only needs to list what it changes. Durations are written in milliseconds
//! under `*_ms` keys.
//!
//! ```toml
//! subscription_urls = ["wss://ethereum-rpc.publicnode.com"]
//! polling_urls = ["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"]
//! max_token_id = 10000
//! default_poll_interval_ms = 10000
//! cooldown_ms = 120000
//! ```

use std::{env, num::NonZeroUsize, path::Path, time::Duration};

use serde::{Deserialize, Deserializer};

use crate::{
    ScannerError,
    robust_provider::{DEFAULT_BASE_DELAY, DEFAULT_CALL_TIMEOUT, DEFAULT_COOLDOWN, RetryPolicy},
};

pub const DEFAULT_MAX_TOKEN_ID: u64 = 10_000;
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10_000);
pub const DEFAULT_INITIAL_POLL_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_INITIAL_LOOKBACK_BLOCKS: u64 = 5;
pub const DEFAULT_RACE_CANDIDATES: usize = 3;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMESTAMP_CACHE_SIZE: usize = 1_000;
pub const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 256;
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(7);
pub const DEFAULT_ANALYZER_ATTEMPTS_PER_ENDPOINT: usize = 2;
pub const DEFAULT_ANALYZER_BASE_DELAY: Duration = Duration::from_millis(500);

const ENV_SUBSCRIPTION_URLS: &str = "MINT_SCANNER_SUBSCRIPTION_URLS";
const ENV_POLLING_URLS: &str = "MINT_SCANNER_POLLING_URLS";
const ENV_MAX_TOKEN_ID: &str = "MINT_SCANNER_MAX_TOKEN_ID";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScannerConfig {
    /// Push-style (WebSocket) endpoints.
    pub subscription_urls: Vec<String>,
    /// Pull-style (HTTP) endpoints. Also used by the collection analyzer.
    pub polling_urls: Vec<String>,
    /// Mints of token ids above this are ignored.
    pub max_token_id: u64,
    /// Retries for transaction and block lookups.
    pub retry_attempts: usize,
    #[serde(rename = "retry_delay_ms", deserialize_with = "millis")]
    pub retry_delay: Duration,
    #[serde(rename = "call_timeout_ms", deserialize_with = "millis")]
    pub call_timeout: Duration,
    #[serde(rename = "min_poll_interval_ms", deserialize_with = "millis")]
    pub min_poll_interval: Duration,
    #[serde(rename = "max_poll_interval_ms", deserialize_with = "millis")]
    pub max_poll_interval: Duration,
    #[serde(rename = "default_poll_interval_ms", deserialize_with = "millis")]
    pub default_poll_interval: Duration,
    #[serde(rename = "initial_poll_delay_ms", deserialize_with = "millis")]
    pub initial_poll_delay: Duration,
    /// How far behind the tip the first polling cycle starts.
    pub initial_lookback_blocks: u64,
    pub race_candidates: usize,
    #[serde(rename = "cooldown_ms", deserialize_with = "millis")]
    pub cooldown: Duration,
    /// How often to retry subscriptions while polling.
    #[serde(rename = "reconnect_interval_ms", deserialize_with = "millis")]
    pub reconnect_interval: Duration,
    /// How often the live subscription is probed.
    #[serde(rename = "liveness_interval_ms", deserialize_with = "millis")]
    pub liveness_interval: Duration,
    pub timestamp_cache_size: usize,
    pub stream_buffer_capacity: usize,
    pub ipfs_gateway: String,
    #[serde(rename = "metadata_timeout_ms", deserialize_with = "millis")]
    pub metadata_timeout: Duration,
    pub analyzer_attempts_per_endpoint: usize,
    #[serde(rename = "analyzer_base_delay_ms", deserialize_with = "millis")]
    pub analyzer_base_delay: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            subscription_urls: Vec::new(),
            polling_urls: Vec::new(),
            max_token_id: DEFAULT_MAX_TOKEN_ID,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_BASE_DELAY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            default_poll_interval: DEFAULT_POLL_INTERVAL,
            initial_poll_delay: DEFAULT_INITIAL_POLL_DELAY,
            initial_lookback_blocks: DEFAULT_INITIAL_LOOKBACK_BLOCKS,
            race_candidates: DEFAULT_RACE_CANDIDATES,
            cooldown: DEFAULT_COOLDOWN,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            timestamp_cache_size: DEFAULT_TIMESTAMP_CACHE_SIZE,
            stream_buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            analyzer_attempts_per_endpoint: DEFAULT_ANALYZER_ATTEMPTS_PER_ENDPOINT,
            analyzer_base_delay: DEFAULT_ANALYZER_BASE_DELAY,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn split_urls(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|url| !url.is_empty()).map(String::from).collect()
}

impl ScannerConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ScannerError::InvalidConfig`] on malformed TOML or unknown keys.
    pub fn from_toml_str(source: &str) -> Result<Self, ScannerError> {
        toml::from_str(source).map_err(|err| ScannerError::InvalidConfig(err.to_string()))
    }

    /// Reads a TOML file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ScannerError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScannerError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            ScannerError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Overrides endpoint lists and the token id ceiling from `MINT_SCANNER_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`ScannerError::InvalidConfig`] if `MINT_SCANNER_MAX_TOKEN_ID` is not a number.
    pub fn apply_env_overrides(&mut self) -> Result<(), ScannerError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ScannerError> {
        if let Some(urls) = lookup(ENV_SUBSCRIPTION_URLS) {
            self.subscription_urls = split_urls(&urls);
        }
        if let Some(urls) = lookup(ENV_POLLING_URLS) {
            self.polling_urls = split_urls(&urls);
        }
        if let Some(max) = lookup(ENV_MAX_TOKEN_ID) {
            self.max_token_id = max.trim().parse().map_err(|_| {
                ScannerError::InvalidConfig(format!("{ENV_MAX_TOKEN_ID} must be an integer"))
            })?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ScannerError::NoEndpointsConfigured`] when both endpoint lists are empty, and
    /// [`ScannerError::InvalidConfig`] for inconsistent tunables.
    pub fn validate(&self) -> Result<(), ScannerError> {
        if self.subscription_urls.is_empty() && self.polling_urls.is_empty() {
            return Err(ScannerError::NoEndpointsConfigured);
        }
        if self.min_poll_interval.is_zero() || self.min_poll_interval > self.max_poll_interval {
            return Err(ScannerError::InvalidConfig(
                "poll interval bounds must satisfy 0 < min <= max".into(),
            ));
        }
        if self.default_poll_interval < self.min_poll_interval ||
            self.default_poll_interval > self.max_poll_interval
        {
            return Err(ScannerError::InvalidConfig(
                "default poll interval must lie within the poll interval bounds".into(),
            ));
        }
        if self.race_candidates == 0 {
            return Err(ScannerError::InvalidConfig("race candidates must be greater than 0".into()));
        }
        if self.timestamp_cache_size == 0 {
            return Err(ScannerError::InvalidConfig(
                "timestamp cache size must be greater than 0".into(),
            ));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ScannerError::InvalidConfig(
                "stream buffer capacity must be greater than 0".into(),
            ));
        }
        if self.analyzer_attempts_per_endpoint == 0 {
            return Err(ScannerError::InvalidConfig(
                "analyzer attempts per endpoint must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Policy for transaction and block lookups.
    #[must_use]
    pub fn lookup_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_delay)
    }

    /// Policy applied per endpoint by the collection analyzer.
    #[must_use]
    pub fn analyzer_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.analyzer_attempts_per_endpoint.saturating_sub(1), self.analyzer_base_delay)
    }

    #[must_use]
    pub fn timestamp_cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.timestamp_cache_size).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(ScannerConfig::from_toml_str("").unwrap(), ScannerConfig::default());
    }

    #[test]
    fn millisecond_keys_are_parsed() {
        let config = ScannerConfig::from_toml_str(
            r#"
            polling_urls = ["https://a", "https://b"]
            max_token_id = 500
            default_poll_interval_ms = 12000
            cooldown_ms = 60000
            "#,
        )
        .unwrap();

        assert_eq!(config.polling_urls, vec!["https://a", "https://b"]);
        assert_eq!(config.max_token_id, 500);
        assert_eq!(config.default_poll_interval, Duration::from_secs(12));
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert_eq!(config.race_candidates, DEFAULT_RACE_CANDIDATES);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ScannerConfig::from_toml_str("poll_every = 3").unwrap_err();
        assert!(matches!(err, ScannerError::InvalidConfig(_)));
    }

    #[test]
    fn no_endpoints_is_fatal() {
        let err = ScannerConfig::default().validate().unwrap_err();
        assert!(matches!(err, ScannerError::NoEndpointsConfigured));
        assert!(err.is_fatal());
    }

    #[test]
    fn inconsistent_intervals_are_rejected() {
        let config = ScannerConfig {
            polling_urls: vec!["https://a".into()],
            default_poll_interval: Duration::from_secs(60),
            ..ScannerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ScannerError::InvalidConfig(_))));
    }

    fn overrides(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_replace_endpoints_and_ceiling() {
        let mut config = ScannerConfig {
            subscription_urls: vec!["wss://file".into()],
            polling_urls: vec!["https://file".into()],
            ..ScannerConfig::default()
        };
        config
            .apply_overrides(overrides(&[
                ("MINT_SCANNER_SUBSCRIPTION_URLS", "wss://env-a, wss://env-b"),
                ("MINT_SCANNER_POLLING_URLS", "https://env"),
                ("MINT_SCANNER_MAX_TOKEN_ID", " 500 "),
            ]))
            .unwrap();

        assert_eq!(config.subscription_urls, vec!["wss://env-a", "wss://env-b"]);
        assert_eq!(config.polling_urls, vec!["https://env"]);
        assert_eq!(config.max_token_id, 500);
    }

    #[test]
    fn unset_env_keeps_file_values() {
        let mut config =
            ScannerConfig { polling_urls: vec!["https://file".into()], ..ScannerConfig::default() };
        config
            .apply_overrides(overrides(&[("MINT_SCANNER_SUBSCRIPTION_URLS", "wss://env")]))
            .unwrap();

        assert_eq!(config.subscription_urls, vec!["wss://env"]);
        assert_eq!(config.polling_urls, vec!["https://file"]);
        assert_eq!(config.max_token_id, DEFAULT_MAX_TOKEN_ID);
    }

    #[test]
    fn blank_env_list_clears_endpoints() {
        let mut config =
            ScannerConfig { polling_urls: vec!["https://file".into()], ..ScannerConfig::default() };
        config.apply_overrides(overrides(&[("MINT_SCANNER_POLLING_URLS", " , ")])).unwrap();

        assert!(config.polling_urls.is_empty());
        assert!(matches!(config.validate(), Err(ScannerError::NoEndpointsConfigured)));
    }

    #[test]
    fn non_numeric_token_ceiling_is_rejected() {
        let mut config = ScannerConfig::default();
        let err = config
            .apply_overrides(overrides(&[("MINT_SCANNER_MAX_TOKEN_ID", "lots")]))
            .unwrap_err();

        let ScannerError::InvalidConfig(msg) = &err else { panic!("unexpected error {err:?}") };
        assert!(msg.contains("MINT_SCANNER_MAX_TOKEN_ID"));
        assert_eq!(config.max_token_id, DEFAULT_MAX_TOKEN_ID);
    }

    #[test]
    fn url_lists_split_on_commas() {
        assert_eq!(split_urls(" wss://a, ,wss://b "), vec!["wss://a", "wss://b"]);
    }

    #[test]
    fn analyzer_policy_counts_attempts() {
        let policy = ScannerConfig::default().analyzer_policy();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
