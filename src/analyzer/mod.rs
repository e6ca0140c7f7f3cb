//! On-demand grading of a collection's metadata and identity.
//!
//! [`CollectionAnalyzer`] is independent of the listener's health registry: it walks the polling
//! endpoints round-robin, giving each a small retry budget before moving on to the next.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use alloy::{
    network::{Ethereum, Network},
    primitives::{Address, B256, U256, keccak256},
};
use serde::Serialize;
use serde_json::Value;

use crate::{
    ScannerConfig, ScannerError,
    robust_provider::{
        Connector, DefaultConnector, Error, RetryExecutor, RetryPolicy,
        RobustProvider,
    },
};

mod metadata;

pub use metadata::{
    DEFAULT_METADATA_RETRIES, DEFAULT_METADATA_RETRY_DELAY, MetadataFetch, MetadataFetcher,
    MetadataStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSymbolStatus {
    Ok,
    /// At least one of `name()` / `symbol()` is empty or whitespace.
    Blank,
    FetchError,
    NotFetched,
}

impl fmt::Display for NameSymbolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            NameSymbolStatus::Ok => "ok",
            NameSymbolStatus::Blank => "blank name or symbol",
            NameSymbolStatus::FetchError => "fetch error",
            NameSymbolStatus::NotFetched => "not fetched",
        };
        f.write_str(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FinalStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "Issues Detected")]
    IssuesDetected,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalStatus::Ok => f.write_str("OK"),
            FinalStatus::IssuesDetected => f.write_str("Issues Detected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionAnalysisResult {
    pub contract_address: Address,
    pub metadata_status: MetadataStatus,
    /// The metadata document of the representative token, when one was parsed.
    pub metadata: Option<Value>,
    pub name_symbol_status: NameSymbolStatus,
    pub collection_name: Option<String>,
    pub collection_symbol: Option<String>,
    pub final_status: FinalStatus,
    /// One line per check, metadata first.
    pub status_reasons: Vec<String>,
}

impl CollectionAnalysisResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.final_status == FinalStatus::Ok
    }
}

/// Identifies one analysis: the contract plus the set of token ids known when it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisCacheKey {
    pub contract: Address,
    pub token_set: B256,
}

impl fmt::Display for AnalysisCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.contract, self.token_set)
    }
}

/// Cache key for an analysis of `contract` given the token ids seen so far.
///
/// Order and duplicates in `token_ids` do not matter, so consumers can invalidate their cache
/// exactly when a new token id shows up.
#[must_use]
pub fn analysis_cache_key(contract: Address, token_ids: &[U256]) -> AnalysisCacheKey {
    let mut ids = token_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    let packed: Vec<u8> = ids.iter().flat_map(U256::to_be_bytes::<32>).collect();
    AnalysisCacheKey { contract, token_set: keccak256(packed) }
}

/// Grades collections using a rotating pool of request/response endpoints.
pub struct CollectionAnalyzer<N: Network = Ethereum> {
    endpoints: Vec<RobustProvider<N>>,
    cursor: AtomicUsize,
    policy: RetryPolicy,
    metadata: MetadataFetcher,
}

impl CollectionAnalyzer<Ethereum> {
    /// Builds an analyzer over the configured polling endpoints, reached over HTTP.
    ///
    /// # Errors
    ///
    /// [`ScannerError::NoEndpointsConfigured`] without polling endpoints, and
    /// [`ScannerError::InvalidEndpoint`] for an unparsable URL.
    pub fn from_config(config: &ScannerConfig) -> Result<Self, ScannerError> {
        Self::with_connector(config, &DefaultConnector)
    }
}

impl<N: Network> CollectionAnalyzer<N> {
    #[must_use]
    pub fn new(
        endpoints: Vec<RobustProvider<N>>,
        policy: RetryPolicy,
        metadata: MetadataFetcher,
    ) -> Self {
        Self { endpoints, cursor: AtomicUsize::new(0), policy, metadata }
    }

    /// Like [`CollectionAnalyzer::from_config`], opening connections through `connector`.
    ///
    /// # Errors
    ///
    /// See [`CollectionAnalyzer::from_config`].
    pub fn with_connector<C: Connector<N>>(
        config: &ScannerConfig,
        connector: &C,
    ) -> Result<Self, ScannerError> {
        if config.polling_urls.is_empty() {
            return Err(ScannerError::NoEndpointsConfigured);
        }
        if config.analyzer_attempts_per_endpoint == 0 {
            return Err(ScannerError::InvalidConfig(
                "analyzer attempts per endpoint must be greater than 0".into(),
            ));
        }

        // health is not tracked here, so no registry
        let executor = RetryExecutor::new(config.call_timeout);
        let endpoints = config
            .polling_urls
            .iter()
            .map(|url| {
                let root = connector.connect_polling(url)?;
                Ok(RobustProvider::new(url.as_str(), root, executor.clone()))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let metadata = MetadataFetcher::new(config.ipfs_gateway.clone(), config.metadata_timeout);
        Ok(Self::new(endpoints, config.analyzer_policy(), metadata))
    }

    /// Runs the metadata and identity checks for `contract`.
    ///
    /// Failures never abort the analysis; they downgrade the verdict instead. `token_ids` is
    /// informational here; pair it with [`analysis_cache_key`] to cache the result.
    pub async fn analyze(
        &self,
        contract: Address,
        token_ids: &[U256],
        representative: U256,
    ) -> CollectionAnalysisResult {
        debug!(
            contract = %contract,
            known_tokens = token_ids.len(),
            token_id = %representative,
            "Analyzing collection"
        );
        let mut reasons = Vec::with_capacity(2);

        let uri = self
            .rotate("tokenURI", |provider| async move {
                provider.token_uri(contract, representative, self.policy).await
            })
            .await;
        let fetch = match uri {
            Ok(uri) if !uri.trim().is_empty() => self.metadata.fetch(uri.trim()).await,
            Ok(_) => MetadataFetch { status: MetadataStatus::NoUriFound, document: None },
            Err(err) => {
                debug!(contract = %contract, error = %err, "No tokenURI");
                MetadataFetch { status: MetadataStatus::NoUriFound, document: None }
            }
        };
        reasons.push(match fetch.status {
            MetadataStatus::Ok => "Metadata: OK.".to_string(),
            MetadataStatus::NoUriFound => "Metadata: No tokenURI found.".to_string(),
            status => format!("Metadata: {status}."),
        });

        let name = self
            .rotate("name", |provider| async move { provider.name(contract, self.policy).await })
            .await;
        let symbol = self
            .rotate("symbol", |provider| async move {
                provider.symbol(contract, self.policy).await
            })
            .await;
        let name_symbol_status = match (&name, &symbol) {
            (Ok(name), Ok(symbol)) if !name.trim().is_empty() && !symbol.trim().is_empty() => {
                NameSymbolStatus::Ok
            }
            (Err(_), _) | (_, Err(_)) => NameSymbolStatus::FetchError,
            _ => NameSymbolStatus::Blank,
        };
        reasons.push(match name_symbol_status {
            NameSymbolStatus::Ok => "Name/Symbol: OK.".to_string(),
            status => format!("Name/Symbol: {status}."),
        });

        let final_status =
            if fetch.status == MetadataStatus::Ok && name_symbol_status == NameSymbolStatus::Ok {
                FinalStatus::Ok
            } else {
                FinalStatus::IssuesDetected
            };
        info!(
            contract = %contract,
            metadata = %fetch.status,
            name_symbol = %name_symbol_status,
            verdict = %final_status,
            "Collection analyzed"
        );

        CollectionAnalysisResult {
            contract_address: contract,
            metadata_status: fetch.status,
            metadata: fetch.document,
            name_symbol_status,
            collection_name: name.ok(),
            collection_symbol: symbol.ok(),
            final_status,
            status_reasons: reasons,
        }
    }

    /// Tries `call` on each endpoint at most once, starting from the last one that worked.
    ///
    /// Reverts rotate like any other failure: a lagging or misbehaving node can revert a call that
    /// succeeds elsewhere.
    async fn rotate<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, Error>
    where
        F: Fn(RobustProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let count = self.endpoints.len();
        let start = self.cursor.load(Ordering::Relaxed);
        let mut last_error = Error::NoEndpoints;

        for offset in 0..count {
            let index = (start + offset) % count;
            let endpoint = &self.endpoints[index];
            match call(endpoint.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let next = (index + 1) % count;
                    warn!(
                        operation = operation,
                        url = %endpoint.url(),
                        next = %self.endpoints[next].url(),
                        error = %err,
                        "Rotating analyzer endpoint"
                    );
                    self.cursor.store(next, Ordering::Relaxed);
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}
