use alloy::{
    consensus::Transaction as _,
    network::Network,
    primitives::U256,
    rpc::types::Log,
};
use lru::LruCache;
use parking_lot::Mutex;

use crate::{
    MintRecord, ScannerError,
    robust_provider::{Error, FailureKind, RetryPolicy, RobustProvider},
};

/// Name recorded when a collection has no readable `name()`.
pub const UNNAMED_COLLECTION: &str = "Unnamed Collection";

/// Why a log produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The log carries no transaction hash or block number, or the node does not know the
    /// transaction yet.
    Unconfirmed,
    /// Fewer than four topics, so there is no indexed token id (e.g. an ERC-20 mint).
    MissingTokenId,
    TokenIdAboveMax,
    /// `supportsInterface` answered false or could not be decoded.
    NotErc721,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    Mint(MintRecord),
    Skipped(SkipReason),
}

/// Turns raw mint logs into [`MintRecord`]s.
///
/// Lookups go to the endpoint that delivered the log. Block timestamps are memoized in a bounded
/// LRU cache shared by every transport.
#[derive(Debug)]
pub struct LogEnricher {
    max_token_id: U256,
    timestamps: Mutex<LruCache<u64, u64>>,
}

impl LogEnricher {
    #[must_use]
    pub fn new(max_token_id: u64, cache_capacity: std::num::NonZeroUsize) -> Self {
        Self {
            max_token_id: U256::from(max_token_id),
            timestamps: Mutex::new(LruCache::new(cache_capacity)),
        }
    }

    /// A missing transaction means the node has not caught up yet and skips the log. A missing
    /// block during the timestamp lookup ([`Error::BlockNotFound`]) is surfaced as an error instead
    /// of a silent skip, so the consumer can tell a dropped mint from a filtered one.
    ///
    /// # Errors
    ///
    /// Returns [`ScannerError::Enrichment`] when a required lookup fails after retries. The error
    /// is informational; the log is simply not emitted.
    pub async fn process<N: Network>(
        &self,
        log: &Log,
        source: &RobustProvider<N>,
    ) -> Result<Enrichment, ScannerError> {
        let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number) else {
            return Ok(Enrichment::Skipped(SkipReason::Unconfirmed));
        };
        let wrap = |source_err: Error| ScannerError::Enrichment {
            tx_hash,
            endpoint: source.url().to_string(),
            source: source_err,
        };

        let Some(transaction) = source.transaction(tx_hash).await.map_err(wrap)? else {
            debug!(tx_hash = %tx_hash, "Transaction not found, skipping log");
            return Ok(Enrichment::Skipped(SkipReason::Unconfirmed));
        };

        let topics = log.topics();
        if topics.len() < 4 {
            return Ok(Enrichment::Skipped(SkipReason::MissingTokenId));
        }
        let token_id = U256::from_be_bytes(topics[3].0);
        if token_id > self.max_token_id {
            return Ok(Enrichment::Skipped(SkipReason::TokenIdAboveMax));
        }

        let value = transaction.value();
        let is_free = value.is_zero();

        let contract = log.address();
        match source.supports_erc721(contract, RetryPolicy::CONTRACT_PROBE).await {
            Ok(true) => {}
            Ok(false) => return Ok(Enrichment::Skipped(SkipReason::NotErc721)),
            Err(err) if err.kind() == FailureKind::CallException => {
                debug!(contract = %contract, error = %err, "supportsInterface unusable, skipping");
                return Ok(Enrichment::Skipped(SkipReason::NotErc721));
            }
            Err(err) => return Err(wrap(err)),
        }

        let timestamp = self.timestamp(log, block_number, source).await.map_err(wrap)?;

        let collection_name = match source.name(contract, RetryPolicy::CONTRACT_PROBE).await {
            Ok(name) if !name.trim().is_empty() => name,
            Ok(_) => UNNAMED_COLLECTION.to_string(),
            Err(err) => {
                debug!(contract = %contract, error = %err, "name() unavailable");
                UNNAMED_COLLECTION.to_string()
            }
        };

        Ok(Enrichment::Mint(MintRecord {
            tx_hash,
            log_index: log.log_index.unwrap_or_default(),
            contract_address: contract,
            token_id,
            block_number,
            timestamp,
            collection_name,
            is_free,
            value_wei: (!is_free).then_some(value),
        }))
    }

    async fn timestamp<N: Network>(
        &self,
        log: &Log,
        block_number: u64,
        source: &RobustProvider<N>,
    ) -> Result<u64, Error> {
        if let Some(cached) = self.timestamps.lock().get(&block_number) {
            return Ok(*cached);
        }
        let timestamp = match log.block_timestamp {
            Some(timestamp) => timestamp,
            None => source.block_timestamp(block_number).await?,
        };
        self.timestamps.lock().put(block_number, timestamp);
        Ok(timestamp)
    }

    #[must_use]
    pub fn cached_timestamps(&self) -> usize {
        self.timestamps.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        robust_provider::{HealthRegistry, RetryExecutor},
        test_utils::fixtures,
    };
    use alloy::{
        primitives::{Address, address},
        providers::{RootProvider, mock::Asserter},
        rpc::client::RpcClient,
    };
    use std::{num::NonZeroUsize, time::Duration};

    const URL: &str = "https://mock.rpc";
    const CONTRACT: Address = address!("0x00000000000000000000000000000000000000aa");

    fn source(asserter: &Asserter) -> RobustProvider {
        let registry = HealthRegistry::new(&[], &[URL.to_string()], Duration::from_secs(120));
        RobustProvider::new(
            URL,
            RootProvider::new(RpcClient::mocked(asserter.clone())),
            RetryExecutor::new(Duration::from_secs(5)).with_registry(registry),
        )
        .with_lookup_policy(RetryPolicy::fragile())
    }

    fn enricher() -> LogEnricher {
        LogEnricher::new(10_000, NonZeroUsize::new(2).unwrap())
    }

    #[tokio::test]
    async fn builds_a_paid_mint() {
        let asserter = Asserter::new();
        let log = fixtures::mint_log(CONTRACT, 7, 100, 0);
        asserter.push_success(&fixtures::transaction(fixtures::tx_hash(100, 0), 100, U256::from(5)));
        asserter.push_success(&fixtures::abi_bool(true));
        asserter.push_success(&fixtures::block(100, 1_700_000_000));
        asserter.push_success(&fixtures::abi_string("Cool Cats"));

        let enrichment = enricher().process(&log, &source(&asserter)).await.unwrap();

        let record = match enrichment {
            Enrichment::Mint(record) => record,
            skipped @ Enrichment::Skipped(_) => panic!("expected a mint, got {skipped:?}"),
        };
        assert_eq!(record.contract_address, CONTRACT);
        assert_eq!(record.token_id, U256::from(7));
        assert_eq!(record.block_number, 100);
        assert_eq!(record.timestamp, 1_700_000_000);
        assert_eq!(record.collection_name, "Cool Cats");
        assert!(!record.is_free);
        assert_eq!(record.value_wei, Some(U256::from(5)));
        assert_eq!(record.key(), (fixtures::tx_hash(100, 0), 0));
    }

    #[tokio::test]
    async fn free_mint_with_blank_name_gets_sentinel() {
        let asserter = Asserter::new();
        let log = fixtures::mint_log(CONTRACT, 1, 100, 0);
        asserter.push_success(&fixtures::transaction(fixtures::tx_hash(100, 0), 100, U256::ZERO));
        asserter.push_success(&fixtures::abi_bool(true));
        asserter.push_success(&fixtures::block(100, 1_700_000_000));
        asserter.push_success(&fixtures::abi_string("   "));

        let Enrichment::Mint(record) = enricher().process(&log, &source(&asserter)).await.unwrap()
        else {
            panic!("expected a mint");
        };
        assert!(record.is_free);
        assert_eq!(record.value_wei, None);
        assert_eq!(record.collection_name, UNNAMED_COLLECTION);
    }

    #[tokio::test]
    async fn token_id_above_max_is_dropped_silently() {
        let asserter = Asserter::new();
        let log = fixtures::mint_log(CONTRACT, 10_001, 100, 0);
        asserter.push_success(&fixtures::transaction(fixtures::tx_hash(100, 0), 100, U256::ZERO));

        let result = enricher().process(&log, &source(&asserter)).await.unwrap();
        assert_eq!(result, Enrichment::Skipped(SkipReason::TokenIdAboveMax));
    }

    #[tokio::test]
    async fn unknown_transaction_is_skipped() {
        let asserter = Asserter::new();
        asserter.push_success(&serde_json::Value::Null);

        let log = fixtures::mint_log(CONTRACT, 1, 100, 0);
        let result = enricher().process(&log, &source(&asserter)).await.unwrap();
        assert_eq!(result, Enrichment::Skipped(SkipReason::Unconfirmed));
    }

    #[tokio::test]
    async fn fungible_transfer_is_skipped() {
        let asserter = Asserter::new();
        let log = fixtures::fungible_mint_log(CONTRACT, 100, 0);
        asserter.push_success(&fixtures::transaction(fixtures::tx_hash(100, 0), 100, U256::ZERO));

        let result = enricher().process(&log, &source(&asserter)).await.unwrap();
        assert_eq!(result, Enrichment::Skipped(SkipReason::MissingTokenId));
    }

    #[tokio::test]
    async fn non_erc721_contract_is_skipped() {
        let asserter = Asserter::new();
        let log = fixtures::mint_log(CONTRACT, 1, 100, 0);
        asserter.push_success(&fixtures::transaction(fixtures::tx_hash(100, 0), 100, U256::ZERO));
        asserter.push_success(&fixtures::abi_bool(false));

        let result = enricher().process(&log, &source(&asserter)).await.unwrap();
        assert_eq!(result, Enrichment::Skipped(SkipReason::NotErc721));
    }

    #[tokio::test]
    async fn malformed_supports_interface_is_skipped() {
        let asserter = Asserter::new();
        let log = fixtures::mint_log(CONTRACT, 1, 100, 0);
        asserter.push_success(&fixtures::transaction(fixtures::tx_hash(100, 0), 100, U256::ZERO));
        asserter.push_success(&alloy::primitives::Bytes::new());

        let result = enricher().process(&log, &source(&asserter)).await.unwrap();
        assert_eq!(result, Enrichment::Skipped(SkipReason::NotErc721));
    }

    #[tokio::test]
    async fn lookup_failure_is_reported_with_context() {
        let asserter = Asserter::new();
        asserter.push_failure_msg("node is syncing");

        let log = fixtures::mint_log(CONTRACT, 1, 100, 3);
        let err = enricher().process(&log, &source(&asserter)).await.unwrap_err();

        let ScannerError::Enrichment { tx_hash, endpoint, .. } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(*tx_hash, fixtures::tx_hash(100, 3));
        assert_eq!(endpoint, URL);
        assert!(!err.is_rate_limit());
    }

    #[tokio::test]
    async fn missing_block_is_an_error_not_a_skip() {
        let asserter = Asserter::new();
        let log = fixtures::mint_log(CONTRACT, 1, 100, 0);
        asserter.push_success(&fixtures::transaction(fixtures::tx_hash(100, 0), 100, U256::ZERO));
        asserter.push_success(&fixtures::abi_bool(true));
        asserter.push_success(&serde_json::Value::Null);

        let enricher = enricher();
        let err = enricher.process(&log, &source(&asserter)).await.unwrap_err();

        assert!(
            matches!(&err, ScannerError::Enrichment { source: Error::BlockNotFound(_), .. }),
            "unexpected error {err:?}"
        );
        assert_eq!(enricher.cached_timestamps(), 0);
    }

    #[tokio::test]
    async fn timestamps_are_cached_per_block() {
        let asserter = Asserter::new();
        let enricher = enricher();
        let source = source(&asserter);

        for log_index in 0..2 {
            let log = fixtures::mint_log(CONTRACT, 1 + log_index, 100, log_index);
            let tx_hash = fixtures::tx_hash(100, log_index);
            asserter.push_success(&fixtures::transaction(tx_hash, 100, U256::ZERO));
            asserter.push_success(&fixtures::abi_bool(true));
            if log_index == 0 {
                asserter.push_success(&fixtures::block(100, 1_700_000_000));
            }
            asserter.push_success(&fixtures::abi_string("Cool Cats"));

            let Enrichment::Mint(record) = enricher.process(&log, &source).await.unwrap() else {
                panic!("expected a mint");
            };
            assert_eq!(record.timestamp, 1_700_000_000);
        }
        assert_eq!(enricher.cached_timestamps(), 1);
    }

    #[test]
    fn cache_evicts_least_recently_used_block() {
        let enricher = enricher();
        let mut cache = enricher.timestamps.lock();
        cache.put(1, 10);
        cache.put(2, 20);
        cache.put(3, 30);
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.len(), 2);
    }
}
