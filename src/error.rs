use std::mem::discriminant;

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::{
    robust_provider::{Error as RobustProviderError, TransportKind},
    types::ScannerResult,
};

/// Errors surfaced by the listener and its builder.
///
/// Configuration errors are returned from [`crate::MintListenerBuilder::build`] and
/// [`crate::MintListener::start`] and are fatal. Everything else is delivered as an `Err` item on
/// the mint stream and is informational: the listener keeps running.
#[derive(Error, Debug, Clone)]
pub enum ScannerError {
    /// Neither subscription nor polling endpoints were configured.
    #[error("No RPC endpoints configured")]
    NoEndpointsConfigured,

    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Listener is already running")]
    AlreadyStarted,

    /// Every endpoint of this kind is cooling down or has failed.
    #[error("No healthy {0} endpoints available")]
    NoHealthyEndpoints(TransportKind),

    /// No race candidate produced the current block height this cycle.
    #[error("Failed to fetch the latest block from any polling endpoint")]
    BlockHeightUnavailable { rate_limited: bool },

    /// No race candidate produced logs for the range this cycle. The range is retried next cycle.
    #[error("Failed to fetch logs for blocks {from}..={to} from any polling endpoint")]
    LogFetchFailed { from: u64, to: u64, rate_limited: bool },

    /// The live subscription dropped or stopped answering liveness probes.
    #[error("Subscription to {url} was lost")]
    SubscriptionLost { url: String },

    /// A log could not be turned into a mint record.
    #[error("Failed to process log in tx {tx_hash} via {endpoint}: {source}")]
    Enrichment {
        tx_hash: TxHash,
        endpoint: String,
        #[source]
        source: RobustProviderError,
    },
}

impl ScannerError {
    /// Whether the error stems from endpoint throttling, which consumers should treat as transient.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        match self {
            ScannerError::BlockHeightUnavailable { rate_limited } |
            ScannerError::LogFetchFailed { rate_limited, .. } => *rate_limited,
            ScannerError::Enrichment { source, .. } => source.is_rate_limit(),
            _ => false,
        }
    }

    /// Fatal errors stop the listener from starting; all others are reported on the stream.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScannerError::NoEndpointsConfigured |
                ScannerError::InvalidEndpoint(_) |
                ScannerError::InvalidConfig(_) |
                ScannerError::AlreadyStarted
        )
    }
}

impl From<RobustProviderError> for ScannerError {
    fn from(error: RobustProviderError) -> ScannerError {
        match error {
            RobustProviderError::InvalidEndpoint(url) => ScannerError::InvalidEndpoint(url),
            RobustProviderError::NoEndpoints => ScannerError::NoEndpointsConfigured,
            other => ScannerError::InvalidConfig(other.to_string()),
        }
    }
}

impl<T: Clone> PartialEq<ScannerError> for ScannerResult<T> {
    fn eq(&self, other: &ScannerError) -> bool {
        match self {
            Ok(_) => false,
            Err(err) => discriminant(err) == discriminant(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_flag_follows_the_cause() {
        assert!(ScannerError::BlockHeightUnavailable { rate_limited: true }.is_rate_limit());
        assert!(!ScannerError::LogFetchFailed { from: 1, to: 2, rate_limited: false }.is_rate_limit());

        let throttled = ScannerError::Enrichment {
            tx_hash: TxHash::ZERO,
            endpoint: "https://rpc".into(),
            source: RobustProviderError::CallException("429 too many requests".into()),
        };
        assert!(throttled.is_rate_limit());
        assert!(!ScannerError::SubscriptionLost { url: "wss://a".into() }.is_rate_limit());
    }

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(ScannerError::NoEndpointsConfigured.is_fatal());
        assert!(!ScannerError::NoHealthyEndpoints(TransportKind::Polling).is_fatal());
    }
}
