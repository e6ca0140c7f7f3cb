use std::sync::Arc;

use alloy::{
    eips::BlockId,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;
use tokio::time::error::Elapsed;

/// JSON-RPC error codes providers use to signal throttling.
const RATE_LIMIT_CODES: [i64; 2] = [429, -32005];
/// Generic server-side codes that usually mean the node itself is struggling.
const PROVIDER_FAULT_CODES: [i64; 2] = [-32000, -32603];
/// Code returned by geth-style nodes for a reverted `eth_call`.
const EXECUTION_REVERTED_CODE: i64 = 3;

const RATE_LIMIT_PHRASES: [&str; 3] = ["rate limit", "limit exceeded", "too many requests"];
const TIMEOUT_PHRASES: [&str; 2] = ["timeout", "timed out"];

/// Errors produced by a single endpoint call.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Operation timed out")]
    Timeout,
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),
    #[error("Call exception: {0}")]
    CallException(String),
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),
    #[error("No endpoints available")]
    NoEndpoints,
}

/// Coarse classification of a failed call, shared by retry and health bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimit,
    Timeout,
    Network,
    /// The endpoint answered, but the contract reverted or the ABI did not match.
    CallException,
    Unknown,
}

impl FailureKind {
    /// Rate limits, timeouts and transport faults are worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::RateLimit | FailureKind::Timeout | FailureKind::Network)
    }
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Timeout => FailureKind::Timeout,
            Error::RpcError(err) => classify_rpc_error(err),
            Error::CallException(message) => {
                if contains_any(message, &RATE_LIMIT_PHRASES) {
                    FailureKind::RateLimit
                } else {
                    FailureKind::CallException
                }
            }
            Error::BlockNotFound(_) | Error::InvalidEndpoint(_) | Error::NoEndpoints => {
                FailureKind::Unknown
            }
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        self.kind() == FailureKind::RateLimit
    }
}

fn contains_any(message: &str, phrases: &[&str]) -> bool {
    let message = message.to_ascii_lowercase();
    phrases.iter().any(|phrase| message.contains(phrase))
}

fn classify_rpc_error(err: &RpcError<TransportErrorKind>) -> FailureKind {
    match err {
        RpcError::ErrorResp(payload) => {
            let message = payload.message.as_ref();
            if RATE_LIMIT_CODES.contains(&payload.code) || contains_any(message, &RATE_LIMIT_PHRASES)
            {
                FailureKind::RateLimit
            } else if payload.code == EXECUTION_REVERTED_CODE || contains_any(message, &["revert"])
            {
                FailureKind::CallException
            } else if contains_any(message, &TIMEOUT_PHRASES) {
                FailureKind::Timeout
            } else if PROVIDER_FAULT_CODES.contains(&payload.code) {
                FailureKind::Network
            } else {
                FailureKind::Unknown
            }
        }
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            if http.status == 429 {
                FailureKind::RateLimit
            } else if http.status >= 500 {
                FailureKind::Network
            } else {
                FailureKind::Unknown
            }
        }
        RpcError::Transport(kind) => {
            let message = kind.to_string();
            if contains_any(&message, &RATE_LIMIT_PHRASES) {
                FailureKind::RateLimit
            } else if contains_any(&message, &TIMEOUT_PHRASES) {
                FailureKind::Timeout
            } else {
                FailureKind::Network
            }
        }
        RpcError::DeserError { text, .. } => {
            if contains_any(text, &RATE_LIMIT_PHRASES) {
                FailureKind::RateLimit
            } else {
                FailureKind::CallException
            }
        }
        RpcError::NullResp => FailureKind::Network,
        _ => FailureKind::Unknown,
    }
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<alloy::contract::Error> for Error {
    fn from(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(err) => Error::from(err),
            other => Error::CallException(other.to_string()),
        }
    }
}
