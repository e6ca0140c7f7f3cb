use std::fmt::{self, Debug};

use alloy::primitives::{Address, TxHash, U256};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::ScannerError;

#[derive(Debug, Clone, PartialEq)]
pub enum ScannerMessage<T: Clone> {
    Data(T),
    Notification(Notification),
}

/// Lifecycle signals interleaved with mint records.
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The initial transport selection finished, whichever transport won. Sent once per start.
    SetupComplete,
    /// A live subscription became the active transport.
    SubscriptionActive,
    /// Polling became the active transport.
    PollingActive,
}

impl<T: Clone> From<Notification> for ScannerMessage<T> {
    fn from(value: Notification) -> Self {
        ScannerMessage::Notification(value)
    }
}

impl<T: Clone> PartialEq<Notification> for ScannerMessage<T> {
    fn eq(&self, other: &Notification) -> bool {
        if let ScannerMessage::Notification(notification) = self {
            notification == other
        } else {
            false
        }
    }
}

/// Which transport currently feeds the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportState {
    Initializing,
    SubscriptionActive,
    PollingActive,
    Switching,
    Stopped,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            TransportState::Initializing => "initializing",
            TransportState::SubscriptionActive => "subscription-active",
            TransportState::PollingActive => "polling-active",
            TransportState::Switching => "switching",
            TransportState::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// One validated ERC-721 mint.
///
/// `(tx_hash, log_index)` identifies the record; consumers deduplicate on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRecord {
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub contract_address: Address,
    pub token_id: U256,
    pub block_number: u64,
    /// Block timestamp, seconds since the epoch.
    pub timestamp: u64,
    pub collection_name: String,
    pub is_free: bool,
    /// Native value paid, absent for free mints.
    pub value_wei: Option<U256>,
}

impl MintRecord {
    #[must_use]
    pub fn key(&self) -> (TxHash, u64) {
        (self.tx_hash, self.log_index)
    }
}

pub type ScannerResult<T> = Result<ScannerMessage<T>, ScannerError>;

/// Items yielded by [`crate::MintListener::start`].
pub type MintStreamItem = ScannerResult<MintRecord>;

pub trait IntoScannerResult<T: Clone> {
    fn into_scanner_message_result(self) -> ScannerResult<T>;
}

impl<T: Clone> IntoScannerResult<T> for ScannerResult<T> {
    fn into_scanner_message_result(self) -> ScannerResult<T> {
        self
    }
}

impl<T: Clone> IntoScannerResult<T> for ScannerMessage<T> {
    fn into_scanner_message_result(self) -> ScannerResult<T> {
        Ok(self)
    }
}

impl IntoScannerResult<MintRecord> for MintRecord {
    fn into_scanner_message_result(self) -> ScannerResult<MintRecord> {
        Ok(ScannerMessage::Data(self))
    }
}

impl<T: Clone> IntoScannerResult<T> for ScannerError {
    fn into_scanner_message_result(self) -> ScannerResult<T> {
        Err(self)
    }
}

impl<T: Clone> IntoScannerResult<T> for Notification {
    fn into_scanner_message_result(self) -> ScannerResult<T> {
        Ok(ScannerMessage::Notification(self))
    }
}

pub(crate) trait TryStream<T: Clone> {
    fn try_stream<M: IntoScannerResult<T> + Send>(
        &self,
        msg: M,
    ) -> impl Future<Output = bool> + Send;
}

impl<T: Clone + Debug + Send> TryStream<T> for mpsc::Sender<ScannerResult<T>> {
    async fn try_stream<M: IntoScannerResult<T> + Send>(&self, msg: M) -> bool {
        let item = msg.into_scanner_message_result();
        match &item {
            Ok(msg) => trace!(item = ?msg, "Sending message"),
            Err(err) => debug!(error = %err, rate_limited = err.is_rate_limit(), "Sending error"),
        }
        if let Err(err) = self.send(item).await {
            warn!(error = %err, "Downstream channel closed, stopping stream");
            return false;
        }
        true
    }
}
