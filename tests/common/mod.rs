#![allow(dead_code)]

use std::time::Duration;

use alloy::{
    network::Ethereum,
    primitives::{Address, U256, address},
    providers::mock::Asserter,
    rpc::types::Log,
};
use mint_scanner::{
    MintListener, MintListenerBuilder, MintStreamItem, Notification, ScannerMessage,
    test_utils::{MockConnector, fixtures},
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

pub const SUB_A: &str = "wss://sub-a.mock";
pub const SUB_B: &str = "wss://sub-b.mock";
pub const POLL_A: &str = "https://poll-a.mock";
pub const POLL_B: &str = "https://poll-b.mock";

pub const CONTRACT: Address = address!("0x00000000000000000000000000000000000000aa");

pub type MockListener = MintListener<Ethereum, MockConnector>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn build(builder: MintListenerBuilder, connector: &MockConnector) -> anyhow::Result<MockListener> {
    init_tracing();
    Ok(builder.build_with(connector.clone())?)
}

/// Scripts the four lookups that turn `log` into a mint named `name`.
pub fn push_enrichment(asserter: &Asserter, log: &Log, value: U256, name: &str) {
    let block = log.block_number.expect("fixture logs are mined");
    let hash = log.transaction_hash.expect("fixture logs are mined");
    asserter.push_success(&fixtures::transaction(hash, block, value));
    asserter.push_success(&fixtures::abi_bool(true));
    asserter.push_success(&fixtures::block(block, 1_700_000_000 + block));
    asserter.push_success(&fixtures::abi_string(name));
}

/// Reads items until `expected` shows up and returns everything read before it.
pub async fn skip_until(
    stream: &mut ReceiverStream<MintStreamItem>,
    expected: Notification,
    within: Duration,
) -> Vec<MintStreamItem> {
    let mut skipped = Vec::new();
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let item = tokio::time::timeout_at(deadline, stream.next())
            .await
            .unwrap_or_else(|_| panic!("no {expected:?} within {within:?}, saw {skipped:?}"));
        match item {
            Some(Ok(ScannerMessage::Notification(notification))) if notification == expected => {
                return skipped;
            }
            Some(item) => skipped.push(item),
            None => panic!("stream closed before {expected:?}, saw {skipped:?}"),
        }
    }
}
