//! Builders for scripted RPC responses.

use alloy::{
    consensus::{self, Signed, TxEnvelope, TxLegacy, transaction::Recovered},
    primitives::{Address, B256, Bytes, LogData, Signature, TxHash, TxKind, U256, keccak256},
    rpc::types::{Block, BlockTransactions, Header, Log, Transaction},
    sol_types::SolValue,
};

use crate::listener::TRANSFER_TOPIC;

/// Recipient of every fixture mint.
pub const MINTER: Address = Address::repeat_byte(0x11);

/// Deterministic transaction hash for the log at (`block`, `log_index`).
#[must_use]
pub fn tx_hash(block: u64, log_index: u64) -> TxHash {
    keccak256([block.to_be_bytes(), log_index.to_be_bytes()].concat())
}

/// A confirmed `Transfer(0x0, MINTER, token_id)` log emitted by `contract`.
#[must_use]
pub fn mint_log(contract: Address, token_id: u64, block: u64, log_index: u64) -> Log {
    let topics =
        vec![TRANSFER_TOPIC, B256::ZERO, MINTER.into_word(), B256::from(U256::from(token_id))];
    Log {
        inner: alloy::primitives::Log {
            address: contract,
            data: LogData::new_unchecked(topics, Bytes::new()),
        },
        block_hash: Some(B256::from(U256::from(block))),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(tx_hash(block, log_index)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

/// Like [`mint_log`] but with only the event signature and the two address topics, as an
/// ERC-20 mint would look.
#[must_use]
pub fn fungible_mint_log(contract: Address, block: u64, log_index: u64) -> Log {
    let mut log = mint_log(contract, 0, block, log_index);
    let topics = log.inner.data.topics()[..3].to_vec();
    log.inner.data = LogData::new_unchecked(topics, U256::from(1).to_be_bytes_vec().into());
    log
}

/// A mined legacy transaction paying `value` wei.
#[must_use]
pub fn transaction(hash: TxHash, block: u64, value: U256) -> Transaction {
    let tx = TxLegacy {
        chain_id: Some(1),
        gas_price: 1,
        gas_limit: 200_000,
        to: TxKind::Call(Address::repeat_byte(0xaa)),
        value,
        ..Default::default()
    };
    let signature = Signature::new(U256::from(1), U256::from(1), false);
    let envelope = TxEnvelope::Legacy(Signed::new_unchecked(tx, signature, hash));
    Transaction {
        inner: Recovered::new_unchecked(envelope, MINTER),
        block_hash: Some(B256::from(U256::from(block))),
        block_number: Some(block),
        transaction_index: Some(0),
        effective_gas_price: Some(1),
    }
}

/// A block header carrying `number` and `timestamp`, without transactions.
#[must_use]
pub fn block(number: u64, timestamp: u64) -> Block {
    let header = consensus::Header { number, timestamp, ..Default::default() };
    Block {
        header: Header::new(header),
        uncles: Vec::new(),
        transactions: BlockTransactions::Hashes(Vec::new()),
        withdrawals: None,
    }
}

/// `eth_call` return data for a `bool`.
#[must_use]
pub fn abi_bool(value: bool) -> Bytes {
    value.abi_encode().into()
}

/// `eth_call` return data for a `string`.
#[must_use]
pub fn abi_string(value: &str) -> Bytes {
    value.to_string().abi_encode().into()
}
