use alloy::{
    primitives::{Address, B256},
    rpc::types::Filter,
    sol,
    sol_types::SolEvent,
};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
}

/// `Transfer(address,address,uint256)` signature hash.
pub const TRANSFER_TOPIC: B256 = Transfer::SIGNATURE_HASH;

/// Selects ERC-721 transfers out of the zero address, i.e. mints, from any contract.
#[must_use]
pub fn mint_filter() -> Filter {
    Filter::new().event_signature(TRANSFER_TOPIC).topic1(Address::ZERO.into_word())
}
