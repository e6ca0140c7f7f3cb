//! Helpers for testing code built on this crate without a live chain.
//!
//! [`MockConnector`] hands out providers backed by alloy's mocked transport, so every RPC answer
//! is scripted through an [`Asserter`](alloy::providers::mock::Asserter). [`fixtures`] builds the
//! logs, transactions, blocks and ABI payloads those answers are made of.

pub mod fixtures;
pub(crate) mod macros;
mod mock;

pub use mock::MockConnector;
