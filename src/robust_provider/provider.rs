use std::sync::Arc;

use alloy::{
    consensus::BlockHeader,
    eips::BlockNumberOrTag,
    network::{BlockResponse, Ethereum, Network},
    primitives::{Address, FixedBytes, TxHash, U256, fixed_bytes},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    sol,
};

use crate::robust_provider::{Error, RetryExecutor, RetryPolicy};

/// ERC-165 interface id of ERC-721.
pub const ERC721_INTERFACE_ID: FixedBytes<4> = fixed_bytes!("80ac58cd");

sol! {
    #[sol(rpc)]
    interface IERC721Metadata {
        function supportsInterface(bytes4 interfaceId) external view returns (bool);
        function name() external view returns (string);
        function symbol() external view returns (string);
        function tokenURI(uint256 tokenId) external view returns (string);
    }
}

/// A provider bound to one endpoint.
///
/// Every call goes through the shared [`RetryExecutor`], so attempts are timed out, retried and
/// reported to the health registry under this endpoint's URL.
#[derive(Clone, Debug)]
pub struct RobustProvider<N: Network = Ethereum> {
    url: Arc<str>,
    provider: RootProvider<N>,
    executor: RetryExecutor,
    lookup_policy: RetryPolicy,
}

impl<N: Network> RobustProvider<N> {
    #[must_use]
    pub fn new(url: impl Into<Arc<str>>, provider: RootProvider<N>, executor: RetryExecutor) -> Self {
        Self { url: url.into(), provider, executor, lookup_policy: RetryPolicy::default() }
    }

    /// Sets the policy used for transaction and block lookups.
    #[must_use]
    pub fn with_lookup_policy(mut self, policy: RetryPolicy) -> Self {
        self.lookup_policy = policy;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn root(&self) -> &RootProvider<N> {
        &self.provider
    }

    /// Latest block number.
    ///
    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub async fn block_number(&self, policy: RetryPolicy) -> Result<u64, Error> {
        self.executor
            .execute(&self.url, "eth_blockNumber", policy, || async {
                self.provider.get_block_number().await.map_err(Error::from)
            })
            .await
    }

    /// Logs matching `filter`, in the order the node returned them.
    ///
    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub async fn logs(&self, filter: &Filter, policy: RetryPolicy) -> Result<Vec<Log>, Error> {
        self.executor
            .execute(&self.url, "eth_getLogs", policy, || async {
                self.provider.get_logs(filter).await.map_err(Error::from)
            })
            .await
    }

    /// The transaction with `hash`, or `None` if the node does not know it (yet).
    ///
    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub async fn transaction(&self, hash: TxHash) -> Result<Option<N::TransactionResponse>, Error> {
        self.executor
            .execute(&self.url, "eth_getTransactionByHash", self.lookup_policy, || async {
                self.provider.get_transaction_by_hash(hash).await.map_err(Error::from)
            })
            .await
    }

    /// Unix timestamp of block `number`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockNotFound`] when the node has no such block, otherwise see
    /// [`RetryExecutor::execute`].
    pub async fn block_timestamp(&self, number: u64) -> Result<u64, Error> {
        let tag = BlockNumberOrTag::Number(number);
        let block = self
            .executor
            .execute(&self.url, "eth_getBlockByNumber", self.lookup_policy, || async {
                self.provider.get_block_by_number(tag).await.map_err(Error::from)
            })
            .await?;
        block.map(|block| block.header().timestamp()).ok_or(Error::BlockNotFound(tag.into()))
    }

    /// Whether `contract` claims ERC-721 support through ERC-165.
    ///
    /// # Errors
    ///
    /// A contract without ERC-165 support usually surfaces as [`Error::CallException`].
    pub async fn supports_erc721(
        &self,
        contract: Address,
        policy: RetryPolicy,
    ) -> Result<bool, Error> {
        let instance = IERC721Metadata::new(contract, self.provider.clone());
        self.executor
            .execute(&self.url, "supportsInterface", policy, || async {
                instance.supportsInterface(ERC721_INTERFACE_ID).call().await.map_err(Error::from)
            })
            .await
    }

    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub async fn name(&self, contract: Address, policy: RetryPolicy) -> Result<String, Error> {
        let instance = IERC721Metadata::new(contract, self.provider.clone());
        self.executor
            .execute(&self.url, "name", policy, || async {
                instance.name().call().await.map_err(Error::from)
            })
            .await
    }

    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub async fn symbol(&self, contract: Address, policy: RetryPolicy) -> Result<String, Error> {
        let instance = IERC721Metadata::new(contract, self.provider.clone());
        self.executor
            .execute(&self.url, "symbol", policy, || async {
                instance.symbol().call().await.map_err(Error::from)
            })
            .await
    }

    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub async fn token_uri(
        &self,
        contract: Address,
        token_id: U256,
        policy: RetryPolicy,
    ) -> Result<String, Error> {
        let instance = IERC721Metadata::new(contract, self.provider.clone());
        self.executor
            .execute(&self.url, "tokenURI", policy, || async {
                instance.tokenURI(token_id).call().await.map_err(Error::from)
            })
            .await
    }
}
