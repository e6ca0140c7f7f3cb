use std::pin::Pin;

use alloy::{
    network::{Ethereum, Network},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
};
use tokio_stream::Stream;

use crate::robust_provider::Error;

/// Stream of logs pushed by a live subscription. It ends when the connection drops.
pub type LogStream = Pin<Box<dyn Stream<Item = Log> + Send>>;

/// Turns configured endpoint URLs into providers.
///
/// [`DefaultConnector`] talks HTTP to polling endpoints and WebSocket to subscription endpoints.
/// Other implementations can route through custom transports.
pub trait Connector<N: Network = Ethereum>: Send + Sync + 'static {
    /// Builds a request/response provider for a polling endpoint.
    fn connect_polling(&self, url: &str) -> Result<RootProvider<N>, Error>;

    /// Opens a persistent connection to a subscription endpoint.
    fn connect_subscription(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<RootProvider<N>, Error>> + Send;

    /// Subscribes to logs matching `filter` over an open subscription connection.
    fn subscribe_logs(
        &self,
        url: &str,
        provider: &RootProvider<N>,
        filter: &Filter,
    ) -> impl Future<Output = Result<LogStream, Error>> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

impl<N: Network> Connector<N> for DefaultConnector {
    fn connect_polling(&self, url: &str) -> Result<RootProvider<N>, Error> {
        let parsed = url.parse().map_err(|_| Error::InvalidEndpoint(url.to_string()))?;
        Ok(RootProvider::new_http(parsed))
    }

    async fn connect_subscription(&self, url: &str) -> Result<RootProvider<N>, Error> {
        debug!(url = %url, "Opening subscription connection");
        RootProvider::connect(url).await.map_err(Error::from)
    }

    async fn subscribe_logs(
        &self,
        url: &str,
        provider: &RootProvider<N>,
        filter: &Filter,
    ) -> Result<LogStream, Error> {
        let subscription = provider.subscribe_logs(filter).await?;
        debug!(url = %url, "Subscribed to logs");
        Ok(Box::pin(subscription.into_stream()))
    }
}
