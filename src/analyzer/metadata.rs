use std::{fmt, time::Duration};

use backon::Retryable;
use serde::Serialize;
use serde_json::Value;

use crate::{
    config::{DEFAULT_IPFS_GATEWAY, DEFAULT_METADATA_TIMEOUT},
    robust_provider::JitteredBackoffBuilder,
};

const IPFS_SCHEME: &str = "ipfs://";

pub const DEFAULT_METADATA_RETRIES: usize = 2;
pub const DEFAULT_METADATA_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Verdict on a collection's token metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataStatus {
    Ok,
    /// The server answered with a non-2xx status or never answered in time.
    BrokenUri,
    /// The document is JSON but not an object carrying `name`, `image` or `description`.
    InvalidJson,
    /// The request failed outright or the body was not JSON.
    FetchError,
    NotFetched,
    /// `tokenURI` reverted, failed on every endpoint or returned an empty string.
    NoUriFound,
}

impl fmt::Display for MetadataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            MetadataStatus::Ok => "ok",
            MetadataStatus::BrokenUri => "broken uri",
            MetadataStatus::InvalidJson => "invalid json",
            MetadataStatus::FetchError => "fetch error",
            MetadataStatus::NotFetched => "not fetched",
            MetadataStatus::NoUriFound => "no uri found",
        };
        f.write_str(status)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFetch {
    pub status: MetadataStatus,
    /// The parsed document whenever it was a JSON object, even a poor one.
    pub document: Option<Value>,
}

impl MetadataFetch {
    fn failed(status: MetadataStatus) -> Self {
        Self { status, document: None }
    }
}

/// Downloads token metadata over HTTP, rewriting `ipfs://` URIs onto a gateway.
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    client: reqwest::Client,
    gateway: String,
    timeout: Duration,
    retries: usize,
    retry_delay: Duration,
}

impl Default for MetadataFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_IPFS_GATEWAY, DEFAULT_METADATA_TIMEOUT)
    }
}

impl MetadataFetcher {
    #[must_use]
    pub fn new(gateway: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway: gateway.into(),
            timeout,
            retries: DEFAULT_METADATA_RETRIES,
            retry_delay: DEFAULT_METADATA_RETRY_DELAY,
        }
    }

    /// Retry budget for timeouts and connection failures.
    #[must_use]
    pub fn with_retry(mut self, retries: usize, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    /// The HTTP location for `uri`.
    #[must_use]
    pub fn resolve(&self, uri: &str) -> String {
        match uri.strip_prefix(IPFS_SCHEME) {
            Some(path) => format!("{}{path}", self.gateway),
            None => uri.to_string(),
        }
    }

    pub async fn fetch(&self, uri: &str) -> MetadataFetch {
        let url = self.resolve(uri);

        let response = (|| async {
            self.client.get(&url).timeout(self.timeout).send().await?.error_for_status()
        })
        .retry(JitteredBackoffBuilder::new(self.retry_delay, self.retries))
        .when(|err: &reqwest::Error| err.is_timeout() || err.is_connect())
        .notify(|err: &reqwest::Error, delay: Duration| {
            warn!(url = %url, error = %err, "Metadata fetch failed, retrying after {:?}", delay);
        })
        .sleep(tokio::time::sleep)
        .await;

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_status() => {
                debug!(url = %url, error = %err, "Metadata URI is broken");
                return MetadataFetch::failed(MetadataStatus::BrokenUri);
            }
            Err(err) => {
                debug!(url = %url, error = %err, "Metadata fetch failed");
                return MetadataFetch::failed(MetadataStatus::FetchError);
            }
        };

        let document = match response.json::<Value>().await {
            Ok(document) => document,
            Err(err) if err.is_timeout() => return MetadataFetch::failed(MetadataStatus::BrokenUri),
            Err(err) => {
                debug!(url = %url, error = %err, "Metadata is not JSON");
                return MetadataFetch::failed(MetadataStatus::FetchError);
            }
        };

        let Value::Object(fields) = &document else {
            return MetadataFetch::failed(MetadataStatus::InvalidJson);
        };
        let descriptive = ["name", "image", "description"]
            .into_iter()
            .any(|key| fields.get(key).is_some_and(is_truthy));
        let status = if descriptive { MetadataStatus::Ok } else { MetadataStatus::InvalidJson };
        MetadataFetch { status, document: Some(document) }
    }
}

/// Empty strings, zero, `false` and `null` do not count as a present field.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
