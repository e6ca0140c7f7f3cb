//! Mint-Scanner listens for ERC-721 mints across a pool of unreliable public RPC endpoints.
//!
//! The main entry point is [`MintListener`], built via [`MintListenerBuilder`]. Starting it
//! returns a stream of [`MintStreamItem`]s: validated [`MintRecord`]s, non-fatal
//! [`ScannerError`]s and lifecycle [`Notification`]s.
//!
//! # Transports
//!
//! The listener prefers a live log subscription (WebSocket) and falls back to racing several
//! polling (HTTP) endpoints when none connects. While polling, subscriptions are retried on a
//! fixed interval; once one connects, polling stops. Only one transport delivers logs at a time.
//! Every endpoint carries a health score in a shared registry; throttled, slow or failing
//! endpoints are put into a cooldown and skipped until it expires.
//!
//! # Stream items
//!
//! * `Ok(ScannerMessage::Data(record))`: a new mint.
//! * `Err(error)`: an operational problem. Errors on the stream never stop the listener;
//!   [`ScannerError::is_rate_limit`] separates throttling from other faults.
//! * `Ok(ScannerMessage::Notification(_))`: [`Notification::SetupComplete`] once per start after
//!   the first transport was chosen, then a notification on every transport switch.
//!
//! # Ordering and duplicates
//!
//! Within one polling cycle mints arrive in chain order, and a polled block range is never
//! requested twice. Across a transport switch the same mint may be delivered twice; consumers
//! deduplicate on [`MintRecord::key`].
//!
//! # Collection analysis
//!
//! [`analyzer::CollectionAnalyzer`] grades a collection's metadata and name/symbol on demand. It
//! rotates across the polling endpoints on its own and leaves caching to the caller, see
//! [`analyzer::analysis_cache_key`].

#[macro_use]
mod logging;

pub mod analyzer;
pub mod config;
pub mod listener;
pub mod robust_provider;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
mod types;

pub use analyzer::{CollectionAnalysisResult, CollectionAnalyzer, analysis_cache_key};
pub use config::ScannerConfig;
pub use error::ScannerError;
pub use listener::{MintListener, MintListenerBuilder, mint_filter};
pub use types::{
    IntoScannerResult, MintRecord, MintStreamItem, Notification, ScannerMessage, ScannerResult,
    TransportState,
};
