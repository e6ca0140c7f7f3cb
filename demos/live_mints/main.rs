//! Streams mints from public endpoints and analyzes each collection the first time it mints.
//!
//! Pass a TOML config path as the first argument, or set `MINT_SCANNER_SUBSCRIPTION_URLS` and
//! `MINT_SCANNER_POLLING_URLS` (comma separated).

use std::collections::HashSet;

use mint_scanner::{CollectionAnalyzer, MintListenerBuilder, ScannerConfig, ScannerMessage};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

    let config = match std::env::args().nth(1) {
        Some(path) => ScannerConfig::load(path)?,
        None => {
            let mut config = ScannerConfig::default();
            config.apply_env_overrides()?;
            config
        }
    };

    let analyzer = CollectionAnalyzer::from_config(&config)?;
    let mut listener = MintListenerBuilder::from_config(config).build()?;
    let mut stream = listener.start()?;
    let mut analyzed = HashSet::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            item = stream.next() => match item {
                Some(Ok(ScannerMessage::Data(mint))) => {
                    info!(
                        contract = %mint.contract_address,
                        token_id = %mint.token_id,
                        block = mint.block_number,
                        free = mint.is_free,
                        "{} minted",
                        mint.collection_name
                    );
                    if analyzed.insert(mint.contract_address) {
                        let ids = [mint.token_id];
                        let result = analyzer.analyze(mint.contract_address, &ids, mint.token_id).await;
                        info!(
                            contract = %result.contract_address,
                            verdict = %result.final_status,
                            reasons = ?result.status_reasons,
                            "Collection analyzed"
                        );
                    }
                }
                Some(Ok(ScannerMessage::Notification(notification))) => {
                    info!(?notification, state = %listener.state(), "Listener notification");
                }
                Some(Err(err)) if err.is_fatal() => {
                    error!(error = %err, "Listener failed");
                    break;
                }
                Some(Err(err)) => warn!(error = %err, "Transient listener error"),
                None => break,
            },
        }
    }

    listener.stop().await;
    Ok(())
}
