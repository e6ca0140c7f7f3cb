mod common;

use std::time::Duration;

use alloy::primitives::{U64, U256};
use mint_scanner::{
    MintListenerBuilder, Notification, ScannerError, TransportState, assert_next_mint,
    assert_next_notification,
    robust_provider::EndpointStatus,
    test_utils::{MockConnector, fixtures},
};

use crate::common::{CONTRACT, MockListener, POLL_A, POLL_B, SUB_A, build, push_enrichment};

fn all_untested(listener: &MockListener) -> bool {
    listener.endpoints().iter().all(|e| e.status == EndpointStatus::Untested)
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() -> anyhow::Result<()> {
    let connector = MockConnector::new();
    let mut listener = build(MintListenerBuilder::new().polling_urls([POLL_A]), &connector)?;

    listener.stop().await;
    listener.stop().await;

    assert_eq!(listener.state(), TransportState::Stopped);
    assert!(all_untested(&listener));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stopping_twice_leaves_every_endpoint_untested() -> anyhow::Result<()> {
    let connector = MockConnector::new();
    connector.subscription(SUB_A).push_success(&U64::from(100));
    let log = fixtures::mint_log(CONTRACT, 1, 100, 0);
    push_enrichment(&connector.subscription(SUB_A), &log, U256::ZERO, "Cool Cats");

    let builder = MintListenerBuilder::new().subscription_urls([SUB_A]).polling_urls([POLL_A]);
    let mut listener = build(builder, &connector)?;
    let mut stream = listener.start()?;
    assert_next_notification!(stream, Notification::SubscriptionActive);
    assert_next_notification!(stream, Notification::SetupComplete);
    assert!(connector.push_log(SUB_A, log));
    assert_next_mint!(stream);
    assert!(!all_untested(&listener));

    listener.stop().await;
    listener.stop().await;

    assert_eq!(listener.state(), TransportState::Stopped);
    assert!(all_untested(&listener));
    assert!(listener.endpoints().iter().all(|e| !e.is_current_subscription));
    // the controller is gone, so the stream ends
    mint_scanner::assert_closed!(stream);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_slower_race_candidates() -> anyhow::Result<()> {
    let connector = MockConnector::new();
    // the first endpoint fails once and would answer on its retry, after the race is decided
    let slow = connector.polling(POLL_A);
    slow.push_failure_msg("node is syncing");
    slow.push_success(&U64::from(100));
    connector.polling(POLL_B).push_success(&U64::from(100));

    let builder = MintListenerBuilder::new().polling_urls([POLL_A, POLL_B]).initial_lookback_blocks(0);
    let mut listener = build(builder, &connector)?;
    let mut stream = listener.start()?;
    assert_next_notification!(stream, Notification::PollingActive);
    assert_next_notification!(stream, Notification::SetupComplete);

    // first cycle has run; the retry of the first endpoint is still pending
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(!all_untested(&listener));

    listener.stop().await;
    listener.stop().await;
    assert!(all_untested(&listener));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(all_untested(&listener), "late report after stop: {:?}", listener.endpoints());
    assert_eq!(listener.state(), TransportState::Stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn running_listener_cannot_start_again_but_a_stopped_one_can() -> anyhow::Result<()> {
    let connector = MockConnector::new();
    let mut listener = build(MintListenerBuilder::new().polling_urls([POLL_A]), &connector)?;

    let mut first = listener.start()?;
    assert_next_notification!(first, Notification::PollingActive);
    assert_next_notification!(first, Notification::SetupComplete);
    assert!(matches!(listener.start(), Err(ScannerError::AlreadyStarted)));

    listener.stop().await;
    let mut second = listener.start()?;
    assert_next_notification!(second, Notification::PollingActive);
    assert_next_notification!(second, Notification::SetupComplete);
    assert_eq!(listener.state(), TransportState::PollingActive);

    listener.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropping_the_stream_shuts_the_controller_down() -> anyhow::Result<()> {
    let connector = MockConnector::new();
    let mut listener = build(MintListenerBuilder::new().polling_urls([POLL_A]), &connector)?;

    let mut stream = listener.start()?;
    assert_next_notification!(stream, Notification::PollingActive);
    drop(stream);

    tokio::time::timeout(Duration::from_secs(60), async {
        while listener.state() != TransportState::Stopped {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn unusable_configuration_is_fatal() -> anyhow::Result<()> {
    let connector = MockConnector::new();

    let empty: Result<MockListener, _> = MintListenerBuilder::new().build_with(connector.clone());
    assert!(matches!(empty, Err(ScannerError::NoEndpointsConfigured)));

    let mut listener = build(MintListenerBuilder::new().polling_urls(["not-a-url"]), &connector)?;
    let err = listener.start().err().expect("invalid endpoint");
    assert!(matches!(&err, ScannerError::InvalidEndpoint(url) if url == "not-a-url"));
    assert!(err.is_fatal());
    Ok(())
}
