//! Stream assertions for listener tests.
//!
//! Every macro waits for the next item with a timeout (default 60 seconds, `timeout = N` to
//! override). Under a paused tokio clock the timeout is virtual, so generous values cost nothing.

#[doc(hidden)]
#[macro_export]
macro_rules! __next_within {
    ($stream: expr, $secs: expr, $what: literal) => {
        tokio::time::timeout(
            std::time::Duration::from_secs($secs),
            tokio_stream::StreamExt::next(&mut $stream),
        )
        .await
        .unwrap_or_else(|_| panic!(concat!("timed out waiting for ", $what)))
    };
}

/// Takes the next item, which must be a mint, and evaluates to the [`MintRecord`].
///
/// [`MintRecord`]: crate::MintRecord
#[macro_export]
macro_rules! assert_next_mint {
    ($stream: expr) => {
        $crate::assert_next_mint!($stream, timeout = 60)
    };
    ($stream: expr, timeout = $secs: expr) => {{
        let message = $crate::__next_within!($stream, $secs, "a mint");
        match message {
            Some(Ok($crate::ScannerMessage::Data(record))) => record,
            Some(other) => panic!("Expected a mint, got {other:?}"),
            None => panic!("Expected a mint, but the stream was closed"),
        }
    }};
}

/// Asserts that the next item is the given [`Notification`](crate::Notification).
#[macro_export]
macro_rules! assert_next_notification {
    ($stream: expr, $expected: expr) => {
        $crate::assert_next_notification!($stream, $expected, timeout = 60)
    };
    ($stream: expr, $expected: expr, timeout = $secs: expr) => {{
        let message = $crate::__next_within!($stream, $secs, "a notification");
        let expected: $crate::Notification = $expected;
        match message {
            Some(Ok(message)) => {
                assert!(message == expected, "Expected {expected:?}, got {message:?}");
            }
            Some(Err(err)) => panic!("Expected {expected:?}, got Err({err:?})"),
            None => panic!("Expected {expected:?}, but the stream was closed"),
        }
    }};
}

/// Takes the next item, which must be an error, and evaluates to the
/// [`ScannerError`](crate::ScannerError).
#[macro_export]
macro_rules! assert_next_error {
    ($stream: expr) => {
        $crate::assert_next_error!($stream, timeout = 60)
    };
    ($stream: expr, timeout = $secs: expr) => {{
        let message = $crate::__next_within!($stream, $secs, "an error");
        match message {
            Some(Err(err)) => err,
            Some(Ok(message)) => panic!("Expected an error, got {message:?}"),
            None => panic!("Expected an error, but the stream was closed"),
        }
    }};
}

#[macro_export]
macro_rules! assert_closed {
    ($stream: expr) => {
        $crate::assert_closed!($stream, timeout = 60)
    };
    ($stream: expr, timeout = $secs: expr) => {
        let message = $crate::__next_within!($stream, $secs, "the stream to close");
        assert!(message.is_none(), "Expected the stream to be closed, got {message:?}")
    };
}
