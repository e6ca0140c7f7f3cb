//! Crate-internal `error!`..`trace!` macros.
//!
//! With the `tracing` feature every call is forwarded to `tracing` under the `mint_scanner`
//! target. Without it, the arguments are only borrowed so that no variable becomes unused.

#[cfg(feature = "tracing")]
macro_rules! log_at {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!(target: "mint_scanner", $($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_at {
    ($level:ident, $($arg:tt)*) => {
        $crate::__discard_log_args!($($arg)*)
    };
}

#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => { log_at!(error, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => { log_at!(warn, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => { log_at!(info, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => { log_at!(debug, $($arg)*) };
}

#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => { log_at!(trace, $($arg)*) };
}

#[doc(hidden)]
#[macro_export]
#[cfg(not(feature = "tracing"))]
macro_rules! __discard_log_args {
    () => {};
    ($name:ident = % $value:expr, $($rest:tt)*) => {{
        let _ = &$value;
        $crate::__discard_log_args!($($rest)*);
    }};
    ($name:ident = ? $value:expr, $($rest:tt)*) => {{
        let _ = &$value;
        $crate::__discard_log_args!($($rest)*);
    }};
    ($name:ident = $value:expr, $($rest:tt)*) => {{
        let _ = &$value;
        $crate::__discard_log_args!($($rest)*);
    }};
    ($message:literal $(, $arg:expr)* $(,)?) => {{
        $( let _ = &$arg; )*
    }};
}
