// src/macros.rs

//
// Crate-internal logging macros.
//
// `logging` enabled  → forwarded to `tracing` at the matching level.
// `logging` disabled → errors go to stderr; other levels only type-check
//                      their arguments, so call sites compile the same way.
//
// Arguments are a format string plus arguments, never tracing fields.
//

#![allow(unused_macros)]

macro_rules! log_error {
    ($($arg:tt)+) => {{
        #[cfg(feature = "logging")]
        ::tracing::error!($($arg)+);
        #[cfg(not(feature = "logging"))]
        ::std::eprintln!("mom-streams: {}", ::core::format_args!($($arg)+));
    }};
}

macro_rules! log_warn {
    ($($arg:tt)+) => {{
        #[cfg(feature = "logging")]
        ::tracing::warn!($($arg)+);
        #[cfg(not(feature = "logging"))]
        let _ = ::core::format_args!($($arg)+);
    }};
}

macro_rules! log_info {
    ($($arg:tt)+) => {{
        #[cfg(feature = "logging")]
        ::tracing::info!($($arg)+);
        #[cfg(not(feature = "logging"))]
        let _ = ::core::format_args!($($arg)+);
    }};
}

macro_rules! log_debug {
    ($($arg:tt)+) => {{
        #[cfg(feature = "logging")]
        ::tracing::debug!($($arg)+);
        #[cfg(not(feature = "logging"))]
        let _ = ::core::format_args!($($arg)+);
    }};
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
