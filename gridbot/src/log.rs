//! Logging abstraction
//!
//! Unified logging macros that work across targets:
//! - Embedded (`defmt-log` feature): uses defmt
//! - Hosted (`std` feature): uses tracing
//! - Neither: compiled out
//!
//! Format strings must stay within the subset both backends accept:
//! `{}` for integers and `{:?}` for everything else.

/// Log trace message
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt-log")]
        ::defmt::trace!($($arg)*);

        #[cfg(feature = "std")]
        ::tracing::trace!($($arg)*);
    }};
}

/// Log debug message
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt-log")]
        ::defmt::debug!($($arg)*);

        #[cfg(feature = "std")]
        ::tracing::debug!($($arg)*);
    }};
}

/// Log informational message
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt-log")]
        ::defmt::info!($($arg)*);

        #[cfg(feature = "std")]
        ::tracing::info!($($arg)*);
    }};
}

/// Log warning message
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt-log")]
        ::defmt::warn!($($arg)*);

        #[cfg(feature = "std")]
        ::tracing::warn!($($arg)*);
    }};
}

/// Log error message
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt-log")]
        ::defmt::error!($($arg)*);

        #[cfg(feature = "std")]
        ::tracing::error!($($arg)*);
    }};
}

pub(crate) use {log_debug, log_error, log_info, log_trace, log_warn};
