// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup shared by the roomfs workspace
//!
//! Wraps `emit` so that library crates log through one set of macros and
//! applications choose the level once at startup.
//!
//! Usage:
//! - Set ROOMFS_LOG=off (default) - no logs
//! - Set ROOMFS_LOG=info - basic operation logs
//! - Set ROOMFS_LOG=debug - overlay and resolution details

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable that selects the minimum level.
pub const LOG_ENV: &str = "ROOMFS_LOG";

static INIT: Once = Once::new();

/// Minimum level parsed from the environment, `None` meaning logging is off.
fn level_from_env(value: Option<&str>) -> Option<emit::Level> {
    match value.unwrap_or("off") {
        "off" => None,
        "debug" => Some(emit::Level::Debug),
        "warn" => Some(emit::Level::Warn),
        "error" => Some(emit::Level::Error),
        _ => Some(emit::Level::Info),
    }
}

/// Initialize diagnostics based on the ROOMFS_LOG environment variable
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let value = std::env::var(LOG_ENV).ok();
        let Some(level) = level_from_env(value.as_deref()) else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The runtime lives for the rest of the process.
        std::mem::forget(rt);
    });
}

/// Log basic operations (sync started, folder created, invite accepted)
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log detailed diagnostics (overlay bookkeeping, resolution steps)
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable conditions (retries, expired placeholders)
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that abort an operation
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

/// Re-export the init function for convenience
pub use init_diagnostics as init;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_diagnostics();
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(level_from_env(None), None);
        assert_eq!(level_from_env(Some("off")), None);
        assert_eq!(level_from_env(Some("debug")), Some(emit::Level::Debug));
        assert_eq!(level_from_env(Some("warn")), Some(emit::Level::Warn));
        assert_eq!(level_from_env(Some("bogus")), Some(emit::Level::Info));
    }

    #[test]
    fn test_macros_compile() {
        log_info!("Test message");
        log_debug!("Debug message with {value}", value: 42);
        warn!("Warning message");
        error!("Error message");
    }
}
