//! Client runtime for a star (multi-member) cluster-management backend: authenticated HTTP with
//! a login fallback chain, a websocket event channel with polling fallback, and keyed
//! debounce/throttle for UI-driven refreshes.

pub mod error;
pub mod config;
pub mod coalesce;
pub mod storage;
pub mod identity;
pub mod frontend;
pub mod net;
pub mod events;
pub mod client;
pub mod cli;


pub use client::StarClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ServerError};

// Test-only printing helper: expands to eprintln! during tests and is absent otherwise.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
