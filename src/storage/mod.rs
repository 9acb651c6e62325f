//! Client-side persistence: the local key-value store, the auth cookie and remembered credentials.

mod kv;
mod cookie;
mod credentials;

pub use kv::{LocalStore, SharedLocalStore, MemoryStore, FileStore};
pub use cookie::{CookieJar, AUTH_COOKIE};
pub use credentials::{CredentialStore, PendingCredentials};

/// Epoch millis of the last SSO redirect attempt (loop guard).
pub const LAST_LOGIN_TIME_KEY: &str = "lastLoginTime";
/// Name of the selected cluster member.
pub const SELECTED_STAR_KEY: &str = "selectedStarName";
