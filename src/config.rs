//! Client configuration: serde defaults, optional JSON file, then `STARCLIENT_*` env overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Page-URL marker that disables SSO redirects (`?nologin`, `&noautologin`, ...).
static NO_AUTO_LOGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\Wno(auto)?login").unwrap());

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ClientConfig {
    /// Base URL of the cluster member this client was loaded from.
    #[serde(default = "ClientConfig::default_base_url")]
    pub base_url: String,
    /// Optional service instance the event channel should be scoped to.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default = "ClientConfig::default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "ClientConfig::default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Delay before the polling fallback asks for the next event.
    #[serde(default = "ClientConfig::default_poll_retry_delay_ms")]
    pub poll_retry_delay_ms: u64,
    /// Minimum time between two SSO redirects before the loop guard kicks in.
    #[serde(default = "ClientConfig::default_sso_loop_guard_ms")]
    pub sso_loop_guard_ms: u64,
    #[serde(default = "ClientConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "ClientConfig::default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default)]
    pub no_auto_login: bool,
    /// File-backed local store. In-memory when absent.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl ClientConfig {
    fn default_base_url() -> String { "http://127.0.0.1:8080/".to_string() }
    fn default_ping_interval_ms() -> u64 { 30_000 }
    fn default_reconnect_interval_ms() -> u64 { 5_000 }
    fn default_poll_retry_delay_ms() -> u64 { 1_500 }
    fn default_sso_loop_guard_ms() -> u64 { 5_000 }
    fn default_debounce_ms() -> u64 { 250 }
    fn default_throttle_ms() -> u64 { 250 }

    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let no_auto_login = NO_AUTO_LOGIN.is_match(&base_url);
        Self { base_url, no_auto_login, ..Default::default() }
    }

    /// Load from a JSON file (missing fields take defaults), then apply env overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let bytes = std::fs::read(p).with_context(|| format!("reading config {}", p.display()))?;
                serde_json::from_slice::<ClientConfig>(&bytes)
                    .with_context(|| format!("parsing config {}", p.display()))?
            }
            None => ClientConfig::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// `STARCLIENT_BASE_URL`, `STARCLIENT_INSTANCE_ID`, `STARCLIENT_STATE_FILE`, `STARCLIENT_NO_AUTO_LOGIN`
    /// and `STARCLIENT_<FIELD>_MS` for every interval. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        fn ms(name: &str, slot: &mut u64) {
            if let Some(v) = std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok()) { *slot = v; }
        }
        if let Ok(v) = std::env::var("STARCLIENT_BASE_URL") { self.base_url = v; }
        if let Ok(v) = std::env::var("STARCLIENT_INSTANCE_ID") { self.instance_id = Some(v).filter(|s| !s.is_empty()); }
        if let Ok(v) = std::env::var("STARCLIENT_STATE_FILE") { self.state_file = Some(PathBuf::from(v)); }
        if let Ok(v) = std::env::var("STARCLIENT_NO_AUTO_LOGIN") {
            self.no_auto_login = matches!(v.as_str(), "1" | "true" | "TRUE" | "t" | "T");
        }
        ms("STARCLIENT_PING_INTERVAL_MS", &mut self.ping_interval_ms);
        ms("STARCLIENT_RECONNECT_INTERVAL_MS", &mut self.reconnect_interval_ms);
        ms("STARCLIENT_POLL_RETRY_DELAY_MS", &mut self.poll_retry_delay_ms);
        ms("STARCLIENT_SSO_LOOP_GUARD_MS", &mut self.sso_loop_guard_ms);
        ms("STARCLIENT_DEBOUNCE_MS", &mut self.debounce_ms);
        ms("STARCLIENT_THROTTLE_MS", &mut self.throttle_ms);
        if NO_AUTO_LOGIN.is_match(&self.base_url) { self.no_auto_login = true; }
    }

    pub fn ping_interval(&self) -> Duration { Duration::from_millis(self.ping_interval_ms) }
    pub fn reconnect_interval(&self) -> Duration { Duration::from_millis(self.reconnect_interval_ms) }
    pub fn poll_retry_delay(&self) -> Duration { Duration::from_millis(self.poll_retry_delay_ms) }
    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }
    pub fn throttle(&self) -> Duration { Duration::from_millis(self.throttle_ms) }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            instance_id: None,
            ping_interval_ms: Self::default_ping_interval_ms(),
            reconnect_interval_ms: Self::default_reconnect_interval_ms(),
            poll_retry_delay_ms: Self::default_poll_retry_delay_ms(),
            sso_loop_guard_ms: Self::default_sso_loop_guard_ms(),
            debounce_ms: Self::default_debounce_ms(),
            throttle_ms: Self::default_throttle_ms(),
            no_auto_login: false,
            state_file: None,
        }
    }
}
