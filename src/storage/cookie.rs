use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::kv::SharedLocalStore;

pub const AUTH_COOKIE: &str = "X-AUTH-TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CookieRecord {
    value: String,
    expires_ms: i64,
}

/// Cookie jar over the local store. Set uses a far-future expiry, clear an already-past one,
/// which is how the browser side of the dashboard manages its `X-AUTH-TOKEN` cookie.
#[derive(Clone)]
pub struct CookieJar {
    store: SharedLocalStore,
}

fn far_future_ms() -> i64 {
    Utc.with_ymd_and_hms(2070, 1, 1, 0, 0, 1).single().map(|d| d.timestamp_millis()).unwrap_or(i64::MAX)
}

fn key_for(name: &str) -> String { format!("cookie.{}", name) }

impl CookieJar {
    pub fn new(store: SharedLocalStore) -> Self { Self { store } }

    pub fn get(&self, name: &str) -> Option<String> {
        let raw = self.store.get(&key_for(name))?;
        let rec: CookieRecord = serde_json::from_str(&raw).ok()?;
        (rec.expires_ms > Utc::now().timestamp_millis() && !rec.value.is_empty()).then_some(rec.value)
    }

    pub fn set(&self, name: &str, value: &str) {
        self.write(name, CookieRecord { value: value.to_string(), expires_ms: far_future_ms() });
    }

    pub fn clear(&self, name: &str) {
        self.write(name, CookieRecord { value: String::new(), expires_ms: 0 });
    }

    fn write(&self, name: &str, rec: CookieRecord) {
        if let Ok(s) = serde_json::to_string(&rec) {
            self.store.set(&key_for(name), &s);
        }
    }

    /// `Cookie:` header value for the given cookie, if it is set.
    pub fn header_value(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| format!("{}={}", name, v))
    }
}
