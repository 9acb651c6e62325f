use base64::Engine;
use serde::{Deserialize, Serialize};

use super::kv::SharedLocalStore;

const CREDENTIALS_KEY: &str = "microstar.up";

/// Username/password remembered for convenience re-login. Not a token substitute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl PendingCredentials {
    pub fn is_complete(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Obfuscated (base64 of JSON) credential persistence. Obfuscation only: anyone with access
/// to the store can read the password back.
#[derive(Clone)]
pub struct CredentialStore {
    store: SharedLocalStore,
}

impl CredentialStore {
    pub fn new(store: SharedLocalStore) -> Self { Self { store } }

    pub fn get(&self) -> PendingCredentials {
        self.store
            .get(CREDENTIALS_KEY)
            .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok())
            .and_then(|bytes| serde_json::from_slice::<PendingCredentials>(&bytes).ok())
            .unwrap_or_default()
    }

    pub fn set(&self, username: Option<&str>, password: Option<&str>) {
        let up = PendingCredentials { username: username.map(str::to_string), password: password.map(str::to_string) };
        match serde_json::to_vec(&up) {
            Ok(json) => self.store.set(CREDENTIALS_KEY, &base64::engine::general_purpose::STANDARD.encode(json)),
            Err(e) => tracing::warn!(target: "starclient::store", "unable to encode credentials: {}", e),
        }
    }

    /// Forget the password, keep the username so the prompt can be pre-filled.
    pub fn reset_password(&self) {
        let username = self.get().username;
        self.set(username.as_deref(), None);
    }

    pub fn reset(&self) { self.set(None, None); }
}
