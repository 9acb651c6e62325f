use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::client::RequestClient;
use super::request::RequestSpec;
use crate::error::ClientResult;
use crate::frontend::SharedFrontend;
use crate::identity::SessionState;

pub const STARS_PATH: &str = "/stars";
pub const LOCAL_STAR_PATH: &str = "/star";
pub const STAR_NAME_HEADER: &str = "X-STAR-NAME";
const DEFAULT_STAR_NAME: &str = "main";

/// One cluster member ("star") as listed by `/stars`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarProperties {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
}

/// `/star`: what the member we are connected to says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStarInfo {
    #[serde(default)]
    pub star_name: String,
    #[serde(default)]
    pub star_url: String,
    #[serde(default)]
    pub dispatcher_url: String,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

/// Known cluster members and which one requests are routed to.
/// The selection itself lives in the session state so the request client can read it
/// without going through here.
#[derive(Clone)]
pub struct StarDirectory {
    stars: Arc<RwLock<Vec<StarProperties>>>,
    session: SessionState,
    base: Url,
    frontend: SharedFrontend,
}

impl StarDirectory {
    pub fn new(session: SessionState, base: Url, frontend: SharedFrontend) -> Self {
        Self { stars: Arc::new(RwLock::new(Vec::new())), session, base, frontend }
    }

    pub fn stars(&self) -> Vec<StarProperties> { self.stars.read().clone() }

    pub fn current_name(&self) -> Option<String> { self.session.target_member() }

    /// Select a member (or go back to the default) and remember the choice.
    pub fn set_current_name(&self, name: Option<&str>) {
        self.session.set_target_member(name);
        info!(target: "starclient::stars", star = name.unwrap_or("-"), "selected star");
    }

    pub fn star_for_name(&self, name: &str) -> Option<StarProperties> {
        self.stars.read().iter().find(|s| s.name == name).cloned()
    }

    pub fn current_star(&self) -> Option<StarProperties> {
        self.current_name().and_then(|n| self.star_for_name(&n))
    }

    /// The member whose URL prefixes our own base URL.
    pub fn local_star(&self) -> Option<StarProperties> {
        let base = self.base.as_str();
        self.stars.read().iter().find(|s| !s.url.is_empty() && base.starts_with(s.url.as_str())).cloned()
    }

    /// Unknown membership counts as local.
    pub fn is_on_local_star(&self) -> bool {
        match (self.current_star(), self.local_star()) {
            (Some(current), Some(local)) => current.url == local.url,
            _ => true,
        }
    }

    /// Reload the member list. Failures leave the directory empty.
    pub async fn refresh(&self, client: &RequestClient) -> ClientResult<()> {
        let fetched = client.request(RequestSpec::get(STARS_PATH).show_error(false)).await;
        let resp = match fetched {
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                warn!(target: "starclient::stars", status = r.status, "could not list stars");
                self.stars.write().clear();
                return Ok(());
            }
            Err(e) => {
                warn!(target: "starclient::stars", "could not list stars: {}", e);
                self.stars.write().clear();
                return Err(e);
            }
        };
        let stars: Vec<StarProperties> = serde_json::from_str(&resp.body).unwrap_or_else(|e| {
            warn!(target: "starclient::stars", "unreadable star list: {}", e);
            Vec::new()
        });
        let current = self
            .session
            .target_member()
            .or_else(|| resp.header(STAR_NAME_HEADER).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_STAR_NAME.to_string());
        self.session.adopt_target_member(&current);
        *self.stars.write() = stars;

        let current_active = self.current_star().is_some_and(|s| s.is_active);
        let first = self.stars.read().first().cloned();
        if let Some(first) = first.filter(|s| s.is_active && !current_active) {
            info!(target: "starclient::stars", from = %current, to = %first.name, "current star inactive; switching");
            self.set_current_name(Some(&first.name));
            self.frontend.reload();
        }
        Ok(())
    }

    pub async fn local_info(&self, client: &RequestClient) -> ClientResult<LocalStarInfo> {
        let resp = client.request(RequestSpec::get(LOCAL_STAR_PATH).show_error(false)).await?;
        Ok(resp.json().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::HeadlessFrontend;
    use crate::storage::MemoryStore;

    fn directory(base: &str) -> StarDirectory {
        let session = SessionState::new(MemoryStore::shared());
        StarDirectory::new(session, Url::parse(base).unwrap(), Arc::new(HeadlessFrontend))
    }

    fn star(name: &str, url: &str, active: bool) -> StarProperties {
        StarProperties { url: url.into(), name: name.into(), is_active: active }
    }

    #[test]
    fn unknown_membership_counts_as_local() {
        let dir = directory("http://east:8080/dashboard/");
        assert!(dir.is_on_local_star());
        dir.set_current_name(Some("west"));
        assert!(dir.is_on_local_star());
    }

    #[test]
    fn local_star_is_matched_by_url_prefix() {
        let dir = directory("http://east:8080/dashboard/");
        *dir.stars.write() = vec![star("east", "http://east:8080", true), star("west", "http://west:8080", true)];
        assert_eq!(dir.local_star().unwrap().name, "east");
        dir.set_current_name(Some("east"));
        assert!(dir.is_on_local_star());
        dir.set_current_name(Some("west"));
        assert!(!dir.is_on_local_star());
    }

    #[test]
    fn star_list_uses_camel_case() {
        let stars: Vec<StarProperties> =
            serde_json::from_str(r#"[{"url":"http://a","name":"main","isActive":true},{"name":"b"}]"#).unwrap();
        assert_eq!(stars[0], star("main", "http://a", true));
        assert!(!stars[1].is_active);
    }
}
