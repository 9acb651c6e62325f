//! `StarClient`: everything wired together the way a dashboard page uses it.

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::coalesce::{CoalesceError, Coalescer};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::{ChannelTimings, Dispatcher, EventReceiver};
use crate::frontend::{ErrorSink, HeadlessFrontend, SharedFrontend};
use crate::identity::{SessionState, UserInfo};
use crate::net::{
    LocalStarInfo, LoginError, LoginNegotiator, LoginSettings, RequestClient, RequestSpec, Response, StarDirectory,
};
use crate::storage::{FileStore, MemoryStore, SharedLocalStore};

const REFRESH_STARS_KEY: &str = "refresh-stars";
const LOCAL_STAR_KEY: &str = "local-star";

pub struct StarClient {
    config: ClientConfig,
    store: SharedLocalStore,
    frontend: SharedFrontend,
    requests: RequestClient,
    events: EventReceiver,
    coalescer: Coalescer,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl StarClient {
    /// Build the client. Inside a tokio runtime this also starts the session watcher that
    /// reconnects the event channel after every login.
    pub fn new(config: ClientConfig, frontend: SharedFrontend, store: SharedLocalStore) -> ClientResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("base url {}: {}", config.base_url, e)))?;
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("http client: {}", e)))?;

        let session = SessionState::new(store.clone());
        let errors = ErrorSink::new(frontend.clone());
        let login = LoginNegotiator::new(
            http.clone(),
            base.clone(),
            session.clone(),
            store.clone(),
            frontend.clone(),
            errors.clone(),
            LoginSettings { no_auto_login: config.no_auto_login, sso_loop_guard: std::time::Duration::from_millis(config.sso_loop_guard_ms) },
        );
        let stars = StarDirectory::new(session.clone(), base.clone(), frontend.clone());
        let requests = RequestClient::new(http, base, session, login, stars, errors);
        let events = EventReceiver::new(requests.clone(), Dispatcher::new(), ChannelTimings::from(&config));

        let watcher = tokio::runtime::Handle::try_current().ok().map(|_| events.watch_session());
        if watcher.is_none() {
            warn!(target: "starclient::client", "no tokio runtime; event channel will not follow logins");
        }
        let client = Self {
            config,
            store,
            frontend,
            requests,
            events,
            coalescer: Coalescer::new(),
            watcher: Mutex::new(watcher),
        };
        client.follow_star_changes();
        Ok(client)
    }

    /// Config-driven construction: file-backed store when `state_file` is set, headless frontend.
    pub fn from_config(config: ClientConfig) -> ClientResult<Self> {
        let store: SharedLocalStore = match &config.state_file {
            Some(path) => Arc::new(FileStore::open(path)),
            None => MemoryStore::shared(),
        };
        Self::new(config, Arc::new(HeadlessFrontend), store)
    }

    pub fn config(&self) -> &ClientConfig { &self.config }
    pub fn store(&self) -> &SharedLocalStore { &self.store }
    pub fn frontend(&self) -> &SharedFrontend { &self.frontend }
    pub fn session(&self) -> &SessionState { self.requests.session() }
    pub fn requests(&self) -> &RequestClient { &self.requests }
    pub fn login(&self) -> &LoginNegotiator { self.requests.login() }
    pub fn stars(&self) -> &StarDirectory { self.requests.stars() }
    pub fn errors(&self) -> &ErrorSink { self.requests.errors() }
    pub fn events(&self) -> &EventReceiver { &self.events }
    pub fn handlers(&self) -> &Dispatcher { self.events.dispatcher() }
    pub fn coalescer(&self) -> &Coalescer { &self.coalescer }

    /// Open the event channel using the configured instance scope.
    pub fn connect_events(&self) {
        self.events.connect(self.config.instance_id.as_deref());
    }

    pub async fn request(&self, spec: impl Into<RequestSpec>) -> ClientResult<Response> {
        self.requests.request(spec).await
    }

    pub async fn fetch_text(&self, spec: impl Into<RequestSpec>) -> ClientResult<String> {
        self.requests.fetch_text(spec).await
    }

    pub async fn fetch_data<T: DeserializeOwned>(&self, spec: impl Into<RequestSpec>) -> ClientResult<T> {
        self.requests.fetch_data(spec).await
    }

    /// Remember the credentials, drop any session and negotiate a fresh one.
    pub async fn login_with(&self, username: &str, password: &str) -> Result<UserInfo, LoginError> {
        self.login().credentials().set(Some(username), Some(password));
        self.login().forget_session();
        self.login().user_info().await
    }

    pub fn logout(&self) {
        let user = self.session().user().map(|u| u.name).unwrap_or_default();
        self.events.disconnect();
        self.login().forget_session();
        self.login().credentials().reset_password();
        info!(target: "starclient::client", user = %user, "logged out");
    }

    /// Debounced star-list refresh; callers inside the window share the last one's outcome.
    pub async fn refresh_stars(&self) -> ClientResult<()> {
        let requests = self.requests.clone();
        let delay = self.config.debounce();
        let outcome = self
            .coalescer
            .debounce_future(REFRESH_STARS_KEY, delay, move || async move { requests.stars().refresh(&requests).await })
            .await;
        match outcome {
            Ok(res) => res,
            Err(CoalesceError::Superseded) => Ok(()),
        }
    }

    /// What the member we are attached to says about itself. Callers inside the throttle
    /// window share one request.
    pub async fn local_star_info(&self) -> ClientResult<LocalStarInfo> {
        let requests = self.requests.clone();
        self.coalescer
            .throttle_future(LOCAL_STAR_KEY, self.config.throttle(), move || async move {
                requests.stars().local_info(&requests).await
            })
            .await
    }

    /// Select another cluster member. Requests and the event channel follow immediately.
    pub fn select_star(&self, name: Option<&str>) {
        self.stars().set_current_name(name);
        if self.events.is_connected() {
            self.events.reconnect();
        }
    }

    fn follow_star_changes(&self) {
        let requests = self.requests.clone();
        let coalescer = self.coalescer.clone();
        let delay = self.config.debounce();
        self.events.dispatcher().on_stars_changed(move || {
            let requests = requests.clone();
            coalescer.debounce(REFRESH_STARS_KEY, delay, move || async move {
                if let Err(e) = requests.stars().refresh(&requests).await {
                    warn!(target: "starclient::client", "star refresh after change failed: {}", e);
                }
            });
        });
    }
}

impl Drop for StarClient {
    fn drop(&mut self) {
        if let Some(w) = self.watcher.lock().take() {
            w.abort();
        }
        self.events.disconnect();
    }
}
