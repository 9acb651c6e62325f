//! Login fallback chain: silent `/whoami` with the stored cookie, then an SSO redirect,
//! then stored username/password against `/admin-login` and the authorization service.
//! All callers needing an identity share one in-flight negotiation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::frontend::{ErrorSink, SharedFrontend};
use crate::identity::{SessionState, UserInfo, WhoAmI};
use crate::storage::{CookieJar, CredentialStore, SharedLocalStore, AUTH_COOKIE, LAST_LOGIN_TIME_KEY};

pub const AUTH_PASSWORD_HEADER: &str = "X-AUTH-PASSWORD";
pub const SSO_DASHBOARD_PATH: &str = "/sso/dashboard";
/// Anything longer is an HTML page from a proxy, not an SSO version string.
const MAX_SSO_VERSION_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("no session cookie")]
    NoCookie,
    #[error("whoami rejected with HTTP {0}")]
    WhoAmIRejected(u16),
    #[error("SSO login disabled")]
    SsoDisabled,
    #[error("loop detection, not logging in -- refresh to try again")]
    LoopDetected,
    #[error("no SSO running")]
    NoSso,
    /// The frontend was sent to the SSO dashboard; nothing more to do in this process.
    #[error("redirected to SSO")]
    RedirectedToSso,
    #[error("username and password are mandatory")]
    MissingCredentials,
    #[error("{0}")]
    Rejected(String),
    #[error("login returned an empty token")]
    InvalidToken,
    #[error("transport: {0}")]
    Transport(String),
}

type LoginFuture = Shared<BoxFuture<'static, Result<UserInfo, LoginError>>>;

pub struct LoginSettings {
    pub no_auto_login: bool,
    pub sso_loop_guard: Duration,
}

struct LoginInner {
    http: reqwest::Client,
    base: Url,
    session: SessionState,
    cookies: CookieJar,
    credentials: CredentialStore,
    store: SharedLocalStore,
    frontend: SharedFrontend,
    errors: ErrorSink,
    settings: LoginSettings,
    in_flight: Mutex<Option<(u64, LoginFuture)>>,
    seq: AtomicU64,
}

#[derive(Clone)]
pub struct LoginNegotiator {
    inner: Arc<LoginInner>,
}

impl LoginNegotiator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        base: Url,
        session: SessionState,
        store: SharedLocalStore,
        frontend: SharedFrontend,
        errors: ErrorSink,
        settings: LoginSettings,
    ) -> Self {
        Self {
            inner: Arc::new(LoginInner {
                http,
                base,
                session,
                cookies: CookieJar::new(store.clone()),
                credentials: CredentialStore::new(store.clone()),
                store,
                frontend,
                errors,
                settings,
                in_flight: Mutex::new(None),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn credentials(&self) -> &CredentialStore { &self.inner.credentials }

    pub fn cookies(&self) -> &CookieJar { &self.inner.cookies }

    /// True while a negotiation is running.
    pub fn is_negotiating(&self) -> bool { self.inner.in_flight.lock().is_some() }

    /// Current user, negotiating a session first if there is none.
    /// Concurrent callers join the same negotiation.
    pub async fn user_info(&self) -> Result<UserInfo, LoginError> {
        if let Some(user) = self.inner.session.user() {
            return Ok(user);
        }
        let (id, fut) = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some((id, fut)) => (*id, fut.clone()),
                None => {
                    let id = self.inner.seq.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let fut = async move { inner.negotiate().await }.boxed().shared();
                    *slot = Some((id, fut.clone()));
                    (id, fut)
                }
            }
        };
        let out = fut.await;
        {
            let mut slot = self.inner.in_flight.lock();
            if slot.as_ref().is_some_and(|(cur, _)| *cur == id) {
                *slot = None;
            }
        }
        out
    }

    /// Drop the session and the cookie backing it. The next request negotiates again.
    pub fn forget_session(&self) {
        self.inner.cookies.clear(AUTH_COOKIE);
        self.inner.session.clear();
    }
}

impl LoginInner {
    async fn negotiate(&self) -> Result<UserInfo, LoginError> {
        match self.who_am_i().await {
            Ok(user) => return Ok(user),
            Err(e) => debug!(target: "starclient::login", "whoami: {}", e),
        }
        match self.sso_login().await {
            Ok(()) => return Err(LoginError::RedirectedToSso),
            Err(e) => debug!(target: "starclient::login", "sso: {}", e),
        }
        let out = self.user_password_login().await;
        if let Err(e) = &out {
            warn!(target: "starclient::login", "login failed: {}", e);
        }
        out
    }

    fn url(&self, path: &str) -> Result<Url, LoginError> {
        self.base.join(path).map_err(|e| LoginError::Transport(format!("{}: {}", path, e)))
    }

    async fn who_am_i(&self) -> Result<UserInfo, LoginError> {
        let stored = self.cookies.get(AUTH_COOKIE).ok_or(LoginError::NoCookie)?;
        let cookie = self.cookies.header_value(AUTH_COOKIE).ok_or(LoginError::NoCookie)?;
        let res = self
            .http
            .get(self.url("/whoami")?)
            .header(reqwest::header::COOKIE, cookie)
            .send()
            .await;
        let resp = match res {
            Ok(r) => r,
            Err(e) => {
                self.cookies.clear(AUTH_COOKIE);
                return Err(LoginError::Transport(e.to_string()));
            }
        };
        if resp.status() != StatusCode::OK {
            self.cookies.clear(AUTH_COOKIE);
            return Err(LoginError::WhoAmIRejected(resp.status().as_u16()));
        }
        let who: WhoAmI = match resp.json().await {
            Ok(w) => w,
            Err(e) => {
                self.cookies.clear(AUTH_COOKIE);
                return Err(LoginError::Transport(e.to_string()));
            }
        };
        let (token, user) = who.into_user();
        self.accept(if token.is_empty() { stored } else { token }, user)
    }

    /// `Ok(())` means the frontend was sent to the SSO dashboard.
    async fn sso_login(&self) -> Result<(), LoginError> {
        if self.settings.no_auto_login {
            return Err(LoginError::SsoDisabled);
        }
        let now = chrono::Utc::now().timestamp_millis();
        let last = self.store.get(LAST_LOGIN_TIME_KEY).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
        self.store.set(LAST_LOGIN_TIME_KEY, &now.to_string());
        let guard = i64::try_from(self.settings.sso_loop_guard.as_millis()).unwrap_or(i64::MAX);
        if now - last < guard {
            return Err(LoginError::LoopDetected);
        }
        let resp = self
            .http
            .get(self.url("/sso/version")?)
            .send()
            .await
            .map_err(|_| LoginError::NoSso)?;
        if resp.status() != StatusCode::OK {
            return Err(LoginError::NoSso);
        }
        let version = resp.text().await.map_err(|_| LoginError::NoSso)?;
        if version.len() > MAX_SSO_VERSION_LEN {
            return Err(LoginError::NoSso);
        }
        info!(target: "starclient::login", version = version.trim(), "redirecting to SSO");
        self.frontend.navigate(SSO_DASHBOARD_PATH);
        Ok(())
    }

    async fn user_password_login(&self) -> Result<UserInfo, LoginError> {
        let creds = self.credentials.get();
        if !creds.is_complete() {
            self.frontend.prompt_credentials();
            return Err(LoginError::MissingCredentials);
        }
        let username = creds.username.unwrap_or_default();
        let password = creds.password.unwrap_or_default();

        let admin = self.post_password("/admin-login", &password).await;
        let admin_reason = match admin {
            Ok((200, token)) => return self.accept(token, UserInfo::named(&username)),
            Ok((404, _)) => "Bootstrap admin login disabled".to_string(),
            Ok(_) => "Wrong admin password".to_string(),
            Err(e) => e.to_string(),
        };
        debug!(target: "starclient::login", "admin login: {}", admin_reason);

        let path = format!("/microstar-authorization/login/{}", urlencoding::encode(&username));
        let reason = match self.post_password(&path, &password).await {
            Ok((200, token)) => return self.accept(token, UserInfo::named(&username)),
            Ok((404, _)) if username != "admin" => "Bootstrap mode: only admin login allowed".to_string(),
            Ok((status, _)) => format!("Login rejected (HTTP {})", status),
            Err(e) => e.to_string(),
        };
        self.credentials.reset_password();
        self.errors.report(ServerError::local(reason.clone()), true);
        self.frontend.prompt_credentials();
        Err(LoginError::Rejected(reason))
    }

    async fn post_password(&self, path: &str, password: &str) -> Result<(u16, String), LoginError> {
        let resp = self
            .http
            .post(self.url(path)?)
            .header(AUTH_PASSWORD_HEADER, password)
            .send()
            .await
            .map_err(|e| LoginError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| LoginError::Transport(e.to_string()))?;
        Ok((status, body))
    }

    fn accept(&self, token: String, user: UserInfo) -> Result<UserInfo, LoginError> {
        let token = token.trim().trim_matches('"').to_string();
        if token.is_empty() {
            return Err(LoginError::InvalidToken);
        }
        self.cookies.set(AUTH_COOKIE, &token);
        self.session.set(user.clone(), token);
        info!(target: "starclient::login", user = %user.name, "logged in");
        Ok(user)
    }
}
