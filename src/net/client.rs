//! Authenticated request client. Every call resolves an identity first, carries the session
//! token and the selected cluster member, and retries exactly once after re-authenticating.

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::login::LoginNegotiator;
use super::request::{RequestSpec, Response};
use super::stars::{StarDirectory, STARS_PATH};
use crate::error::{ClientError, ClientResult, ServerError};
use crate::frontend::ErrorSink;
use crate::identity::SessionState;

pub const AUTH_TOKEN_HEADER: &str = "X-AUTH-TOKEN";
pub const STAR_TARGET_HEADER: &str = "X-STAR-TARGET";

enum Outcome {
    Done(Response),
    Reauthenticate,
}

struct ClientInner {
    http: reqwest::Client,
    base: Url,
    session: SessionState,
    login: LoginNegotiator,
    stars: StarDirectory,
    errors: ErrorSink,
}

#[derive(Clone)]
pub struct RequestClient {
    inner: Arc<ClientInner>,
}

impl RequestClient {
    pub fn new(
        http: reqwest::Client,
        base: Url,
        session: SessionState,
        login: LoginNegotiator,
        stars: StarDirectory,
        errors: ErrorSink,
    ) -> Self {
        Self { inner: Arc::new(ClientInner { http, base, session, login, stars, errors }) }
    }

    pub fn base(&self) -> &Url { &self.inner.base }
    pub fn session(&self) -> &SessionState { &self.inner.session }
    pub fn login(&self) -> &LoginNegotiator { &self.inner.login }
    pub fn stars(&self) -> &StarDirectory { &self.inner.stars }
    pub fn errors(&self) -> &ErrorSink { &self.inner.errors }

    /// Issue `spec`. 401 (or 403 without a token) drops the session and retries once with a
    /// freshly negotiated one; a second rejection is returned as `AuthenticationRequired`.
    pub async fn request(&self, spec: impl Into<RequestSpec>) -> ClientResult<Response> {
        let mut spec = spec.into();
        spec.recursive = false;
        loop {
            if let Err(e) = self.inner.login.user_info().await {
                debug!(target: "starclient::http", url = %spec.url, "no identity: {}", e);
                return Err(ClientError::AuthenticationRequired { url: spec.url.clone() });
            }
            let token = self.inner.session.token();
            let resp = self.send_once(&spec, token.as_deref()).await?;
            match self.classify(&spec, token.is_some(), resp)? {
                Outcome::Done(resp) => return Ok(resp),
                Outcome::Reauthenticate if spec.recursive => {
                    warn!(target: "starclient::http", url = %spec.url, "still unauthorized after login");
                    return Err(ClientError::AuthenticationRequired { url: spec.url.clone() });
                }
                Outcome::Reauthenticate => {
                    debug!(target: "starclient::http", url = %spec.url, "unauthorized; logging in again");
                    self.inner.login.forget_session();
                    spec.recursive = true;
                }
            }
        }
    }

    /// Body text of a successful call.
    pub async fn fetch_text(&self, spec: impl Into<RequestSpec>) -> ClientResult<String> {
        Ok(self.request(spec).await?.body)
    }

    /// JSON body of a successful call; an empty body reads as `{}`.
    pub async fn fetch_data<T: DeserializeOwned>(&self, spec: impl Into<RequestSpec>) -> ClientResult<T> {
        let resp = self.request(spec).await?;
        resp.json().map_err(|e| ClientError::InvalidRequest(format!("{}: {}", resp.url, e)))
    }

    fn resolve(&self, url: &str) -> ClientResult<Url> {
        let parsed = if url.starts_with("http://") || url.starts_with("https://") {
            Url::parse(url)
        } else {
            self.inner.base.join(url)
        };
        parsed.map_err(|e| ClientError::InvalidRequest(format!("{}: {}", url, e)))
    }

    async fn send_once(&self, spec: &RequestSpec, token: Option<&str>) -> ClientResult<Response> {
        let url = self.resolve(&spec.url)?;
        let mut req = self.inner.http.request(spec.method.clone(), url.clone());
        if let Some(token) = token {
            req = req.header(AUTH_TOKEN_HEADER, token);
        }
        if url.path() != STARS_PATH {
            if let Some(member) = self.inner.session.target_member() {
                req = req.header(STAR_TARGET_HEADER, member);
            }
        }
        let (body, add_json_type) = spec.body_text();
        if add_json_type {
            req = req.header(CONTENT_TYPE, "application/json");
        }
        for (name, value) in &spec.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::InvalidRequest(format!("header {}: {}", name, e)))?;
            req = req.header(name, value);
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let transport = |e: reqwest::Error| ClientError::Transport { url: url.to_string(), message: e.to_string() };
        let resp = req.send().await.map_err(transport)?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let final_url = resp.url().to_string();
        let body = resp.text().await.map_err(transport)?;
        debug!(target: "starclient::http", method = %spec.method, url = %url, status, retry = spec.recursive, "request");
        Ok(Response { status, headers, url: final_url, body })
    }

    fn classify(&self, spec: &RequestSpec, had_token: bool, resp: Response) -> ClientResult<Outcome> {
        match resp.status {
            401 => Ok(Outcome::Reauthenticate),
            403 if !had_token => Ok(Outcome::Reauthenticate),
            403 => {
                self.inner.session.downgrade_privilege();
                Err(ClientError::Forbidden { method: spec.method.to_string(), url: spec.url.clone() })
            }
            // Another member answering for a path it doesn't have; let the caller decide.
            404 if !self.inner.stars.is_on_local_star() => Ok(Outcome::Done(resp)),
            504 => Ok(Outcome::Done(resp)),
            s if (200..300).contains(&s) => Ok(Outcome::Done(resp)),
            s => {
                let reason = reqwest::StatusCode::from_u16(s).ok().and_then(|c| c.canonical_reason());
                let err = ServerError::from_response(&spec.url, s, reason, Some(&resp.url), &resp.body);
                if spec.show_error {
                    self.inner.errors.report(err.clone(), self.inner.login.is_negotiating());
                }
                Err(ClientError::Server(err))
            }
        }
    }
}
