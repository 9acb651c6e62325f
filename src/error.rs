//! Client error model and server error normalization.
//! `ClientError` is what callers of the request client see; `ServerError` is the structured
//! shape every unexpected non-2xx response is normalized into before it reaches the error sink.

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// 401, or 403 without a token, that survived the single re-authentication retry
    /// (or a login negotiation that could not produce a session).
    #[error("authentication required for {url}")]
    AuthenticationRequired { url: String },
    /// 403 while a token was present. The cached admin flag has been downgraded.
    #[error("user is not allowed to {method} {url}")]
    Forbidden { method: String, url: String },
    #[error("{0}")]
    Server(ServerError),
    #[error("transport error on {url}: {message}")]
    Transport { url: String, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::AuthenticationRequired { .. } => Some(401),
            ClientError::Forbidden { .. } => Some(403),
            ClientError::Server(e) => Some(e.status),
            ClientError::Transport { .. } | ClientError::InvalidRequest(_) => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::AuthenticationRequired { .. } | ClientError::Forbidden { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Normalized non-2xx response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Local date-time text, rendered from the server's epoch-millis or RFC 3339 value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Any other fields the server put in its error body (stacktrace, service, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerError {
    /// Build from a raw response. A JSON object body replaces the text-derived fields;
    /// `url` always ends up pointing at the request when the body names a different path.
    pub fn from_response(
        request_url: &str,
        status: u16,
        status_text: Option<&str>,
        response_url: Option<&str>,
        body: &str,
    ) -> Self {
        let mut err = ServerError {
            error: (!body.is_empty()).then(|| body.to_string()),
            status,
            status_text: status_text.map(str::to_string),
            url: response_url.map(str::to_string),
            ..Default::default()
        };
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
            err = Self::from_json_object(map, status);
        }
        if err.path.as_deref() != Some(request_url) {
            err.url = Some(request_url.to_string());
        }
        err
    }

    /// Error raised by the client itself (login failures and the like).
    pub fn local(message: impl Into<String>) -> Self {
        ServerError { error: Some(message.into()), ..Default::default() }
    }

    fn from_json_object(mut map: Map<String, Value>, http_status: u16) -> Self {
        let mut take_str = |key: &str| -> Option<String> {
            match map.remove(key)? {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            }
        };
        let error = take_str("error");
        let message = take_str("message");
        let status_text = take_str("statusText");
        let url = take_str("url");
        let path = take_str("path");
        let status = map
            .remove("status")
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(http_status);
        let timestamp = map.remove("timestamp").and_then(|v| render_timestamp(&v));
        ServerError { error, message, status, status_text, url, path, timestamp, extra: map }
    }

    pub fn message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .or_else(|| self.status_text.clone())
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message())?;
        if let Some(url) = &self.url {
            write!(f, " ({})", url)?;
        }
        Ok(())
    }
}

fn render_timestamp(v: &Value) -> Option<String> {
    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    match v {
        Value::Number(n) => {
            let millis = n.as_i64()?;
            Local.timestamp_millis_opt(millis).single().map(|dt| dt.format(FORMAT).to_string())
        }
        Value::String(s) => Some(
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Local).format(FORMAT).to_string())
                .unwrap_or_else(|_| s.clone()),
        ),
        _ => None,
    }
}
