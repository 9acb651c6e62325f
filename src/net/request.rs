use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One outbound call through the request client.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// Path relative to the client's base URL, or an absolute URL.
    pub url: String,
    pub method: Method,
    pub body: Option<String>,
    /// Serialized into `body` with a JSON content type unless `body` is already set.
    pub json_body: Option<Value>,
    /// Applied after the auth/target headers, so they can override them.
    pub headers: Vec<(String, String)>,
    /// Report non-2xx failures to the error sink.
    pub show_error: bool,
    /// Set on the single re-authentication retry. Never set by callers.
    pub(crate) recursive: bool,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            body: None,
            json_body: None,
            headers: Vec::new(),
            show_error: true,
            recursive: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self { Self::new(Method::GET, url) }
    pub fn post(url: impl Into<String>) -> Self { Self::new(Method::POST, url) }
    pub fn put(url: impl Into<String>) -> Self { Self::new(Method::PUT, url) }
    pub fn delete(url: impl Into<String>) -> Self { Self::new(Method::DELETE, url) }

    /// `["services", "core", "restart"]` -> `/services/core/restart`.
    pub fn path<S: AsRef<str>>(method: Method, segments: &[S]) -> Self {
        let joined = segments.iter().map(|s| s.as_ref().trim_matches('/')).collect::<Vec<_>>().join("/");
        Self::new(method, format!("/{}", joined))
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self { self.body = Some(body.into()); self }
    pub fn with_json(mut self, body: Value) -> Self { self.json_body = Some(body); self }
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
    pub fn show_error(mut self, show: bool) -> Self { self.show_error = show; self }

    pub fn is_retry(&self) -> bool { self.recursive }

    pub(crate) fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Final body text, plus whether a JSON content type should be added.
    pub(crate) fn body_text(&self) -> (Option<String>, bool) {
        match (&self.body, &self.json_body) {
            (Some(b), _) => (Some(b.clone()), false),
            (None, Some(Value::String(s))) => (Some(s.clone()), !self.has_header("content-type")),
            (None, Some(v)) => (Some(v.to_string()), !self.has_header("content-type")),
            (None, None) => (None, false),
        }
    }
}

impl From<&str> for RequestSpec {
    fn from(url: &str) -> Self { RequestSpec::get(url) }
}

impl From<String> for RequestSpec {
    fn from(url: String) -> Self { RequestSpec::get(url) }
}

/// Fully read response. Bodies here are small JSON/text documents.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub url: String,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decode the body as JSON; an empty body reads as `{}`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.body.trim().is_empty() {
            serde_json::from_str("{}")
        } else {
            serde_json::from_str(&self.body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_body_adds_content_type_unless_overridden() {
        let spec = RequestSpec::post("/x").with_json(json!({"a": 1}));
        assert_eq!(spec.body_text(), (Some(r#"{"a":1}"#.to_string()), true));
        let spec = RequestSpec::post("/x").with_json(json!("raw")).with_header("Content-Type", "text/plain");
        assert_eq!(spec.body_text(), (Some("raw".to_string()), false));
        let spec = RequestSpec::post("/x").with_body("b").with_json(json!({"ignored": true}));
        assert_eq!(spec.body_text(), (Some("b".to_string()), false));
    }

    #[test]
    fn path_segments_join() {
        let spec = RequestSpec::path(Method::POST, &["services", "/core/", "restart"]);
        assert_eq!(spec.url, "/services/core/restart");
        assert!(!spec.is_retry());
        assert!(spec.show_error);
    }

    #[test]
    fn empty_body_decodes_as_empty_object() {
        let r = Response { status: 200, headers: HeaderMap::new(), url: "/x".into(), body: " ".into() };
        let v: Value = r.json().unwrap();
        assert_eq!(v, json!({}));
    }
}
