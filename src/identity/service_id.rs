use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `group/name/version` identity of a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceIdentity {
    pub group: String,
    pub name: String,
    pub version: String,
    /// Canonical `group/name/version` text as received.
    pub combined: String,
}

impl ServiceIdentity {
    /// Split `group/name/version`. Missing parts read as `?`; `combined` keeps the input text,
    /// so parsing the serialized form of a parsed identity yields the same identity.
    pub fn parse(text: &str) -> Self {
        let source = if text.is_empty() { "?/?/?" } else { text };
        let mut parts = source.split('/');
        let mut next = || parts.next().unwrap_or("?").to_string();
        let group = next();
        let name = next();
        let version = next();
        ServiceIdentity { group, name, version, combined: text.to_string() }
    }

    /// Normalize whatever the backend put in an event's id field: a string, an already-parsed
    /// identity object, or garbage (which becomes the unknown identity).
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Object(map) if map.contains_key("name") => {
                let field = |k: &str| map.get(k).and_then(|v| v.as_str()).unwrap_or("?").to_string();
                let (group, name, version) = (field("group"), field("name"), field("version"));
                let combined = map
                    .get("combined")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}/{}/{}", group, name, version));
                ServiceIdentity { group, name, version, combined }
            }
            other => {
                tracing::debug!(target: "starclient::events", "service id is not a string: {}", other);
                Self::parse("")
            }
        }
    }
}

impl FromStr for ServiceIdentity {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(Self::parse(s)) }
}

impl Display for ServiceIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.combined) }
}

impl<'de> Deserialize<'de> for ServiceIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&v))
    }
}
