use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    #[serde(default = "UserInfo::default_id")]
    pub id: String,
    #[serde(default = "UserInfo::default_name")]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserInfo {
    fn default_id() -> String { "0".to_string() }
    fn default_name() -> String { "unknown".to_string() }

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Self::default_id(),
            name: if name.is_empty() { Self::default_name() } else { name },
            email: String::new(),
            roles: Vec::new(),
        }
    }
}

/// `/whoami` reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhoAmI {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl WhoAmI {
    pub fn into_user(self) -> (String, UserInfo) {
        let mut user = UserInfo::named(self.name.unwrap_or_default());
        if let Some(id) = self.id.filter(|s| !s.is_empty()) { user.id = id; }
        user.email = self.email.unwrap_or_default();
        user.roles = self.roles;
        (self.token, user)
    }
}
