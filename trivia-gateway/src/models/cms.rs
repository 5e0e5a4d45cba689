//! The slice of the CMS's auth payloads the gateway reads. Everything else in
//! the CMS schema is passed through untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmsUser {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Value>>,
    #[serde(default)]
    pub blocked: Option<bool>,
}

impl CmsUser {
    /// Lowercased role identifiers from `role` and `roles[]`. Each entry may be
    /// a bare string or an object carrying `type`, `code` or `name`.
    pub fn role_names(&self) -> Vec<String> {
        self.role
            .iter()
            .chain(self.roles.iter().flatten())
            .flat_map(role_labels)
            .collect()
    }

    pub fn has_any_role(&self, allowed: &[String]) -> bool {
        self.role_names().iter().any(|r| allowed.contains(r))
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.unwrap_or(false)
    }

    /// Best human-readable identifier for logs.
    pub fn label(&self) -> &str {
        self.email
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}

fn role_labels(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.to_lowercase()],
        Value::Object(map) => ["type", "code", "name"]
            .iter()
            .filter_map(|k| map.get(*k).and_then(Value::as_str))
            .map(|s| s.to_lowercase())
            .collect(),
        _ => Vec::new(),
    }
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// Login/refresh answer from the CMS.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsAuthResponse {
    pub jwt: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: CmsUser,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsRefreshResponse {
    pub jwt: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Opaque token pair issued by the CMS and relayed through cookies.
#[derive(Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}
