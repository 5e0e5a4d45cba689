//! Security audit trail entries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::session::ClientInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    Login,
    Logout,
    FailedLogin,
    SuspiciousActivity,
    SessionExpired,
    SessionRevoked,
    TokenRefreshed,
    AccessDenied,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::Login => "LOGIN",
            SecurityEventType::Logout => "LOGOUT",
            SecurityEventType::FailedLogin => "FAILED_LOGIN",
            SecurityEventType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            SecurityEventType::SessionExpired => "SESSION_EXPIRED",
            SecurityEventType::SessionRevoked => "SESSION_REVOKED",
            SecurityEventType::TokenRefreshed => "TOKEN_REFRESHED",
            SecurityEventType::AccessDenied => "ACCESS_DENIED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SecurityEventType::Login
            | SecurityEventType::Logout
            | SecurityEventType::SessionExpired
            | SecurityEventType::SessionRevoked
            | SecurityEventType::TokenRefreshed => Severity::Info,
            SecurityEventType::FailedLogin | SecurityEventType::AccessDenied => Severity::Warning,
            SecurityEventType::SuspiciousActivity => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        user_id: Option<String>,
        client: &ClientInfo,
        details: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            severity: event_type.severity(),
            user_id,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            timestamp: Utc::now(),
            details,
        }
    }

    pub fn login(user_id: &str, session_id: &str, audience: &str, client: &ClientInfo) -> Self {
        Self::new(
            SecurityEventType::Login,
            Some(user_id.to_string()),
            client,
            json!({ "sessionId": session_id, "audience": audience }),
        )
    }

    pub fn failed_login(
        identifier: &str,
        audience: &str,
        reason: &str,
        client: &ClientInfo,
    ) -> Self {
        Self::new(
            SecurityEventType::FailedLogin,
            None,
            client,
            json!({ "identifier": identifier, "audience": audience, "reason": reason }),
        )
    }

    pub fn suspicious(
        user_id: Option<&str>,
        reason: &str,
        client: &ClientInfo,
        extra: Value,
    ) -> Self {
        Self::new(
            SecurityEventType::SuspiciousActivity,
            user_id.map(|s| s.to_string()),
            client,
            json!({ "reason": reason, "context": extra }),
        )
    }

    pub fn access_denied(user_id: Option<&str>, resource: &str, client: &ClientInfo) -> Self {
        Self::new(
            SecurityEventType::AccessDenied,
            user_id.map(|s| s.to_string()),
            client,
            json!({ "resource": resource }),
        )
    }
}
