//! Admin session records tracked by the gateway, independent of the CMS's own
//! token lifetimes.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// Where a request came from, as far as the gateway can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub device_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        device_fingerprint: impl Into<String>,
        client: &ClientInfo,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_session_id(),
            user_id: user_id.into(),
            device_fingerprint: device_fingerprint.into(),
            created_at: now,
            last_activity: now,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 256 bits from the thread RNG, hex encoded.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    NotFound,
    Expired,
    FingerprintMismatch,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
}

impl SessionValidation {
    pub fn valid(session: Session) -> Self {
        Self {
            valid: true,
            session: Some(session),
            reason: None,
        }
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        Self {
            valid: false,
            session: None,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    /// Past expiry but not yet swept.
    pub expired_sessions: usize,
    pub unique_users: usize,
    pub total_security_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
}
