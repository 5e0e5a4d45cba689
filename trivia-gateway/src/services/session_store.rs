use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::models::{SecurityEvent, SecurityEventType, Session};

/// Result of looking a session up and recording activity on it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionLookup {
    Missing,
    /// The record was past expiry and has been removed.
    Expired(Session),
    /// The record is live but was issued to a different device; left untouched.
    FingerprintMismatch(Session),
    /// The record is live; `last_activity` has been bumped.
    Active(Session),
}

/// Storage for sessions and the security audit trail.
///
/// Implementations must make the per-id operations atomic: two concurrent
/// calls for the same session id never observe a half-applied update.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<(), anyhow::Error>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error>;

    /// Look up a session, dropping it if expired or bumping `last_activity`
    /// when the device fingerprint matches.
    async fn touch_session(
        &self,
        session_id: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionLookup, anyhow::Error>;

    async fn remove_session(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error>;

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>, anyhow::Error>;

    async fn all_sessions(&self) -> Result<Vec<Session>, anyhow::Error>;

    /// Remove every session expired at `now`, returning the removed records.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, anyhow::Error>;

    async fn append_event(&self, event: SecurityEvent) -> Result<(), anyhow::Error>;

    /// Newest first, optionally restricted to one user.
    async fn recent_events(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecurityEvent>, anyhow::Error>;

    async fn event_counts(&self) -> Result<BTreeMap<SecurityEventType, usize>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Process-local store. Everything is lost on restart.
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
    events: Mutex<VecDeque<SecurityEvent>>,
    event_retention: usize,
}

impl InMemorySessionStore {
    pub fn new(event_retention: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            events: Mutex::new(VecDeque::with_capacity(event_retention.min(1024))),
            event_retention: event_retention.max(1),
        }
    }

    fn events(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<SecurityEvent>>, anyhow::Error> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Security event log mutex poisoned: {}", e))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_session(&self, session: Session) -> Result<(), anyhow::Error> {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(anyhow::anyhow!("Session id collision")),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn touch_session(
        &self,
        session_id: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionLookup, anyhow::Error> {
        // get_mut holds the shard write lock for the whole check-and-update
        match self.sessions.get_mut(session_id) {
            None => return Ok(SessionLookup::Missing),
            Some(mut entry) => {
                if !entry.is_expired_at(now) {
                    if entry.device_fingerprint != fingerprint {
                        return Ok(SessionLookup::FingerprintMismatch(entry.clone()));
                    }
                    entry.last_activity = now;
                    return Ok(SessionLookup::Active(entry.clone()));
                }
            }
        }

        // Re-check under the removal lock; a concurrent sweep may have won.
        Ok(self
            .sessions
            .remove_if(session_id, |_, s| s.is_expired_at(now))
            .map(|(_, session)| SessionLookup::Expired(session))
            .unwrap_or(SessionLookup::Missing))
    }

    async fn remove_session(&self, session_id: &str) -> Result<Option<Session>, anyhow::Error> {
        Ok(self.sessions.remove(session_id).map(|(_, s)| s))
    }

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>, anyhow::Error> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn all_sessions(&self) -> Result<Vec<Session>, anyhow::Error> {
        Ok(self.sessions.iter().map(|e| e.value().clone()).collect())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, anyhow::Error> {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        Ok(candidates
            .into_iter()
            .filter_map(|id| {
                self.sessions
                    .remove_if(&id, |_, s| s.is_expired_at(now))
                    .map(|(_, s)| s)
            })
            .collect())
    }

    async fn append_event(&self, event: SecurityEvent) -> Result<(), anyhow::Error> {
        let mut events = self.events()?;
        while events.len() >= self.event_retention {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }

    async fn recent_events(
        &self,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SecurityEvent>, anyhow::Error> {
        let events = self.events()?;
        Ok(events
            .iter()
            .rev()
            .filter(|e| match user_id {
                Some(uid) => e.user_id.as_deref() == Some(uid),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn event_counts(&self) -> Result<BTreeMap<SecurityEventType, usize>, anyhow::Error> {
        let events = self.events()?;
        let mut counts = BTreeMap::new();
        for event in events.iter() {
            *counts.entry(event.event_type).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.events().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientInfo;
    use chrono::Duration;
    use serde_json::json;

    fn client() -> ClientInfo {
        ClientInfo {
            ip_address: "127.0.0.1".to_string(),
            user_agent: "unit-test".to_string(),
            fingerprint: "fp-1".to_string(),
        }
    }

    fn session(user: &str, ttl: Duration) -> Session {
        Session::new(user, "fp-1", &client(), ttl)
    }

    #[tokio::test]
    async fn touch_bumps_last_activity() {
        let store = InMemorySessionStore::default();
        let s = session("u1", Duration::hours(1));
        store.insert_session(s.clone()).await.unwrap();

        let later = s.created_at + Duration::minutes(5);
        match store.touch_session(&s.id, "fp-1", later).await.unwrap() {
            SessionLookup::Active(found) => assert_eq!(found.last_activity, later),
            other => panic!("expected active session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn touch_removes_expired_session() {
        let store = InMemorySessionStore::default();
        let s = session("u1", Duration::minutes(1));
        store.insert_session(s.clone()).await.unwrap();

        let after_expiry = s.expires_at + Duration::seconds(1);
        assert!(matches!(
            store.touch_session(&s.id, "fp-1", after_expiry).await.unwrap(),
            SessionLookup::Expired(_)
        ));
        assert_eq!(store.get_session(&s.id).await.unwrap(), None);
        assert_eq!(
            store.touch_session(&s.id, "fp-1", after_expiry).await.unwrap(),
            SessionLookup::Missing
        );
    }

    #[tokio::test]
    async fn touch_from_other_device_leaves_activity_alone() {
        let store = InMemorySessionStore::default();
        let s = session("u1", Duration::hours(1));
        store.insert_session(s.clone()).await.unwrap();

        let later = s.created_at + Duration::minutes(5);
        assert!(matches!(
            store.touch_session(&s.id, "fp-other", later).await.unwrap(),
            SessionLookup::FingerprintMismatch(_)
        ));
        let stored = store.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.last_activity, s.last_activity);
    }

    #[tokio::test]
    async fn remove_expired_keeps_live_sessions() {
        let store = InMemorySessionStore::default();
        let short = session("u1", Duration::minutes(1));
        let long = session("u1", Duration::hours(2));
        store.insert_session(short.clone()).await.unwrap();
        store.insert_session(long.clone()).await.unwrap();

        let removed = store
            .remove_expired(Utc::now() + Duration::minutes(30))
            .await
            .unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, short.id);
        assert!(store.get_session(&long.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn event_log_drops_oldest_beyond_retention() {
        let store = InMemorySessionStore::new(3);
        for i in 0..5 {
            store
                .append_event(SecurityEvent::new(
                    SecurityEventType::Login,
                    Some(format!("u{}", i)),
                    &client(),
                    json!({}),
                ))
                .await
                .unwrap();
        }

        let events = store.recent_events(None, 10).await.unwrap();
        let users: Vec<_> = events.iter().filter_map(|e| e.user_id.clone()).collect();
        assert_eq!(users, vec!["u4", "u3", "u2"]);
    }

    #[tokio::test]
    async fn recent_events_filters_by_user() {
        let store = InMemorySessionStore::default();
        for user in ["a", "b", "a"] {
            store
                .append_event(SecurityEvent::new(
                    SecurityEventType::Logout,
                    Some(user.to_string()),
                    &client(),
                    json!({}),
                ))
                .await
                .unwrap();
        }

        let events = store.recent_events(Some("a"), 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.user_id.as_deref() == Some("a")));

        let counts = store.event_counts().await.unwrap();
        assert_eq!(counts.get(&SecurityEventType::Logout), Some(&3));
    }
}
