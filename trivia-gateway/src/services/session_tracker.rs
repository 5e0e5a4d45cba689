//! Session lifecycle and the security audit trail.
//!
//! The tracker owns the rules (TTL, per-user cap, fail-closed validation,
//! which events get recorded); the [`SessionStore`] behind it only stores.

use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::models::{
    ClientInfo, InvalidReason, SecurityEvent, SecurityEventType, Session, SessionStats,
    SessionValidation,
};

use super::error::GatewayError;
use super::session_store::{SessionLookup, SessionStore};

pub const DEFAULT_EVENT_LIMIT: usize = 50;
pub const MAX_EVENT_LIMIT: usize = 500;

#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    max_sessions_per_user: usize,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration, max_sessions_per_user: usize) -> Self {
        Self {
            store,
            ttl,
            max_sessions_per_user,
        }
    }

    /// Issue a new session for `user_id`. Evicts the user's oldest sessions
    /// when the per-user cap would be exceeded.
    pub async fn create_session(
        &self,
        user_id: &str,
        device_fingerprint: &str,
        client: &ClientInfo,
    ) -> Result<Session, GatewayError> {
        let session = Session::new(user_id, device_fingerprint, client, self.ttl);
        self.store
            .insert_session(session.clone())
            .await
            .map_err(GatewayError::Store)?;

        if self.max_sessions_per_user > 0 {
            self.enforce_session_cap(user_id, &session.id).await?;
        }

        metrics::counter!("sessions_created_total").increment(1);
        tracing::debug!(user_id = %user_id, session_id = %session.id, "Session created");

        Ok(session)
    }

    async fn enforce_session_cap(&self, user_id: &str, keep: &str) -> Result<(), GatewayError> {
        let mut sessions = self
            .store
            .sessions_for_user(user_id)
            .await
            .map_err(GatewayError::Store)?;

        if sessions.len() <= self.max_sessions_per_user {
            return Ok(());
        }

        sessions.sort_by_key(|s| s.created_at);
        let excess = sessions.len() - self.max_sessions_per_user;

        for old in sessions.iter().filter(|s| s.id != keep).take(excess) {
            if self
                .store
                .remove_session(&old.id)
                .await
                .map_err(GatewayError::Store)?
                .is_some()
            {
                tracing::info!(
                    user_id = %user_id,
                    session_id = %old.id,
                    "Evicted oldest session over per-user limit"
                );
            }
        }

        Ok(())
    }

    /// Fail-closed lookup. Touches `last_activity` only on success.
    pub async fn validate_session(
        &self,
        session_id: &str,
        client: &ClientInfo,
    ) -> Result<SessionValidation, GatewayError> {
        let lookup = self
            .store
            .touch_session(session_id, &client.fingerprint, Utc::now())
            .await
            .map_err(GatewayError::Store)?;

        match lookup {
            SessionLookup::Missing => Ok(SessionValidation::invalid(InvalidReason::NotFound)),
            SessionLookup::Expired(session) => {
                self.log_security_event(SecurityEvent::new(
                    SecurityEventType::SessionExpired,
                    Some(session.user_id.clone()),
                    client,
                    json!({ "sessionId": session.id, "expiresAt": session.expires_at }),
                ))
                .await?;
                Ok(SessionValidation::invalid(InvalidReason::Expired))
            }
            SessionLookup::FingerprintMismatch(session) => {
                self.log_security_event(SecurityEvent::suspicious(
                    Some(&session.user_id),
                    "device_fingerprint_mismatch",
                    client,
                    json!({
                        "sessionId": session.id,
                        "originalIp": session.ip_address,
                        "originalUserAgent": session.user_agent,
                    }),
                ))
                .await?;
                Ok(SessionValidation::invalid(InvalidReason::FingerprintMismatch))
            }
            SessionLookup::Active(session) => Ok(SessionValidation::valid(session)),
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, GatewayError> {
        self.store
            .get_session(session_id)
            .await
            .map_err(GatewayError::Store)
    }

    /// Idempotent: returns the removed record, if there was one.
    pub async fn invalidate_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Session>, GatewayError> {
        let removed = self
            .store
            .remove_session(session_id)
            .await
            .map_err(GatewayError::Store)?;

        if let Some(session) = &removed {
            tracing::debug!(
                user_id = %session.user_id,
                session_id = %session.id,
                "Session invalidated"
            );
        }

        Ok(removed)
    }

    /// Unexpired sessions of one user, newest first.
    pub async fn get_user_active_sessions(
        &self,
        user_id: &str,
    ) -> Result<Vec<Session>, GatewayError> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .store
            .sessions_for_user(user_id)
            .await
            .map_err(GatewayError::Store)?
            .into_iter()
            .filter(|s| s.user_id == user_id && !s.is_expired_at(now))
            .collect();

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub async fn log_security_event(&self, event: SecurityEvent) -> Result<(), GatewayError> {
        let event_type = event.event_type.as_str();

        match event.severity {
            crate::models::Severity::Critical => tracing::warn!(
                event_type = event_type,
                user_id = ?event.user_id,
                ip = %event.ip_address,
                details = %event.details,
                "Security event"
            ),
            _ => tracing::info!(
                event_type = event_type,
                user_id = ?event.user_id,
                ip = %event.ip_address,
                details = %event.details,
                "Security event"
            ),
        }

        metrics::counter!("security_events_total", "type" => event_type).increment(1);

        self.store
            .append_event(event)
            .await
            .map_err(GatewayError::Store)
    }

    /// Newest first. `limit` is clamped to `1..=500`, defaulting to 50.
    pub async fn get_security_events(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SecurityEvent>, GatewayError> {
        let limit = limit
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .clamp(1, MAX_EVENT_LIMIT);

        self.store
            .recent_events(user_id, limit)
            .await
            .map_err(GatewayError::Store)
    }

    pub async fn get_session_stats(&self) -> Result<SessionStats, GatewayError> {
        let now = Utc::now();
        let sessions = self.store.all_sessions().await.map_err(GatewayError::Store)?;
        let counts = self.store.event_counts().await.map_err(GatewayError::Store)?;

        let expired_sessions = sessions.iter().filter(|s| s.is_expired_at(now)).count();
        let unique_users = sessions
            .iter()
            .filter(|s| !s.is_expired_at(now))
            .map(|s| s.user_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        Ok(SessionStats {
            total_sessions: sessions.len(),
            active_sessions: sessions.len() - expired_sessions,
            expired_sessions,
            unique_users,
            total_security_events: counts.values().sum(),
            events_by_type: counts
                .into_iter()
                .map(|(t, n)| (t.as_str().to_string(), n))
                .collect(),
        })
    }

    /// Remove every expired session, recording a `SESSION_EXPIRED` event for each.
    pub async fn cleanup_expired(&self) -> Result<usize, GatewayError> {
        let removed = self
            .store
            .remove_expired(Utc::now())
            .await
            .map_err(GatewayError::Store)?;

        for session in &removed {
            let client = ClientInfo {
                ip_address: session.ip_address.clone(),
                user_agent: session.user_agent.clone(),
                fingerprint: session.device_fingerprint.clone(),
            };
            self.log_security_event(SecurityEvent::new(
                SecurityEventType::SessionExpired,
                Some(session.user_id.clone()),
                &client,
                json!({ "sessionId": session.id, "reason": "sweep" }),
            ))
            .await?;
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Swept expired sessions");
        }

        Ok(removed.len())
    }

    pub async fn health_check(&self) -> Result<(), GatewayError> {
        self.store.health_check().await.map_err(GatewayError::Store)
    }
}

/// Runs [`SessionTracker::cleanup_expired`] on a fixed interval until aborted.
pub fn spawn_expiry_sweeper(
    tracker: SessionTracker,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can have expired yet.
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = tracker.cleanup_expired().await {
                tracing::error!(error = %e, "Session sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_store::InMemorySessionStore;

    fn client(fingerprint: &str) -> ClientInfo {
        ClientInfo {
            ip_address: "192.168.1.10".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            fingerprint: fingerprint.to_string(),
        }
    }

    fn tracker(ttl: Duration, cap: usize) -> SessionTracker {
        SessionTracker::new(Arc::new(InMemorySessionStore::new(1000)), ttl, cap)
    }

    #[tokio::test]
    async fn created_session_validates_until_invalidated() {
        let tracker = tracker(Duration::days(7), 10);
        let c = client("fp");
        let session = tracker.create_session("42", "fp", &c).await.unwrap();

        let first = tracker.validate_session(&session.id, &c).await.unwrap();
        assert!(first.valid);
        assert_eq!(first.session.unwrap().id, session.id);

        assert!(tracker.invalidate_session(&session.id).await.unwrap().is_some());
        assert!(tracker.invalidate_session(&session.id).await.unwrap().is_none());

        let after = tracker.validate_session(&session.id, &c).await.unwrap();
        assert!(!after.valid);
        assert_eq!(after.reason, Some(InvalidReason::NotFound));
    }

    #[tokio::test]
    async fn expired_session_is_removed_and_logged() {
        let tracker = tracker(Duration::zero(), 10);
        let c = client("fp");
        let session = tracker.create_session("42", "fp", &c).await.unwrap();

        let result = tracker.validate_session(&session.id, &c).await.unwrap();
        assert_eq!(result.reason, Some(InvalidReason::Expired));
        assert!(tracker.get_session(&session.id).await.unwrap().is_none());

        let events = tracker.get_security_events(Some("42"), None).await.unwrap();
        assert_eq!(events[0].event_type, SecurityEventType::SessionExpired);
    }

    #[tokio::test]
    async fn fingerprint_mismatch_fails_closed_and_keeps_record() {
        let tracker = tracker(Duration::hours(1), 10);
        let session = tracker
            .create_session("42", "fp-laptop", &client("fp-laptop"))
            .await
            .unwrap();

        let result = tracker
            .validate_session(&session.id, &client("fp-phone"))
            .await
            .unwrap();
        assert!(!result.valid);
        assert_eq!(result.reason, Some(InvalidReason::FingerprintMismatch));
        assert!(tracker.get_session(&session.id).await.unwrap().is_some());

        let events = tracker.get_security_events(None, None).await.unwrap();
        assert_eq!(events[0].event_type, SecurityEventType::SuspiciousActivity);
    }

    #[tokio::test]
    async fn active_sessions_are_scoped_to_user_and_newest_first() {
        let tracker = tracker(Duration::hours(1), 10);
        let c = client("fp");
        let a1 = tracker.create_session("alice", "fp", &c).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let a2 = tracker.create_session("alice", "fp", &c).await.unwrap();
        tracker.create_session("bob", "fp", &c).await.unwrap();

        let sessions = tracker.get_user_active_sessions("alice").await.unwrap();
        let ids: Vec<_> = sessions.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec![a2.id, a1.id]);
        assert!(sessions.iter().all(|s| s.user_id == "alice"));
    }

    #[tokio::test]
    async fn per_user_cap_evicts_oldest() {
        let tracker = tracker(Duration::hours(1), 2);
        let c = client("fp");
        let first = tracker.create_session("u", "fp", &c).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = tracker.create_session("u", "fp", &c).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let third = tracker.create_session("u", "fp", &c).await.unwrap();

        let ids: Vec<_> = tracker
            .get_user_active_sessions("u")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![third.id, second.id]);
        assert!(tracker.get_session(&first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn event_limit_is_clamped() {
        let tracker = tracker(Duration::hours(1), 10);
        for _ in 0..3 {
            tracker
                .log_security_event(SecurityEvent::failed_login(
                    "x",
                    "admin",
                    "bad",
                    &client("fp"),
                ))
                .await
                .unwrap();
        }

        assert_eq!(tracker.get_security_events(None, Some(0)).await.unwrap().len(), 1);
        let all = tracker.get_security_events(None, Some(10_000)).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn cleanup_and_stats() {
        let short = tracker(Duration::zero(), 10);
        let c = client("fp");
        short.create_session("a", "fp", &c).await.unwrap();
        short.create_session("b", "fp", &c).await.unwrap();

        let stats = short.get_session_stats().await.unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.expired_sessions, 2);
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.unique_users, 0);

        assert_eq!(short.cleanup_expired().await.unwrap(), 2);
        let stats = short.get_session_stats().await.unwrap();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.events_by_type.get("SESSION_EXPIRED"), Some(&2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn expired_session_is_removed_exactly_once_under_contention() {
        for _ in 0..50 {
            let tracker = tracker(Duration::zero(), 10);
            let c = client("fp");
            let session = tracker.create_session("u", "fp", &c).await.unwrap();

            let validate = tokio::spawn({
                let (tracker, id, c) = (tracker.clone(), session.id.clone(), c.clone());
                async move { tracker.validate_session(&id, &c).await.unwrap() }
            });
            let invalidate = tokio::spawn({
                let (tracker, id) = (tracker.clone(), session.id.clone());
                async move { tracker.invalidate_session(&id).await.unwrap() }
            });
            let sweep = tokio::spawn({
                let tracker = tracker.clone();
                async move { tracker.cleanup_expired().await.unwrap() }
            });

            let validated = validate.await.unwrap();
            let invalidated = invalidate.await.unwrap();
            let swept = sweep.await.unwrap();

            assert!(!validated.valid);
            let by_validate = usize::from(validated.reason == Some(InvalidReason::Expired));
            let by_invalidate = usize::from(invalidated.is_some());
            assert_eq!(by_validate + by_invalidate + swept, 1);

            let expired_events = tracker
                .get_security_events(Some("u"), None)
                .await
                .unwrap()
                .into_iter()
                .filter(|e| e.event_type == SecurityEventType::SessionExpired)
                .count();
            assert_eq!(expired_events, by_validate + swept);
            assert!(tracker.get_session(&session.id).await.unwrap().is_none());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn validation_never_revives_an_invalidated_session() {
        for _ in 0..50 {
            let tracker = tracker(Duration::hours(1), 10);
            let c = client("fp");
            let session = tracker.create_session("u", "fp", &c).await.unwrap();

            let validate = tokio::spawn({
                let (tracker, id, c) = (tracker.clone(), session.id.clone(), c.clone());
                async move { tracker.validate_session(&id, &c).await.unwrap() }
            });
            let invalidate = tokio::spawn({
                let (tracker, id) = (tracker.clone(), session.id.clone());
                async move { tracker.invalidate_session(&id).await.unwrap() }
            });

            let validated = validate.await.unwrap();
            assert!(invalidate.await.unwrap().is_some());
            if !validated.valid {
                assert_eq!(validated.reason, Some(InvalidReason::NotFound));
            }
            assert!(tracker.get_session(&session.id).await.unwrap().is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_sessions_on_each_tick() {
        let tracker = tracker(Duration::zero(), 10);
        let session = tracker.create_session("u", "fp", &client("fp")).await.unwrap();

        let sweeper = spawn_expiry_sweeper(tracker.clone(), std::time::Duration::from_secs(60));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(tracker.get_session(&session.id).await.unwrap().is_some());

        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(tracker.get_session(&session.id).await.unwrap().is_none());
        let events = tracker.get_security_events(Some("u"), None).await.unwrap();
        assert_eq!(events[0].event_type, SecurityEventType::SessionExpired);
        assert_eq!(events[0].details["reason"], "sweep");

        sweeper.abort();
    }
}
