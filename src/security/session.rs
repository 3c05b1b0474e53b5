//! Session registry: live authenticated contexts keyed by session id.
//!
//! Both indexes (session-id → session, account-id → session-ids) live under
//! one read/write lock. A sweeper task removes expired sessions once per
//! minute, taking the write lock once per tick.

use crate::db::Account;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

/// Session lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
}

/// An authenticated context bound to one connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// 256-bit random id, hex-encoded.
    pub id: String,
    pub account: Account,
    pub address: String,
    pub key: Zeroizing<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Indexes {
    sessions: HashMap<String, Session>,
    by_account: HashMap<i64, HashSet<String>>,
}

/// Registry of live sessions with TTL-based expiry.
pub struct SessionRegistry {
    inner: RwLock<Indexes>,
    ttl: ChronoDuration,
}

impl SessionRegistry {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: RwLock::new(Indexes::default()),
            ttl: ChronoDuration::seconds(ttl_secs as i64),
        }
    }

    /// Create a session for an authenticated account.
    pub async fn create_session(
        &self,
        account: Account,
        address: String,
        key: Zeroizing<Vec<u8>>,
    ) -> Session {
        let now = Utc::now();
        let session = Session {
            id: generate_session_id(),
            account,
            address,
            key,
            created_at: now,
            last_activity: now,
            expires_at: now + self.ttl,
        };

        let mut inner = self.inner.write().await;
        inner
            .by_account
            .entry(session.account.id)
            .or_default()
            .insert(session.id.clone());
        inner.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Fetch a session if it exists and has not expired.
    pub async fn get_session(&self, session_id: &str) -> Result<Session, SessionError> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(session_id).ok_or(SessionError::NotFound)?;
        if Utc::now() > session.expires_at {
            return Err(SessionError::Expired);
        }
        Ok(session.clone())
    }

    /// Refresh last-activity and push the expiry out by one TTL.
    pub async fn touch_session(&self, session_id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or(SessionError::NotFound)?;
        let now = Utc::now();
        session.last_activity = now;
        session.expires_at = now + self.ttl;
        Ok(())
    }

    /// Remove a session from both indexes.
    pub async fn destroy_session(&self, session_id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .remove(session_id)
            .ok_or(SessionError::NotFound)?;
        unlink_account(&mut inner, session.account.id, session_id);
        Ok(())
    }

    /// Remove every session belonging to an account.
    pub async fn destroy_account_sessions(&self, account_id: i64) {
        let mut inner = self.inner.write().await;
        if let Some(ids) = inner.by_account.remove(&account_id) {
            for id in ids {
                inner.sessions.remove(&id);
            }
        }
    }

    /// Session ids currently held by an account.
    pub async fn account_sessions(&self, account_id: i64) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .by_account
            .get(&account_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// One sweep pass: drop every session whose expiry is in the past.
    /// Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let expired: Vec<(String, i64)> = inner
            .sessions
            .iter()
            .filter(|(_, s)| now > s.expires_at)
            .map(|(id, s)| (id.clone(), s.account.id))
            .collect();

        for (id, account_id) in &expired {
            inner.sessions.remove(id);
            unlink_account(&mut inner, *account_id, id);
        }
        expired.len()
    }
}

fn unlink_account(inner: &mut Indexes, account_id: i64, session_id: &str) {
    if let Some(ids) = inner.by_account.get_mut(&account_id) {
        ids.remove(session_id);
        if ids.is_empty() {
            inner.by_account.remove(&account_id);
        }
    }
}

/// Spawn the background sweeper, ticking once per minute until cancelled.
pub fn spawn_sweeper(registry: Arc<SessionRegistry>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = registry.sweep_expired().await;
                    if removed > 0 {
                        tracing::info!(removed, "Swept expired sessions");
                    }
                }
            }
        }
    });
}

/// 256 random bits, hex-encoded.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i64, name: &str) -> Account {
        Account {
            id,
            username: name.to_string(),
            password_hash: "0".repeat(64),
            password_salt: "0".repeat(32),
            created_at: 0,
            updated_at: 0,
            is_active: true,
            is_operator: false,
            last_login_at: None,
        }
    }

    fn key() -> Zeroizing<Vec<u8>> {
        Zeroizing::new(vec![7u8; 32])
    }

    #[tokio::test]
    async fn create_and_get() {
        let registry = SessionRegistry::new(3600);
        let session = registry
            .create_session(account(1, "alice"), "10.0.0.1".into(), key())
            .await;

        assert_eq!(session.id.len(), 64);
        assert_eq!(session.account.id, 1);

        let fetched = registry.get_session(&session.id).await.unwrap();
        assert_eq!(fetched.account.username, "alice");
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let registry = SessionRegistry::new(3600);
        assert_eq!(
            registry.get_session("deadbeef").await.unwrap_err(),
            SessionError::NotFound
        );
    }

    #[tokio::test]
    async fn expired_session_is_reported_and_swept() {
        let registry = SessionRegistry::new(0);
        let session = registry
            .create_session(account(1, "alice"), "10.0.0.1".into(), key())
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert_eq!(
            registry.get_session(&session.id).await.unwrap_err(),
            SessionError::Expired
        );

        assert_eq!(registry.sweep_expired().await, 1);
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(
            registry.get_session(&session.id).await.unwrap_err(),
            SessionError::NotFound
        );
    }

    #[tokio::test]
    async fn touch_extends_expiry() {
        let registry = SessionRegistry::new(3600);
        let session = registry
            .create_session(account(1, "alice"), "10.0.0.1".into(), key())
            .await;

        let before = registry.get_session(&session.id).await.unwrap().expires_at;
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        registry.touch_session(&session.id).await.unwrap();
        let after = registry.get_session(&session.id).await.unwrap().expires_at;
        assert!(after > before);
    }

    #[tokio::test]
    async fn destroy_removes_both_indexes() {
        let registry = SessionRegistry::new(3600);
        let s1 = registry
            .create_session(account(1, "alice"), "10.0.0.1".into(), key())
            .await;
        let s2 = registry
            .create_session(account(1, "alice"), "10.0.0.2".into(), key())
            .await;

        assert_eq!(registry.account_sessions(1).await.len(), 2);

        registry.destroy_session(&s1.id).await.unwrap();
        assert_eq!(registry.account_sessions(1).await, vec![s2.id.clone()]);

        // Second destroy of the same id reports NotFound.
        assert_eq!(
            registry.destroy_session(&s1.id).await.unwrap_err(),
            SessionError::NotFound
        );

        registry.destroy_account_sessions(1).await;
        assert_eq!(registry.active_count().await, 0);
        assert!(registry.account_sessions(1).await.is_empty());
    }
}
