//! In-process store implementations
//!
//! State lives in `RwLock<HashMap>`s and is lost on restart. Suitable for
//! tests and single-instance development only.

use super::{RateDecision, RateLimitPolicy, RateLimitStore, User, UserStore, WindowCounter};
use async_trait::async_trait;
use beats_common::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// [`UserStore`] backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let mut users = self.users.write().await;

        if users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username))
        {
            return Err(Error::Conflict(format!("Username '{}' is taken", username)));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.users.read().await.contains_key(&user_id) {
            return Err(Error::NotFound(format!("User {}", user_id)));
        }
        self.sessions.write().await.insert(
            token_hash.to_string(),
            SessionEntry {
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn resolve_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let entry = self.sessions.read().await.get(token_hash).cloned();
        match entry {
            Some(entry) if entry.expires_at > now => self.find_by_id(entry.user_id).await,
            Some(_) => {
                self.sessions.write().await.remove(token_hash);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn revoke_session(&self, token_hash: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(token_hash).is_some())
    }
}

/// [`RateLimitStore`] backed by process memory
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    counters: RwLock<HashMap<String, WindowCounter>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn check(
        &self,
        key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let entry = self.counters.read().await.get(key).copied();
        Ok(WindowCounter::decision(entry, policy, now))
    }

    async fn record(
        &self,
        key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let mut counters = self.counters.write().await;
        let updated = WindowCounter::incremented(counters.get(key).copied(), policy, now);
        counters.insert(key.to_string(), updated);
        Ok(WindowCounter::decision(Some(updated), policy, now))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.counters.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_usernames_unique_ignoring_case() {
        let store = InMemoryUserStore::new();
        store.create_user("Alice", "h").await.unwrap();

        let err = store.create_user("alice", "h").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let found = store.find_by_username("ALICE").await.unwrap().unwrap();
        assert_eq!(found.username, "Alice");
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = InMemoryUserStore::new();
        let user = store.create_user("bob", "h").await.unwrap();
        let now = Utc::now();

        store
            .create_session(user.id, "tokhash", now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let resolved = store.resolve_session("tokhash", now).await.unwrap();
        assert_eq!(resolved.map(|u| u.id), Some(user.id));

        let later = now + chrono::Duration::hours(2);
        assert!(store.resolve_session("tokhash", later).await.unwrap().is_none());

        assert!(!store.revoke_session("tokhash").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_for_unknown_user_rejected() {
        let store = InMemoryUserStore::new();
        let err = store
            .create_session(Uuid::new_v4(), "t", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_store_counts_and_resets() {
        let store = InMemoryRateLimitStore::new();
        let policy = RateLimitPolicy {
            max_attempts: 2,
            window: Duration::from_secs(60),
        };
        let now = Utc::now();

        assert_eq!(
            store.record("login:x", policy, now).await.unwrap(),
            RateDecision::Allowed { remaining: 1 }
        );
        assert!(store.record("login:x", policy, now).await.unwrap().is_limited());
        assert!(store.check("login:x", policy, now).await.unwrap().is_limited());
        assert!(!store.check("login:y", policy, now).await.unwrap().is_limited());

        store.reset("login:x").await.unwrap();
        assert_eq!(
            store.check("login:x", policy, now).await.unwrap(),
            RateDecision::Allowed { remaining: 2 }
        );
    }
}
