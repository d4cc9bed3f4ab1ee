//! Account and rate-limit storage
//!
//! HTTP handlers only see the [`UserStore`] and [`RateLimitStore`] traits,
//! injected through `AppState`. Production uses the SQLite implementations;
//! tests and single-process development can use the in-memory ones.

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryRateLimitStore, InMemoryUserStore};
pub use sqlite::{SqliteRateLimitStore, SqliteUserStore};

use async_trait::async_trait;
use beats_common::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Users and sessions
// ============================================================================

/// Registered account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Encoded password hash (never serialized)
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence for accounts and login sessions
///
/// Session tokens are never stored; callers pass the token's hash.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create an account
    ///
    /// Usernames are unique ignoring ASCII case; a taken name is
    /// [`beats_common::Error::Conflict`].
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User>;

    /// Look up an account by username (ASCII case-insensitive)
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Record a new session for `user_id`
    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Account owning an unexpired session, if any
    async fn resolve_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>>;

    /// Delete a session; returns whether it existed
    async fn revoke_session(&self, token_hash: &str) -> Result<bool>;
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Fixed-window attempt limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
}

/// Decision for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Further attempts are allowed
    Allowed { remaining: u32 },
    /// Attempts are blocked until the window resets
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, RateDecision::Limited { .. })
    }
}

/// Counter store for rate-limited actions (e.g. failed logins per username)
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Current decision for `key` without recording anything
    async fn check(&self, key: &str, policy: RateLimitPolicy, now: DateTime<Utc>)
        -> Result<RateDecision>;

    /// Record one attempt and return the decision that now applies
    async fn record(&self, key: &str, policy: RateLimitPolicy, now: DateTime<Utc>)
        -> Result<RateDecision>;

    /// Forget all attempts for `key`
    async fn reset(&self, key: &str) -> Result<()>;
}

/// Fixed-window counter state shared by both implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowCounter {
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

impl WindowCounter {
    fn window_end(&self, policy: RateLimitPolicy) -> DateTime<Utc> {
        chrono::Duration::from_std(policy.window)
            .ok()
            .and_then(|window| self.window_start.checked_add_signed(window))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Counter as seen at `now` (expired windows read as empty)
    pub fn current(entry: Option<Self>, policy: RateLimitPolicy, now: DateTime<Utc>) -> Option<Self> {
        entry.filter(|counter| now < counter.window_end(policy))
    }

    /// Counter after one more attempt at `now`
    pub fn incremented(entry: Option<Self>, policy: RateLimitPolicy, now: DateTime<Utc>) -> Self {
        match Self::current(entry, policy, now) {
            Some(counter) => Self {
                window_start: counter.window_start,
                count: counter.count.saturating_add(1),
            },
            None => Self {
                window_start: now,
                count: 1,
            },
        }
    }

    pub fn decision(entry: Option<Self>, policy: RateLimitPolicy, now: DateTime<Utc>) -> RateDecision {
        match Self::current(entry, policy, now) {
            Some(counter) if counter.count >= policy.max_attempts => RateDecision::Limited {
                retry_after: (counter.window_end(policy) - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            },
            Some(counter) => RateDecision::Allowed {
                remaining: policy.max_attempts - counter.count,
            },
            None => RateDecision::Allowed {
                remaining: policy.max_attempts,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            max_attempts: 3,
            window: Duration::from_secs(60),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_window_counter_limits_then_expires() {
        let mut entry = None;
        for i in 0..3 {
            entry = Some(WindowCounter::incremented(entry, policy(), at(i)));
        }

        assert_eq!(
            WindowCounter::decision(entry, policy(), at(10)),
            RateDecision::Limited {
                retry_after: Duration::from_secs(50)
            }
        );
        assert_eq!(
            WindowCounter::decision(entry, policy(), at(60)),
            RateDecision::Allowed { remaining: 3 }
        );

        let restarted = WindowCounter::incremented(entry, policy(), at(61));
        assert_eq!(restarted.count, 1);
        assert_eq!(restarted.window_start, at(61));
    }

    #[test]
    fn test_remaining_counts_down() {
        let entry = Some(WindowCounter::incremented(None, policy(), at(0)));
        assert_eq!(
            WindowCounter::decision(entry, policy(), at(1)),
            RateDecision::Allowed { remaining: 2 }
        );
    }
}
