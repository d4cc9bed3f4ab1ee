//! SQLite store implementations
//!
//! Tables are created by [`crate::db::init_tables`].

use super::{RateDecision, RateLimitPolicy, RateLimitStore, User, UserStore, WindowCounter};
use async_trait::async_trait;
use beats_common::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// [`UserStore`] persisted in the `users` and `sessions` tables
#[derive(Debug, Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Failed to parse user id: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(User {
        id,
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        created_at,
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::Internal(format!("Timestamp out of range: {}", millis)))
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::Conflict(format!("Username '{}' is taken", username)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, created_at FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(expires_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                Err(Error::NotFound(format!("User {}", user_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_session(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.username, u.password_hash, u.created_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = ? AND s.expires_at_ms > ?
            "#,
        )
        .bind(token_hash)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            // Opportunistic cleanup of expired sessions
            sqlx::query("DELETE FROM sessions WHERE expires_at_ms <= ?")
                .bind(now.timestamp_millis())
                .execute(&self.pool)
                .await?;
        }

        row.as_ref().map(user_from_row).transpose()
    }

    async fn revoke_session(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// [`RateLimitStore`] persisted in the `rate_limits` table
#[derive(Debug, Clone)]
pub struct SqliteRateLimitStore {
    pool: SqlitePool,
}

impl SqliteRateLimitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load<'e, E>(executor: E, key: &str) -> Result<Option<WindowCounter>>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let row = sqlx::query("SELECT window_start_ms, count FROM rate_limits WHERE key = ?")
            .bind(key)
            .fetch_optional(executor)
            .await?;

        match row {
            Some(row) => {
                let window_start_ms: i64 = row.get("window_start_ms");
                let count: i64 = row.get("count");
                Ok(Some(WindowCounter {
                    window_start: millis_to_datetime(window_start_ms)?,
                    count: u32::try_from(count).unwrap_or(u32::MAX),
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn check(
        &self,
        key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let entry = Self::load(&self.pool, key).await?;
        Ok(WindowCounter::decision(entry, policy, now))
    }

    async fn record(
        &self,
        key: &str,
        policy: RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        // Read-modify-write inside one transaction
        let mut tx = self.pool.begin().await?;

        let updated = WindowCounter::incremented(Self::load(&mut *tx, key).await?, policy, now);

        sqlx::query(
            r#"
            INSERT INTO rate_limits (key, window_start_ms, count) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                window_start_ms = excluded.window_start_ms,
                count = excluded.count
            "#,
        )
        .bind(key)
        .bind(updated.window_start.timestamp_millis())
        .bind(updated.count as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(WindowCounter::decision(Some(updated), policy, now))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM rate_limits WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
