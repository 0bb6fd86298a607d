//! Postgres-backed subscription ledger and config cache
//!
//! The subscription table is owned by the billing side; this service only
//! consults and flips it through the narrow `SubscriptionLedger` contract.
//! The cache table is ours.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;

use neor_types::{ConnectionDescriptor, LinkParseError};

use crate::traits::{ConfigCache, SubscriptionLedger};

/// Failure of a Postgres-backed ledger or cache operation.
#[derive(Debug, Error)]
pub enum PgError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("stored link is invalid: {0}")]
    Link(#[from] LinkParseError),
}

/// Create both tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            user_id  BIGINT PRIMARY KEY,
            active   BOOLEAN NOT NULL DEFAULT FALSE,
            end_date TIMESTAMPTZ
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS vpn_configs (
            user_id           BIGINT PRIMARY KEY,
            subscription_link TEXT NOT NULL,
            created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

// ── PgSubscriptionLedger ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgSubscriptionLedger {
    pool: PgPool,
}

impl PgSubscriptionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SubscriptionLedger for PgSubscriptionLedger {
    type Error = PgError;

    async fn is_active(&self, user_id: i64) -> Result<bool, PgError> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT active FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(active.unwrap_or(false))
    }

    async fn list_expired_active(&self) -> Result<Vec<i64>, PgError> {
        let users = sqlx::query_scalar(
            "SELECT user_id FROM subscriptions
             WHERE active AND end_date < NOW()
             ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn mark_inactive(&self, user_id: i64) -> Result<(), PgError> {
        sqlx::query(
            "UPDATE subscriptions
             SET active = FALSE, end_date = NULL
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn extend(&self, user_id: i64, months: u32) -> Result<DateTime<Utc>, PgError> {
        // Extension is anchored at whichever is later: now, or the current
        // expiry — paying early must not shorten a running subscription.
        let expires_at = sqlx::query_scalar(
            "INSERT INTO subscriptions (user_id, active, end_date)
             VALUES ($1, TRUE, NOW() + make_interval(months => $2))
             ON CONFLICT (user_id) DO UPDATE
                 SET active = TRUE,
                     end_date = GREATEST(subscriptions.end_date, NOW())
                                + make_interval(months => $2)
             RETURNING end_date",
        )
        .bind(user_id)
        .bind(i32::try_from(months).unwrap_or(i32::MAX))
        .fetch_one(&self.pool)
        .await?;
        Ok(expires_at)
    }
}

// ── PgConfigCache ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgConfigCache {
    pool: PgPool,
}

impl PgConfigCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ConfigCache for PgConfigCache {
    type Error = PgError;

    async fn get(&self, user_id: i64) -> Result<Option<ConnectionDescriptor>, PgError> {
        let link: Option<String> =
            sqlx::query_scalar("SELECT subscription_link FROM vpn_configs WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        link.map(|l| ConnectionDescriptor::parse(&l).map_err(PgError::from))
            .transpose()
    }

    async fn put(&self, user_id: i64, descriptor: &ConnectionDescriptor) -> Result<(), PgError> {
        sqlx::query(
            "INSERT INTO vpn_configs (user_id, subscription_link, created_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (user_id) DO UPDATE
                 SET subscription_link = EXCLUDED.subscription_link,
                     created_at = NOW()",
        )
        .bind(user_id)
        .bind(descriptor.to_link())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> Result<(), PgError> {
        sqlx::query("DELETE FROM vpn_configs WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
