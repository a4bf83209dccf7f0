use std::time::Duration;

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use hondana_core::error::AppError;
use hondana_core::models::{ItemKind, TtlPolicy};
use hondana_core::traits::ItemCache;
use sqlx::SqlitePool;

/// Repository for extracted results in the shared `cache` table.
#[derive(Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
    writes_enabled: bool,
}

impl ItemRepository {
    pub fn new(pool: SqlitePool, writes_enabled: bool) -> Self {
        Self {
            pool,
            writes_enabled,
        }
    }

    pub fn writes_enabled(&self) -> bool {
        self.writes_enabled
    }

    /// Expire rows of `(source, kind)` older than `ttl` relative to `now`,
    /// then look up the exact key.
    pub async fn get_at(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, AppError> {
        let cutoff = timestamp_key(expiry_cutoff(now, ttl));

        let expired = sqlx::query("DELETE FROM cache WHERE src = ? AND type = ? AND timestamp < ?")
            .bind(source)
            .bind(kind.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?
            .rows_affected();
        if expired > 0 {
            tracing::debug!(%source, %kind, expired, "Expired cached items");
        }

        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM cache WHERE src = ? AND id = ? AND type = ?")
                .bind(source)
                .bind(id)
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(data,)| data))
    }

    /// Insert or replace the row for `(source, id, kind)`, stamped with `now`.
    pub async fn put_at(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if !self.writes_enabled {
            tracing::debug!(%source, %kind, %id, "Cache writes disabled, skipping");
            return Ok(());
        }

        sqlx::query(
            "REPLACE INTO cache (src, id, type, data, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(source)
        .bind(id)
        .bind(kind.as_str())
        .bind(payload)
        .bind(timestamp_key(now))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Delete, for every kind, all rows older than that kind's TTL.
    /// Returns the number of rows removed.
    pub async fn prune(&self, policy: &TtlPolicy) -> Result<u64, AppError> {
        self.prune_at(policy, Utc::now()).await
    }

    pub async fn prune_at(&self, policy: &TtlPolicy, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut removed = 0;
        for kind in ItemKind::ALL {
            let cutoff = timestamp_key(expiry_cutoff(now, policy.for_kind(kind)));
            let rows = sqlx::query("DELETE FROM cache WHERE type = ? AND timestamp < ?")
                .bind(kind.as_str())
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?
                .rows_affected();
            if rows > 0 {
                tracing::info!(%kind, rows, "Pruned expired items");
            }
            removed += rows;
        }
        Ok(removed)
    }

    /// Number of rows, optionally narrowed to one source and/or kind.
    pub async fn count(&self, source: Option<&str>, kind: Option<ItemKind>) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM cache WHERE (?1 IS NULL OR src = ?1) AND (?2 IS NULL OR type = ?2)",
        )
        .bind(source)
        .bind(kind.map(|k| k.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    /// Stored timestamp of a row, if present.
    pub async fn timestamp_of(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
    ) -> Result<Option<i64>, AppError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT timestamp FROM cache WHERE src = ? AND id = ? AND type = ?")
                .bind(source)
                .bind(id)
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(ts,)| ts))
    }
}

impl ItemCache for ItemRepository {
    async fn get(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        ttl: Duration,
    ) -> Result<Option<String>, AppError> {
        self.get_at(source, id, kind, ttl, Utc::now()).await
    }

    async fn put(
        &self,
        source: &str,
        id: &str,
        kind: ItemKind,
        payload: &str,
    ) -> Result<(), AppError> {
        self.put_at(source, id, kind, payload, Utc::now()).await
    }
}

/// Encode a UTC time as the integer `YYYYMMDDHHMMSS`, so numeric order is
/// chronological order.
pub fn timestamp_key(time: DateTime<Utc>) -> i64 {
    i64::from(time.year()) * 10_000_000_000
        + i64::from(time.month()) * 100_000_000
        + i64::from(time.day()) * 1_000_000
        + i64::from(time.hour()) * 10_000
        + i64::from(time.minute()) * 100
        + i64::from(time.second())
}

fn expiry_cutoff(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
