//! Quota ledger persistence
//!
//! The ledger is a pure per-(user, resource, period) counter. Consumption is
//! a single conditional UPDATE so concurrent grants can never exceed the
//! limit; limit policy itself lives in the entitlement gate.

use crate::models::{Limit, QuotaLedgerEntry, ResourceType};
use crate::retry::RetryPolicy;
use chrono::{DateTime, TimeZone, Utc};
use fab_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Find the ledger entry whose period contains `now`, if any
pub async fn find_current_entry(
    pool: &SqlitePool,
    user_id: &str,
    resource: ResourceType,
    now: DateTime<Utc>,
) -> Result<Option<QuotaLedgerEntry>> {
    let now_epoch = now.timestamp();

    // Plan changes reset the period, which can leave an older window still
    // containing now; the newest window is the active one.
    let row = sqlx::query(
        r#"
        SELECT user_id, resource_type, period_start, period_end, count
        FROM quota_ledger
        WHERE user_id = ? AND resource_type = ?
          AND period_start <= ? AND period_end > ?
        ORDER BY period_start DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(resource.as_str())
    .bind(now_epoch)
    .bind(now_epoch)
    .fetch_optional(pool)
    .await?;

    row.map(entry_from_row).transpose()
}

/// Create a zero-count entry for the period if none exists yet
pub async fn ensure_entry(
    pool: &SqlitePool,
    user_id: &str,
    resource: ResourceType,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO quota_ledger
            (user_id, resource_type, period_start, period_end, count, updated_at)
        VALUES (?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(user_id)
    .bind(resource.as_str())
    .bind(period_start.timestamp())
    .bind(period_end.timestamp())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Atomically consume one unit against the entry for `period_start`.
///
/// The increment and the limit check are one statement; under concurrent
/// requests for the same user and resource, at most `limit` total grants
/// succeed within a period. Returns the count after the increment, or None
/// when the limit blocked the grant.
pub async fn try_consume(
    pool: &SqlitePool,
    user_id: &str,
    resource: ResourceType,
    period_start: DateTime<Utc>,
    limit: Limit,
) -> Result<Option<u32>> {
    let period_epoch = period_start.timestamp();
    let updated_at = Utc::now().to_rfc3339();

    let new_count: Option<i64> = RetryPolicy::db_lock()
        .run("quota_consume", super::is_lock_error, |_| async {
            let query = match limit {
                Limit::Bounded(max) => sqlx::query_scalar(
                    r#"
                    UPDATE quota_ledger
                    SET count = count + 1, updated_at = ?
                    WHERE user_id = ? AND resource_type = ? AND period_start = ?
                      AND count < ?
                    RETURNING count
                    "#,
                )
                .bind(&updated_at)
                .bind(user_id)
                .bind(resource.as_str())
                .bind(period_epoch)
                .bind(max as i64),
                Limit::Unlimited => sqlx::query_scalar(
                    r#"
                    UPDATE quota_ledger
                    SET count = count + 1, updated_at = ?
                    WHERE user_id = ? AND resource_type = ? AND period_start = ?
                    RETURNING count
                    "#,
                )
                .bind(&updated_at)
                .bind(user_id)
                .bind(resource.as_str())
                .bind(period_epoch),
            };

            query.fetch_optional(pool).await.map_err(Error::Database)
        })
        .await
        .map_err(|e| e.into_inner())?;

    Ok(new_count.map(|c| c as u32))
}

/// Current-period consumption for usage reporting (0 when no entry exists)
pub async fn current_count(
    pool: &SqlitePool,
    user_id: &str,
    resource: ResourceType,
    now: DateTime<Utc>,
) -> Result<u32> {
    Ok(find_current_entry(pool, user_id, resource, now)
        .await?
        .map(|entry| entry.count)
        .unwrap_or(0))
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<QuotaLedgerEntry> {
    let resource_type: String = row.get("resource_type");
    let resource_type: ResourceType = resource_type
        .parse()
        .map_err(|e| Error::Internal(format!("Failed to parse resource_type: {}", e)))?;

    let period_start: i64 = row.get("period_start");
    let period_end: i64 = row.get("period_end");
    let count: i64 = row.get("count");

    Ok(QuotaLedgerEntry {
        user_id: row.get("user_id"),
        resource_type,
        period_start: Utc
            .timestamp_opt(period_start, 0)
            .single()
            .ok_or_else(|| Error::Internal("Invalid period_start timestamp".to_string()))?,
        period_end: Utc
            .timestamp_opt(period_end, 0)
            .single()
            .ok_or_else(|| Error::Internal("Invalid period_end timestamp".to_string()))?,
        count: count as u32,
    })
}
