//! Subscription plan persistence
//!
//! Plans are written by the billing collaborator (payment webhooks); the
//! pipeline core only reads them. A user without a row reads as a fresh
//! free-tier subscription, which is materialized on first access.

use crate::models::{PlanType, SubscriptionPlan};
use chrono::{DateTime, Duration, Utc};
use fab_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::PERIOD_DAYS;

/// Fetch a user's subscription, materializing a free plan on first access
pub async fn get_or_create_plan(
    pool: &SqlitePool,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<SubscriptionPlan> {
    if let Some(plan) = load_plan(pool, user_id).await? {
        return Ok(plan);
    }

    let plan = SubscriptionPlan::free(user_id.to_string(), now);

    // A concurrent first access may have inserted already; the IGNORE keeps
    // this idempotent and the follow-up read returns whoever won.
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO subscriptions
            (user_id, plan_type, current_period_start, current_period_end, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(plan.plan_type.as_str())
    .bind(plan.current_period_start.to_rfc3339())
    .bind(plan.current_period_end.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    load_plan(pool, user_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Subscription vanished for user {}", user_id)))
}

/// Load a user's subscription if one exists
pub async fn load_plan(pool: &SqlitePool, user_id: &str) -> Result<Option<SubscriptionPlan>> {
    let row = sqlx::query(
        r#"
        SELECT user_id, plan_type, current_period_start, current_period_end
        FROM subscriptions
        WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let plan_type: String = row.get("plan_type");
            let plan_type: PlanType = plan_type
                .parse()
                .map_err(|e| Error::Internal(format!("Failed to parse plan_type: {}", e)))?;

            let start: String = row.get("current_period_start");
            let start = chrono::DateTime::parse_from_rfc3339(&start)
                .map_err(|e| Error::Internal(format!("Failed to parse period start: {}", e)))?
                .with_timezone(&Utc);

            let end: String = row.get("current_period_end");
            let end = chrono::DateTime::parse_from_rfc3339(&end)
                .map_err(|e| Error::Internal(format!("Failed to parse period end: {}", e)))?
                .with_timezone(&Utc);

            Ok(Some(SubscriptionPlan {
                user_id: row.get("user_id"),
                plan_type,
                current_period_start: start,
                current_period_end: end,
            }))
        }
        None => Ok(None),
    }
}

/// Upsert a user's plan (billing-webhook write path).
///
/// Plan changes reset the billing period, matching how the payment
/// collaborator reports subscription updates.
pub async fn upsert_plan(
    pool: &SqlitePool,
    user_id: &str,
    plan_type: PlanType,
    now: DateTime<Utc>,
) -> Result<SubscriptionPlan> {
    let period_start = now;
    let period_end = now + Duration::days(PERIOD_DAYS);

    sqlx::query(
        r#"
        INSERT INTO subscriptions
            (user_id, plan_type, current_period_start, current_period_end, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            plan_type = excluded.plan_type,
            current_period_start = excluded.current_period_start,
            current_period_end = excluded.current_period_end,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(plan_type.as_str())
    .bind(period_start.to_rfc3339())
    .bind(period_end.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(SubscriptionPlan {
        user_id: user_id.to_string(),
        plan_type,
        current_period_start: period_start,
        current_period_end: period_end,
    })
}
