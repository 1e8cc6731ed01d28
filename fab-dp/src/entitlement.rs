//! Entitlement gate for quota-limited resources
//!
//! Decides whether a user may consume one unit of a gated resource (STL
//! download, STEP download, manufacturing quote) and records the consumption
//! atomically with the decision. The gate never starts the underlying work;
//! the orchestrator calls it first and proceeds only on a grant. A quota
//! unit consumed for work that later fails is not refunded.

use crate::db::{quota, subscriptions};
use crate::models::{Limit, PlanType, ResourceType, ANONYMOUS_OWNER, PERIOD_DAYS};
use chrono::{DateTime, Duration, Utc};
use fab_common::Result;
use sqlx::SqlitePool;

/// Outcome of an entitlement check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entitlement {
    pub allowed: bool,
    /// Units left in the period after this grant; None for unlimited plans
    pub remaining: Option<u32>,
}

impl Entitlement {
    fn denied() -> Self {
        Self {
            allowed: false,
            remaining: Some(0),
        }
    }
}

/// Per-resource usage for the entitlements summary
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceUsage {
    pub resource_type: ResourceType,
    pub used: u32,
    /// Plan limit; None for unlimited
    pub limit: Option<u32>,
    /// Units left; None for unlimited
    pub remaining: Option<u32>,
}

/// A user's plan and current-period consumption
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntitlementSummary {
    pub user_id: String,
    pub plan_type: PlanType,
    pub resources: Vec<ResourceUsage>,
}

/// The gate in front of all quota-limited operations
#[derive(Clone)]
pub struct EntitlementGate {
    db: SqlitePool,
}

impl EntitlementGate {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Authorize and record one unit of consumption.
    ///
    /// The limit check and the increment are a single conditional UPDATE, so
    /// concurrent requests for the same user and resource can never grant
    /// more than the plan limit within a period.
    pub async fn authorize(&self, user_id: &str, resource: ResourceType) -> Result<Entitlement> {
        if user_id == ANONYMOUS_OWNER || user_id.is_empty() {
            return Ok(Entitlement::denied());
        }

        let now = Utc::now();
        let plan = subscriptions::get_or_create_plan(&self.db, user_id, now).await?;
        let limit = plan.plan_type.limits().for_resource(resource);

        // A zero limit can never grant; don't touch the ledger
        if let Limit::Bounded(0) = limit {
            tracing::debug!(
                user_id,
                resource = %resource,
                plan = plan.plan_type.as_str(),
                "Resource not included in plan"
            );
            return Ok(Entitlement::denied());
        }

        let (period_start, period_end) = self.current_period(user_id, resource, &plan, now).await?;
        quota::ensure_entry(&self.db, user_id, resource, period_start, period_end).await?;

        match quota::try_consume(&self.db, user_id, resource, period_start, limit).await? {
            Some(new_count) => {
                let remaining = limit.remaining_after(new_count);
                tracing::info!(
                    user_id,
                    resource = %resource,
                    count = new_count,
                    remaining = ?remaining,
                    "Entitlement granted"
                );
                Ok(Entitlement {
                    allowed: true,
                    remaining,
                })
            }
            None => {
                tracing::info!(
                    user_id,
                    resource = %resource,
                    plan = plan.plan_type.as_str(),
                    "Entitlement denied: plan limit reached"
                );
                Ok(Entitlement::denied())
            }
        }
    }

    /// Plan and current-period usage across all gated resources
    pub async fn usage(&self, user_id: &str) -> Result<EntitlementSummary> {
        let now = Utc::now();
        let plan = subscriptions::get_or_create_plan(&self.db, user_id, now).await?;
        let limits = plan.plan_type.limits();

        let mut resources = Vec::new();
        for resource in [
            ResourceType::Stl,
            ResourceType::Step,
            ResourceType::ManufacturingQuote,
        ] {
            let used = quota::current_count(&self.db, user_id, resource, now).await?;
            let (limit, remaining) = match limits.for_resource(resource) {
                Limit::Bounded(max) => (Some(max), Some(max.saturating_sub(used))),
                Limit::Unlimited => (None, None),
            };
            resources.push(ResourceUsage {
                resource_type: resource,
                used,
                limit,
                remaining,
            });
        }

        Ok(EntitlementSummary {
            user_id: user_id.to_string(),
            plan_type: plan.plan_type,
            resources,
        })
    }

    /// Resolve the quota period containing `now`.
    ///
    /// Prefers the plan's billing period; when the billing period has lapsed
    /// without a webhook update, an existing ledger window containing `now`
    /// is reused, and failing that a fresh rolling window starts here.
    async fn current_period(
        &self,
        user_id: &str,
        resource: ResourceType,
        plan: &crate::models::SubscriptionPlan,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        if plan.current_period_start <= now && now < plan.current_period_end {
            return Ok((plan.current_period_start, plan.current_period_end));
        }

        if let Some(entry) = quota::find_current_entry(&self.db, user_id, resource, now).await? {
            return Ok((entry.period_start, entry.period_end));
        }

        Ok((now, now + Duration::days(PERIOD_DAYS)))
    }
}
