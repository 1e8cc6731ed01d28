//! Subscription plans, limits, and quota ledger entries
//!
//! Plans are written by the billing collaborator (payment webhooks) and
//! read-only to the pipeline core. The quota ledger is a pure per-period
//! counter; limit enforcement lives in the entitlement gate.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Length of a quota/billing period in days (rolling window)
pub const PERIOD_DAYS: i64 = 30;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Pro,
    Business,
}

impl PlanType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Pro => "pro",
            PlanType::Business => "business",
        }
    }

    /// Per-period limits for this tier
    pub fn limits(self) -> PlanLimits {
        match self {
            PlanType::Free => PlanLimits {
                stl_downloads: Limit::Bounded(10),
                step_downloads: Limit::Bounded(0),
                manufacturing_quotes: Limit::Bounded(1),
            },
            PlanType::Pro => PlanLimits {
                stl_downloads: Limit::Bounded(30),
                step_downloads: Limit::Bounded(3),
                manufacturing_quotes: Limit::Bounded(5),
            },
            PlanType::Business => PlanLimits {
                stl_downloads: Limit::Unlimited,
                step_downloads: Limit::Bounded(10),
                manufacturing_quotes: Limit::Bounded(10),
            },
        }
    }
}

impl std::str::FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanType::Free),
            "pro" => Ok(PlanType::Pro),
            "business" => Ok(PlanType::Business),
            other => Err(format!("unknown plan type: {}", other)),
        }
    }
}

/// A per-period consumption limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(u32),
    Unlimited,
}

impl Limit {
    /// Whether one more unit may be consumed at the given current count
    pub fn allows(self, current_count: u32) -> bool {
        match self {
            Limit::Bounded(limit) => current_count < limit,
            Limit::Unlimited => true,
        }
    }

    /// Remaining units after a consumption that brought the count to
    /// `new_count`; None for unlimited.
    pub fn remaining_after(self, new_count: u32) -> Option<u32> {
        match self {
            Limit::Bounded(limit) => Some(limit.saturating_sub(new_count)),
            Limit::Unlimited => None,
        }
    }
}

/// Per-resource limits of one plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub stl_downloads: Limit,
    pub step_downloads: Limit,
    pub manufacturing_quotes: Limit,
}

impl PlanLimits {
    pub fn for_resource(&self, resource: ResourceType) -> Limit {
        match resource {
            ResourceType::Stl => self.stl_downloads,
            ResourceType::Step => self.step_downloads,
            ResourceType::ManufacturingQuote => self.manufacturing_quotes,
        }
    }
}

/// A quota-gated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Stl,
    Step,
    ManufacturingQuote,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Stl => "stl",
            ResourceType::Step => "step",
            ResourceType::ManufacturingQuote => "manufacturing_quote",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stl" => Ok(ResourceType::Stl),
            "step" => Ok(ResourceType::Step),
            "manufacturing_quote" => Ok(ResourceType::ManufacturingQuote),
            other => Err(format!("unknown resource type: {}", other)),
        }
    }
}

/// A user's subscription as written by the billing collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub user_id: String,
    pub plan_type: PlanType,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

impl SubscriptionPlan {
    /// Fresh free-tier subscription starting now (default for unknown users)
    pub fn free(user_id: String, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan_type: PlanType::Free,
            current_period_start: now,
            current_period_end: now + Duration::days(PERIOD_DAYS),
        }
    }
}

/// One per-user, per-resource consumption counter for a period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaLedgerEntry {
    pub user_id: String,
    pub resource_type: ResourceType,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub count: u32,
}
