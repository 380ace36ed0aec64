use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{PlanId, SubscriptionId, ThresholdId};
use crate::error::{BillingError, Result};

/// A monetary boundary that triggers early invoicing when projected usage
/// for the current period meets or exceeds it. Belongs to exactly one of
/// a plan or a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageThreshold {
    pub id: ThresholdId,
    pub plan_id: Option<PlanId>,
    pub subscription_id: Option<SubscriptionId>,
    pub amount_cents: i64,
    pub currency: String,
    pub recurring: bool,
}

impl UsageThreshold {
    pub fn for_plan(plan_id: PlanId, amount_cents: i64, currency: impl Into<String>) -> Self {
        Self {
            id: ThresholdId::new(),
            plan_id: Some(plan_id),
            subscription_id: None,
            amount_cents,
            currency: currency.into(),
            recurring: false,
        }
    }

    pub fn for_subscription(
        subscription_id: SubscriptionId,
        amount_cents: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: ThresholdId::new(),
            plan_id: None,
            subscription_id: Some(subscription_id),
            amount_cents,
            currency: currency.into(),
            recurring: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match (self.plan_id, self.subscription_id) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(BillingError::InvalidConfiguration {
                message: format!(
                    "threshold {} must belong to exactly one of plan or subscription",
                    self.id
                ),
            }),
        }
    }
}

/// Immutable record of one threshold crossing. Created at most once per
/// (threshold, subscription, billing period); recurring thresholds re-arm
/// because crossing lookups are scoped to `crossed_at >= period_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedUsageThreshold {
    pub usage_threshold_id: ThresholdId,
    pub subscription_id: SubscriptionId,
    pub crossed_at: DateTime<Utc>,
    pub lifetime_usage_amount_cents: i64,
}
