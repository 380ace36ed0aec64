use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::charges::Charge;
use crate::domain::types::{BillingInterval, BillingTime, CustomerId, PlanId, SubscriptionId};

/// A priced plan: base fee plus usage charges billed on one interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub interval: BillingInterval,
    pub amount_cents: i64,
    pub currency: String,
    pub charges: Vec<Charge>,
}

impl Plan {
    pub fn new(name: impl Into<String>, interval: BillingInterval, amount_cents: i64) -> Self {
        Self {
            id: PlanId::new(),
            name: name.into(),
            interval,
            amount_cents,
            currency: "USD".to_string(),
            charges: Vec::new(),
        }
    }
}

/// A customer's enrollment on a plan.
///
/// The metering core never mutates a subscription; lifecycle transitions
/// belong to the surrounding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub external_customer_id: CustomerId,
    pub plan_id: PlanId,
    pub previous_plan_id: Option<PlanId>,
    pub billing_time: BillingTime,
    pub subscription_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ending_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub trial_period_days: u32,
    pub trial_ended_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(
        external_customer_id: CustomerId,
        plan_id: PlanId,
        billing_time: BillingTime,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            external_customer_id,
            plan_id,
            previous_plan_id: None,
            billing_time,
            subscription_at: Some(started_at),
            started_at: Some(started_at),
            ending_at: None,
            created_at: started_at,
            trial_period_days: 0,
            trial_ended_at: None,
        }
    }

    /// Instant anniversary periods anchor to: first non-null of
    /// `started_at`, `subscription_at`, `created_at`.
    pub fn period_anchor(&self) -> DateTime<Utc> {
        self.started_at
            .or(self.subscription_at)
            .unwrap_or(self.created_at)
    }

    /// Instant the trial clock starts from, if the subscription has begun.
    pub fn trial_anchor(&self) -> Option<DateTime<Utc>> {
        self.started_at.or(self.subscription_at)
    }

    /// A subscription is in trial iff a trial is configured, not explicitly
    /// ended, and `now` precedes anchor + trial days.
    pub fn is_in_trial(&self, now: DateTime<Utc>) -> bool {
        if self.trial_period_days == 0 || self.trial_ended_at.is_some() {
            return false;
        }
        match self.trial_end_date() {
            Some(end) => now < end,
            None => false,
        }
    }

    /// End of the configured trial; `None` when no anchor instant exists.
    pub fn trial_end_date(&self) -> Option<DateTime<Utc>> {
        if self.trial_period_days == 0 {
            return None;
        }
        self.trial_anchor()
            .map(|anchor| anchor + Duration::days(i64::from(self.trial_period_days)))
    }
}
