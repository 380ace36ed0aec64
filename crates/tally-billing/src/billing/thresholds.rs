//! Usage threshold monitoring.
//!
//! Projects the invoice amount for a subscription's current period and
//! records crossings of configured monetary thresholds, at most once per
//! threshold per period.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregation::engine::AggregationEngine;
use crate::aggregation::event_source::EventFilters;
use crate::billing::period::BillingPeriod;
use crate::domain::charges::Charge;
use crate::domain::subscriptions::Subscription;
use crate::domain::thresholds::{AppliedUsageThreshold, UsageThreshold};
use crate::error::{BillingError, Result};
use crate::rating::{calculate_amount, AppliedCharge, RatingContext};
use crate::storage::catalog::{AppliedThresholdRepository, PlanRepository, ThresholdRepository};

/// A newly crossed threshold, carrying enough data for the caller to emit
/// a notification and raise a progressive invoice.
#[derive(Debug, Clone)]
pub struct ThresholdCrossing {
    pub threshold: UsageThreshold,
    pub applied: AppliedUsageThreshold,
}

pub struct UsageThresholdMonitor {
    engine: Arc<AggregationEngine>,
    plans: Arc<dyn PlanRepository>,
    thresholds: Arc<dyn ThresholdRepository>,
    applied: Arc<dyn AppliedThresholdRepository>,
}

impl UsageThresholdMonitor {
    pub fn new(
        engine: Arc<AggregationEngine>,
        plans: Arc<dyn PlanRepository>,
        thresholds: Arc<dyn ThresholdRepository>,
        applied: Arc<dyn AppliedThresholdRepository>,
    ) -> Self {
        Self {
            engine,
            plans,
            thresholds,
            applied,
        }
    }

    /// Projected invoice amount for the period: calculator output summed
    /// over every charge on the subscription's plan.
    pub async fn current_projected_amount(
        &self,
        subscription: &Subscription,
        period: &BillingPeriod,
    ) -> Result<Decimal> {
        let plan = self
            .plans
            .get_plan(&subscription.plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound {
                id: subscription.plan_id.to_string(),
            })?;

        let mut total = Decimal::ZERO;
        for charge in &plan.charges {
            if let Some(applied) = self.rate_charge(subscription, charge, period).await? {
                total += applied.amount;
            }
        }

        debug!(
            subscription = %subscription.id,
            projected = %total,
            "projected period amount"
        );
        Ok(total)
    }

    async fn rate_charge(
        &self,
        subscription: &Subscription,
        charge: &Charge,
        period: &BillingPeriod,
    ) -> Result<Option<AppliedCharge>> {
        let units = match &charge.metric_code {
            Some(code) => {
                self.engine
                    .aggregate(
                        code,
                        &subscription.external_customer_id,
                        period.start,
                        period.end,
                        EventFilters::new(),
                    )
                    .await?
                    .value
            }
            None => Decimal::ZERO,
        };

        let context = match (&charge.metric_code, charge.model.requires_events()) {
            (Some(code), true) => {
                let events = self
                    .engine
                    .raw_events(
                        code,
                        &subscription.external_customer_id,
                        period.start,
                        period.end,
                        EventFilters::new(),
                    )
                    .await?;
                RatingContext::with_events(events.into_iter().map(|e| e.properties).collect())
            }
            _ => RatingContext::default(),
        };

        calculate_amount(charge, units, &context)
    }

    /// Sweep effective thresholds ascending by amount and record every new
    /// crossing. A `recurring` threshold re-arms once a new period starts,
    /// purely because its crossing lookup is scoped to
    /// `crossed_at >= period_start`; a one-shot threshold is checked against
    /// all history and fires at most once ever.
    pub async fn check_thresholds(
        &self,
        subscription: &Subscription,
        period: &BillingPeriod,
    ) -> Result<Vec<ThresholdCrossing>> {
        let mut effective = self
            .thresholds
            .thresholds_for_subscription(&subscription.id)
            .await?;
        effective.extend(
            self.thresholds
                .thresholds_for_plan(&subscription.plan_id)
                .await?,
        );
        effective.sort_by_key(|threshold| threshold.amount_cents);

        if effective.is_empty() {
            return Ok(Vec::new());
        }

        let projected = self
            .current_projected_amount(subscription, period)
            .await?;
        let projected_cents = projected * Decimal::ONE_HUNDRED;

        let mut crossings = Vec::new();
        for threshold in effective {
            if projected_cents < Decimal::from(threshold.amount_cents) {
                // Sorted ascending: nothing further can be crossed.
                break;
            }
            let scope_start = if threshold.recurring {
                period.start
            } else {
                DateTime::<Utc>::MIN_UTC
            };
            if self
                .applied
                .crossed_since(&threshold.id, &subscription.id, scope_start)
                .await?
            {
                continue;
            }

            let applied = AppliedUsageThreshold {
                usage_threshold_id: threshold.id,
                subscription_id: subscription.id,
                crossed_at: Utc::now(),
                lifetime_usage_amount_cents: projected_cents
                    .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
                    .to_i64()
                    .unwrap_or(i64::MAX),
            };

            if self.applied.record_crossing(&applied, scope_start).await? {
                info!(
                    threshold = %threshold.id,
                    subscription = %subscription.id,
                    amount_cents = threshold.amount_cents,
                    "usage threshold crossed"
                );
                crossings.push(ThresholdCrossing { threshold, applied });
            }
        }

        Ok(crossings)
    }
}
