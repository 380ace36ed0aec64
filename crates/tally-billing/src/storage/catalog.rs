//! Configuration catalog boundaries consumed by the engine and monitors.
//!
//! The core performs point lookups only; persistence of metrics, plans,
//! subscriptions, thresholds and invoices belongs to the surrounding
//! service. In-memory implementations back tests and embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::metrics::BillableMetric;
use crate::domain::subscriptions::{Plan, Subscription};
use crate::domain::thresholds::{AppliedUsageThreshold, UsageThreshold};
use crate::domain::types::{MetricCode, PlanId, SubscriptionId, ThresholdId};
use crate::error::Result;

#[async_trait]
pub trait MetricRepository: Send + Sync {
    async fn get_metric(&self, code: &MetricCode) -> Result<Option<BillableMetric>>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>>;
}

#[async_trait]
pub trait ThresholdRepository: Send + Sync {
    async fn thresholds_for_plan(&self, plan_id: &PlanId) -> Result<Vec<UsageThreshold>>;
    async fn thresholds_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<UsageThreshold>>;
}

/// Crossing records. The check-then-create pair is a single logical
/// operation: implementations must back `record_crossing` with a uniqueness
/// guarantee on (threshold, subscription, period), not in-process locking.
#[async_trait]
pub trait AppliedThresholdRepository: Send + Sync {
    /// Whether the threshold was already crossed in the current period.
    async fn crossed_since(
        &self,
        threshold_id: &ThresholdId,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record a crossing unless one already exists for the period. Returns
    /// whether this call created the record.
    async fn record_crossing(
        &self,
        applied: &AppliedUsageThreshold,
        period_start: DateTime<Utc>,
    ) -> Result<bool>;
}

/// A progressive invoice already issued for a subscription mid-period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveInvoice {
    pub subscription_id: SubscriptionId,
    pub issued_at: DateTime<Utc>,
    pub amount: Decimal,
    pub voided: bool,
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Total of non-voided progressive invoices issued in
    /// `[period_start, period_end)` for the subscription.
    async fn progressive_invoiced_total(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Decimal>;
}

/// In-memory metric/plan/subscription catalog for development and testing.
pub struct InMemoryCatalog {
    metrics: Arc<RwLock<HashMap<MetricCode, BillableMetric>>>,
    plans: Arc<RwLock<HashMap<PlanId, Plan>>>,
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(HashMap::new())),
            plans: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn add_metric(&self, metric: BillableMetric) {
        let mut metrics = self.metrics.write().await;
        metrics.insert(metric.code.clone(), metric);
    }

    pub async fn add_plan(&self, plan: Plan) {
        let mut plans = self.plans.write().await;
        plans.insert(plan.id, plan);
    }

    pub async fn add_subscription(&self, subscription: Subscription) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(subscription.id, subscription);
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricRepository for InMemoryCatalog {
    async fn get_metric(&self, code: &MetricCode) -> Result<Option<BillableMetric>> {
        let metrics = self.metrics.read().await;
        Ok(metrics.get(code).cloned())
    }
}

#[async_trait]
impl PlanRepository for InMemoryCatalog {
    async fn get_plan(&self, id: &PlanId) -> Result<Option<Plan>> {
        let plans = self.plans.read().await;
        Ok(plans.get(id).cloned())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryCatalog {
    async fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(id).cloned())
    }
}

/// In-memory threshold definitions and crossing records.
pub struct InMemoryThresholdStore {
    thresholds: Arc<RwLock<Vec<UsageThreshold>>>,
    applied: Arc<RwLock<Vec<AppliedUsageThreshold>>>,
}

impl InMemoryThresholdStore {
    pub fn new() -> Self {
        Self {
            thresholds: Arc::new(RwLock::new(Vec::new())),
            applied: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn add_threshold(&self, threshold: UsageThreshold) {
        let mut thresholds = self.thresholds.write().await;
        thresholds.push(threshold);
    }

    pub async fn applied_thresholds(&self) -> Vec<AppliedUsageThreshold> {
        let applied = self.applied.read().await;
        applied.clone()
    }
}

impl Default for InMemoryThresholdStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThresholdRepository for InMemoryThresholdStore {
    async fn thresholds_for_plan(&self, plan_id: &PlanId) -> Result<Vec<UsageThreshold>> {
        let thresholds = self.thresholds.read().await;
        Ok(thresholds
            .iter()
            .filter(|threshold| threshold.plan_id.as_ref() == Some(plan_id))
            .cloned()
            .collect())
    }

    async fn thresholds_for_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<UsageThreshold>> {
        let thresholds = self.thresholds.read().await;
        Ok(thresholds
            .iter()
            .filter(|threshold| threshold.subscription_id.as_ref() == Some(subscription_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AppliedThresholdRepository for InMemoryThresholdStore {
    async fn crossed_since(
        &self,
        threshold_id: &ThresholdId,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
    ) -> Result<bool> {
        let applied = self.applied.read().await;
        Ok(applied.iter().any(|record| {
            record.usage_threshold_id == *threshold_id
                && record.subscription_id == *subscription_id
                && record.crossed_at >= period_start
        }))
    }

    async fn record_crossing(
        &self,
        applied: &AppliedUsageThreshold,
        period_start: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.applied.write().await;
        let exists = records.iter().any(|record| {
            record.usage_threshold_id == applied.usage_threshold_id
                && record.subscription_id == applied.subscription_id
                && record.crossed_at >= period_start
        });
        if exists {
            return Ok(false);
        }
        records.push(applied.clone());
        Ok(true)
    }
}

/// In-memory progressive invoice ledger.
pub struct InMemoryInvoiceLedger {
    invoices: Arc<RwLock<Vec<ProgressiveInvoice>>>,
}

impl InMemoryInvoiceLedger {
    pub fn new() -> Self {
        Self {
            invoices: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn add_invoice(&self, invoice: ProgressiveInvoice) {
        let mut invoices = self.invoices.write().await;
        invoices.push(invoice);
    }
}

impl Default for InMemoryInvoiceLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceLedger {
    async fn progressive_invoiced_total(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Decimal> {
        let invoices = self.invoices.read().await;
        Ok(invoices
            .iter()
            .filter(|invoice| {
                !invoice.voided
                    && invoice.subscription_id == *subscription_id
                    && invoice.issued_at >= period_start
                    && invoice.issued_at < period_end
            })
            .map(|invoice| invoice.amount)
            .sum())
    }
}
