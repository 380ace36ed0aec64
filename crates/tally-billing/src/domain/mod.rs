pub mod charges;
pub mod expression;
pub mod metrics;
pub mod subscriptions;
pub mod thresholds;
pub mod types;

pub use charges::{Charge, ChargeProperties, ChargeTier};
pub use metrics::BillableMetric;
pub use subscriptions::{Plan, Subscription};
pub use thresholds::{AppliedUsageThreshold, UsageThreshold};
pub use types::{
    AggregationType, BillingInterval, BillingTime, ChargeId, ChargeModel, CustomerId, MetricCode,
    PlanId, SubscriptionId, ThresholdId, UsageResult,
};
