use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Customer identifier as known to the external system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Billable metric code, unique per deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricCode(String);

impl MetricCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Plan identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Charge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChargeId(Uuid);

impl ChargeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ChargeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChargeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Usage threshold identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThresholdId(Uuid);

impl ThresholdId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ThresholdId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThresholdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How raw events collapse into a single usage value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Count,
    Sum,
    Max,
    UniqueCount,
    Latest,
    WeightedSum,
    Custom,
}

impl AggregationType {
    /// Aggregations that read a named event property.
    pub fn requires_field(&self) -> bool {
        matches!(
            self,
            AggregationType::Sum
                | AggregationType::Max
                | AggregationType::UniqueCount
                | AggregationType::Latest
                | AggregationType::WeightedSum
        )
    }

    /// Aggregations that evaluate a formula per event.
    pub fn requires_expression(&self) -> bool {
        matches!(self, AggregationType::Custom)
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationType::Count => write!(f, "count"),
            AggregationType::Sum => write!(f, "sum"),
            AggregationType::Max => write!(f, "max"),
            AggregationType::UniqueCount => write!(f, "unique_count"),
            AggregationType::Latest => write!(f, "latest"),
            AggregationType::WeightedSum => write!(f, "weighted_sum"),
            AggregationType::Custom => write!(f, "custom"),
        }
    }
}

/// Pricing model applied to an aggregated usage value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeModel {
    Standard,
    Graduated,
    Volume,
    Package,
    Percentage,
    GraduatedPercentage,
    Dynamic,
    Custom,
}

impl ChargeModel {
    /// Models that need the raw per-event property maps, not just a total.
    pub fn requires_events(&self) -> bool {
        matches!(self, ChargeModel::Dynamic)
    }
}

impl fmt::Display for ChargeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeModel::Standard => write!(f, "standard"),
            ChargeModel::Graduated => write!(f, "graduated"),
            ChargeModel::Volume => write!(f, "volume"),
            ChargeModel::Package => write!(f, "package"),
            ChargeModel::Percentage => write!(f, "percentage"),
            ChargeModel::GraduatedPercentage => write!(f, "graduated_percentage"),
            ChargeModel::Dynamic => write!(f, "dynamic"),
            ChargeModel::Custom => write!(f, "custom"),
        }
    }
}

/// How billing periods are anchored for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingTime {
    /// Periods align to fixed calendar boundaries
    Calendar,
    /// Periods anchor to the subscription start date
    Anniversary,
}

/// Length of one billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingInterval {
    /// Interval length in whole months; `None` for week-based intervals.
    pub fn months(&self) -> Option<u32> {
        match self {
            BillingInterval::Weekly => None,
            BillingInterval::Monthly => Some(1),
            BillingInterval::Quarterly => Some(3),
            BillingInterval::Yearly => Some(12),
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingInterval::Weekly => write!(f, "weekly"),
            BillingInterval::Monthly => write!(f, "monthly"),
            BillingInterval::Quarterly => write!(f, "quarterly"),
            BillingInterval::Yearly => write!(f, "yearly"),
        }
    }
}

/// Output of one aggregation call. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageResult {
    pub value: Decimal,
    pub events_count: u64,
}

impl UsageResult {
    pub fn zero() -> Self {
        Self {
            value: Decimal::ZERO,
            events_count: 0,
        }
    }

    pub fn new(value: Decimal, events_count: u64) -> Self {
        Self {
            value,
            events_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_type_requirements() {
        assert!(!AggregationType::Count.requires_field());
        assert!(AggregationType::Sum.requires_field());
        assert!(AggregationType::WeightedSum.requires_field());
        assert!(!AggregationType::Custom.requires_field());
        assert!(AggregationType::Custom.requires_expression());
        assert!(!AggregationType::Sum.requires_expression());
    }

    #[test]
    fn test_interval_months() {
        assert_eq!(BillingInterval::Weekly.months(), None);
        assert_eq!(BillingInterval::Monthly.months(), Some(1));
        assert_eq!(BillingInterval::Quarterly.months(), Some(3));
        assert_eq!(BillingInterval::Yearly.months(), Some(12));
    }

    #[test]
    fn test_subscription_id_round_trip() {
        let id = SubscriptionId::new();
        let parsed: SubscriptionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_usage_result_zero() {
        let result = UsageResult::zero();
        assert_eq!(result.value, Decimal::ZERO);
        assert_eq!(result.events_count, 0);
    }
}
