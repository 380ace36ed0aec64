//! Event-source strategy boundary for the aggregation engine.
//!
//! Backends differ in physical layout (row-oriented vs column-oriented) but
//! must agree bit-for-bit on every aggregation; the conformance suite in
//! `tests/backend_parity.rs` holds them to that.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::domain::types::UsageResult;
use crate::error::Result;

/// Exact-match conjunction over event properties.
pub type EventFilters = BTreeMap<String, String>;

/// A raw usage event as ingested. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Idempotency key: duplicate ingestion with the same id is a no-op.
    pub transaction_id: String,
    pub external_customer_id: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub properties: Map<String, Value>,
}

impl UsageEvent {
    pub fn new(
        transaction_id: impl Into<String>,
        external_customer_id: impl Into<String>,
        code: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            external_customer_id: external_customer_id.into(),
            code: code.into(),
            timestamp,
            properties: Map::new(),
        }
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }
}

/// Scope of one aggregation call: customer, metric code, half-open window
/// `[from, to)`, optional property filters.
#[derive(Debug, Clone)]
pub struct UsageQuery {
    pub external_customer_id: String,
    pub code: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub filters: EventFilters,
}

impl UsageQuery {
    pub fn new(
        external_customer_id: impl Into<String>,
        code: impl Into<String>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        Self {
            external_customer_id: external_customer_id.into(),
            code: code.into(),
            from,
            to,
            filters: EventFilters::new(),
        }
    }

    pub fn with_filters(mut self, filters: EventFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn window_millis(&self) -> i64 {
        (self.to - self.from).num_milliseconds()
    }

    /// Whether an event falls inside this query's scope.
    pub fn matches(&self, event: &UsageEvent) -> bool {
        event.external_customer_id == self.external_customer_id
            && event.code == self.code
            && event.timestamp >= self.from
            && event.timestamp < self.to
            && self.filters.iter().all(|(key, expected)| {
                event
                    .properties
                    .get(key)
                    .and_then(property_text)
                    .map_or(false, |actual| actual == *expected)
            })
    }
}

/// Read side of an event backend: one entry point per aggregation plus an
/// ordered event fetch for per-event charge models.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn count(&self, query: &UsageQuery) -> Result<UsageResult>;
    async fn sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult>;
    async fn max(&self, query: &UsageQuery, field: &str) -> Result<UsageResult>;
    async fn unique_count(&self, query: &UsageQuery, field: &str) -> Result<UsageResult>;
    async fn latest(&self, query: &UsageQuery, field: &str) -> Result<UsageResult>;
    async fn weighted_sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult>;

    /// Matching events in ascending (timestamp, insertion order).
    async fn events(&self, query: &UsageQuery) -> Result<Vec<UsageEvent>>;
}

/// Write side of an event backend.
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Insert unless `transaction_id` is already present. Returns the stored
    /// event and whether this call created it.
    async fn insert_if_absent(&self, event: UsageEvent) -> Result<(UsageEvent, bool)>;
}

/// Decode a property scalar as a decimal. Numbers and numeric strings both
/// count; anything else is treated as absent.
pub fn property_decimal(properties: &Map<String, Value>, field: &str) -> Option<Decimal> {
    scalar_decimal(properties.get(field)?)
}

pub(crate) fn scalar_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Canonical text form of a scalar, used for filter matching and distinct
/// counting. Nulls and nested values have no text form.
pub fn property_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric variable bindings for per-event expression evaluation.
pub fn numeric_properties(properties: &Map<String, Value>) -> HashMap<String, Decimal> {
    properties
        .iter()
        .filter_map(|(key, value)| scalar_decimal(value).map(|d| (key.clone(), d)))
        .collect()
}

/// Time-weighted integral of `field` over the query window: each event's
/// value is weighted by the span to the next event (or the window end),
/// normalized by the full window. Millisecond resolution.
pub fn weighted_integral(events: &[UsageEvent], field: &str, query: &UsageQuery) -> Decimal {
    let window_millis = query.window_millis();
    if window_millis <= 0 || events.is_empty() {
        return Decimal::ZERO;
    }

    let mut ordered: Vec<&UsageEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.timestamp);

    let mut total = Decimal::ZERO;
    for (index, event) in ordered.iter().enumerate() {
        let value = property_decimal(&event.properties, field).unwrap_or(Decimal::ZERO);
        let next_timestamp = ordered
            .get(index + 1)
            .map(|next| next.timestamp)
            .unwrap_or(query.to);
        let span_millis = (next_timestamp - event.timestamp).num_milliseconds().max(0);
        total += value * Decimal::from(span_millis);
    }

    total / Decimal::from(window_millis)
}
