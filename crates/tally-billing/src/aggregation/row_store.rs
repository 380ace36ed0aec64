//! Row-oriented in-memory event backend.
//!
//! Events are kept in ingestion order and scanned row by row, the way the
//! SQL-backed store reads its events table.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::aggregation::event_source::{
    property_decimal, property_text, weighted_integral, EventSource, EventWriter, UsageEvent,
    UsageQuery,
};
use crate::domain::types::UsageResult;
use crate::error::Result;

pub struct InMemoryRowStore {
    rows: Arc<RwLock<Vec<UsageEvent>>>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(Vec::new())),
        }
    }

    async fn matching(&self, query: &UsageQuery) -> Vec<UsageEvent> {
        let rows = self.rows.read().await;
        rows.iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect()
    }
}

impl Default for InMemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventWriter for InMemoryRowStore {
    async fn insert_if_absent(&self, event: UsageEvent) -> Result<(UsageEvent, bool)> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows
            .iter()
            .find(|stored| stored.transaction_id == event.transaction_id)
        {
            debug!(
                transaction_id = %event.transaction_id,
                "duplicate transaction_id, returning stored event"
            );
            return Ok((existing.clone(), false));
        }
        rows.push(event.clone());
        Ok((event, true))
    }
}

#[async_trait]
impl EventSource for InMemoryRowStore {
    async fn count(&self, query: &UsageQuery) -> Result<UsageResult> {
        let events = self.matching(query).await;
        let count = events.len() as u64;
        Ok(UsageResult::new(Decimal::from(count), count))
    }

    async fn sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let events = self.matching(query).await;
        let value = events
            .iter()
            .map(|event| property_decimal(&event.properties, field).unwrap_or(Decimal::ZERO))
            .sum();
        Ok(UsageResult::new(value, events.len() as u64))
    }

    async fn max(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let events = self.matching(query).await;
        let value = events
            .iter()
            .filter_map(|event| property_decimal(&event.properties, field))
            .max()
            .unwrap_or(Decimal::ZERO);
        Ok(UsageResult::new(value, events.len() as u64))
    }

    async fn unique_count(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let events = self.matching(query).await;
        let distinct: BTreeSet<String> = events
            .iter()
            .filter_map(|event| event.properties.get(field).and_then(property_text))
            .collect();
        Ok(UsageResult::new(
            Decimal::from(distinct.len() as u64),
            events.len() as u64,
        ))
    }

    async fn latest(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let events = self.matching(query).await;
        // `>=` so the last-ingested event wins timestamp ties.
        let mut newest: Option<&UsageEvent> = None;
        for event in &events {
            if newest.map_or(true, |best| event.timestamp >= best.timestamp) {
                newest = Some(event);
            }
        }
        let value = newest
            .and_then(|event| property_decimal(&event.properties, field))
            .unwrap_or(Decimal::ZERO);
        Ok(UsageResult::new(value, events.len() as u64))
    }

    async fn weighted_sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let events = self.matching(query).await;
        let value = weighted_integral(&events, field, query);
        Ok(UsageResult::new(value, events.len() as u64))
    }

    async fn events(&self, query: &UsageQuery) -> Result<Vec<UsageEvent>> {
        let mut events = self.matching(query).await;
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::{json, Map};

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
        )
    }

    fn event(
        transaction_id: &str,
        timestamp: DateTime<Utc>,
        field: &str,
        value: serde_json::Value,
    ) -> UsageEvent {
        let mut properties = Map::new();
        properties.insert(field.to_string(), value);
        UsageEvent::new(transaction_id, "cust_1", "api_calls", timestamp).with_properties(properties)
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = InMemoryRowStore::new();
        let (from, _) = window();

        let original = event("txn_1", from, "count", json!(5));
        let (_, was_new) = store.insert_if_absent(original.clone()).await.unwrap();
        assert!(was_new);

        let duplicate = event("txn_1", from, "count", json!(99));
        let (stored, was_new) = store.insert_if_absent(duplicate).await.unwrap();
        assert!(!was_new);
        assert_eq!(stored.properties, original.properties);

        let (_, to) = window();
        let query = UsageQuery::new("cust_1", "api_calls", from, to);
        let result = store.count(&query).await.unwrap();
        assert_eq!(result.events_count, 1);
    }

    #[tokio::test]
    async fn test_sum_treats_missing_field_as_zero() {
        let store = InMemoryRowStore::new();
        let (from, to) = window();

        store
            .insert_if_absent(event("txn_1", from, "count", json!(5)))
            .await
            .unwrap();
        store
            .insert_if_absent(event("txn_2", from, "other", json!(3)))
            .await
            .unwrap();

        let query = UsageQuery::new("cust_1", "api_calls", from, to);
        let result = store.sum(&query, "count").await.unwrap();
        assert_eq!(result.value, dec!(5));
        assert_eq!(result.events_count, 2);
    }

    #[tokio::test]
    async fn test_latest_tie_breaks_on_insertion_order() {
        let store = InMemoryRowStore::new();
        let (from, to) = window();

        store
            .insert_if_absent(event("txn_1", from, "value", json!(1)))
            .await
            .unwrap();
        store
            .insert_if_absent(event("txn_2", from, "value", json!(2)))
            .await
            .unwrap();

        let query = UsageQuery::new("cust_1", "api_calls", from, to);
        let result = store.latest(&query, "value").await.unwrap();
        assert_eq!(result.value, dec!(2));
    }

    #[tokio::test]
    async fn test_unique_count_ignores_missing_values() {
        let store = InMemoryRowStore::new();
        let (from, to) = window();

        store
            .insert_if_absent(event("txn_1", from, "user", json!("alice")))
            .await
            .unwrap();
        store
            .insert_if_absent(event("txn_2", from, "user", json!("bob")))
            .await
            .unwrap();
        store
            .insert_if_absent(event("txn_3", from, "user", json!("alice")))
            .await
            .unwrap();
        store
            .insert_if_absent(event("txn_4", from, "other", json!("carol")))
            .await
            .unwrap();

        let query = UsageQuery::new("cust_1", "api_calls", from, to);
        let result = store.unique_count(&query, "user").await.unwrap();
        assert_eq!(result.value, dec!(2));
        assert_eq!(result.events_count, 4);
    }
}
