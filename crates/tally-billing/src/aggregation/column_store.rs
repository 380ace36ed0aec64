//! Column-oriented in-memory event backend.
//!
//! Fixed attributes and each property key live in their own column; rows are
//! reconstructed only when a caller needs whole events. Aggregations walk
//! the relevant columns directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::aggregation::event_source::{
    property_text, scalar_decimal, EventSource, EventWriter, UsageEvent, UsageQuery,
};
use crate::domain::types::UsageResult;
use crate::error::Result;

#[derive(Default)]
struct Columns {
    transaction_ids: Vec<String>,
    row_by_transaction: HashMap<String, usize>,
    customers: Vec<String>,
    codes: Vec<String>,
    timestamps: Vec<DateTime<Utc>>,
    properties: HashMap<String, Vec<Option<Value>>>,
}

impl Columns {
    fn len(&self) -> usize {
        self.transaction_ids.len()
    }

    fn append(&mut self, event: &UsageEvent) {
        let row = self.len();
        self.transaction_ids.push(event.transaction_id.clone());
        self.row_by_transaction
            .insert(event.transaction_id.clone(), row);
        self.customers.push(event.external_customer_id.clone());
        self.codes.push(event.code.clone());
        self.timestamps.push(event.timestamp);

        for (key, value) in &event.properties {
            let column = self
                .properties
                .entry(key.clone())
                .or_insert_with(|| vec![None; row]);
            column.push(Some(value.clone()));
        }
        // Pad columns this event did not touch.
        for column in self.properties.values_mut() {
            if column.len() <= row {
                column.push(None);
            }
        }
    }

    fn cell(&self, field: &str, row: usize) -> Option<&Value> {
        self.properties
            .get(field)
            .and_then(|column| column[row].as_ref())
    }

    fn matching_rows(&self, query: &UsageQuery) -> Vec<usize> {
        (0..self.len())
            .filter(|&row| {
                self.customers[row] == query.external_customer_id
                    && self.codes[row] == query.code
                    && self.timestamps[row] >= query.from
                    && self.timestamps[row] < query.to
                    && query.filters.iter().all(|(key, expected)| {
                        self.cell(key, row)
                            .and_then(property_text)
                            .map_or(false, |actual| actual == *expected)
                    })
            })
            .collect()
    }

    fn event_at(&self, row: usize) -> UsageEvent {
        let mut properties = Map::new();
        for (key, column) in &self.properties {
            if let Some(value) = &column[row] {
                properties.insert(key.clone(), value.clone());
            }
        }
        UsageEvent::new(
            self.transaction_ids[row].clone(),
            self.customers[row].clone(),
            self.codes[row].clone(),
            self.timestamps[row],
        )
        .with_properties(properties)
    }
}

pub struct InMemoryColumnStore {
    columns: Arc<RwLock<Columns>>,
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self {
            columns: Arc::new(RwLock::new(Columns::default())),
        }
    }
}

impl Default for InMemoryColumnStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventWriter for InMemoryColumnStore {
    async fn insert_if_absent(&self, event: UsageEvent) -> Result<(UsageEvent, bool)> {
        let mut columns = self.columns.write().await;
        if let Some(&row) = columns.row_by_transaction.get(&event.transaction_id) {
            debug!(
                transaction_id = %event.transaction_id,
                "duplicate transaction_id, returning stored event"
            );
            return Ok((columns.event_at(row), false));
        }
        columns.append(&event);
        Ok((event, true))
    }
}

#[async_trait]
impl EventSource for InMemoryColumnStore {
    async fn count(&self, query: &UsageQuery) -> Result<UsageResult> {
        let columns = self.columns.read().await;
        let count = columns.matching_rows(query).len() as u64;
        Ok(UsageResult::new(Decimal::from(count), count))
    }

    async fn sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let columns = self.columns.read().await;
        let rows = columns.matching_rows(query);
        let value = rows
            .iter()
            .map(|&row| {
                columns
                    .cell(field, row)
                    .and_then(scalar_decimal)
                    .unwrap_or(Decimal::ZERO)
            })
            .sum();
        Ok(UsageResult::new(value, rows.len() as u64))
    }

    async fn max(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let columns = self.columns.read().await;
        let rows = columns.matching_rows(query);
        let value = rows
            .iter()
            .filter_map(|&row| columns.cell(field, row).and_then(scalar_decimal))
            .max()
            .unwrap_or(Decimal::ZERO);
        Ok(UsageResult::new(value, rows.len() as u64))
    }

    async fn unique_count(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let columns = self.columns.read().await;
        let rows = columns.matching_rows(query);
        let distinct: BTreeSet<String> = rows
            .iter()
            .filter_map(|&row| columns.cell(field, row).and_then(property_text))
            .collect();
        Ok(UsageResult::new(
            Decimal::from(distinct.len() as u64),
            rows.len() as u64,
        ))
    }

    async fn latest(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let columns = self.columns.read().await;
        let rows = columns.matching_rows(query);
        // Rows ascend in insertion order; `>=` keeps the last-ingested event
        // on timestamp ties.
        let mut newest: Option<usize> = None;
        for &row in &rows {
            if newest.map_or(true, |best| columns.timestamps[row] >= columns.timestamps[best]) {
                newest = Some(row);
            }
        }
        let value = newest
            .and_then(|row| columns.cell(field, row).and_then(scalar_decimal))
            .unwrap_or(Decimal::ZERO);
        Ok(UsageResult::new(value, rows.len() as u64))
    }

    async fn weighted_sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let columns = self.columns.read().await;
        let rows = columns.matching_rows(query);
        let window_millis = query.window_millis();
        if rows.is_empty() || window_millis <= 0 {
            return Ok(UsageResult::new(Decimal::ZERO, rows.len() as u64));
        }

        let mut points: Vec<(DateTime<Utc>, Decimal)> = rows
            .iter()
            .map(|&row| {
                (
                    columns.timestamps[row],
                    columns
                        .cell(field, row)
                        .and_then(scalar_decimal)
                        .unwrap_or(Decimal::ZERO),
                )
            })
            .collect();
        points.sort_by_key(|(timestamp, _)| *timestamp);

        let mut total = Decimal::ZERO;
        for (index, (timestamp, value)) in points.iter().enumerate() {
            let next_timestamp = points
                .get(index + 1)
                .map(|(next, _)| *next)
                .unwrap_or(query.to);
            let span_millis = (next_timestamp - *timestamp).num_milliseconds().max(0);
            total += *value * Decimal::from(span_millis);
        }

        Ok(UsageResult::new(
            total / Decimal::from(window_millis),
            rows.len() as u64,
        ))
    }

    async fn events(&self, query: &UsageQuery) -> Result<Vec<UsageEvent>> {
        let columns = self.columns.read().await;
        let mut events: Vec<UsageEvent> = columns
            .matching_rows(query)
            .into_iter()
            .map(|row| columns.event_at(row))
            .collect();
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
        )
    }

    fn event(transaction_id: &str, field: &str, value: serde_json::Value) -> UsageEvent {
        let (from, _) = window();
        let mut properties = Map::new();
        properties.insert(field.to_string(), value);
        UsageEvent::new(transaction_id, "cust_1", "api_calls", from).with_properties(properties)
    }

    #[tokio::test]
    async fn test_columns_pad_unseen_properties() {
        let store = InMemoryColumnStore::new();
        store
            .insert_if_absent(event("txn_1", "count", json!(5)))
            .await
            .unwrap();
        store
            .insert_if_absent(event("txn_2", "bytes", json!(1024)))
            .await
            .unwrap();

        let (from, to) = window();
        let query = UsageQuery::new("cust_1", "api_calls", from, to);
        let sum = store.sum(&query, "count").await.unwrap();
        assert_eq!(sum.value, dec!(5));
        assert_eq!(sum.events_count, 2);

        let bytes = store.sum(&query, "bytes").await.unwrap();
        assert_eq!(bytes.value, dec!(1024));
    }

    #[tokio::test]
    async fn test_duplicate_returns_reconstructed_original() {
        let store = InMemoryColumnStore::new();
        let original = event("txn_1", "count", json!(5));
        store.insert_if_absent(original.clone()).await.unwrap();

        let (stored, was_new) = store
            .insert_if_absent(event("txn_1", "count", json!(50)))
            .await
            .unwrap();
        assert!(!was_new);
        assert_eq!(stored, original);
    }

    #[tokio::test]
    async fn test_events_round_trip_through_columns() {
        let store = InMemoryColumnStore::new();
        let original = event("txn_1", "count", json!(5));
        store.insert_if_absent(original.clone()).await.unwrap();

        let (from, to) = window();
        let query = UsageQuery::new("cust_1", "api_calls", from, to);
        let events = store.events(&query).await.unwrap();
        assert_eq!(events, vec![original]);
    }
}
