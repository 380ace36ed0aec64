//! Conformance suite for the row- and column-oriented event backends.
//!
//! Both backends receive identical event streams; every aggregation type
//! must produce identical results through the engine regardless of which
//! backend configuration serves the call.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rust_decimal_macros::dec;
use serde_json::{json, Map};

use tally_billing::aggregation::event_source::{EventFilters, EventWriter, UsageEvent};
use tally_billing::aggregation::{AggregationEngine, InMemoryColumnStore, InMemoryRowStore};
use tally_billing::config::EventStoreBackend;
use tally_billing::domain::metrics::BillableMetric;
use tally_billing::domain::types::{AggregationType, CustomerId, MetricCode, UsageResult};
use tally_billing::storage::catalog::InMemoryCatalog;

const CUSTOMER: &str = "cust_parity";
const CODE: &str = "api_calls";

/// One metric code per aggregation type under test.
const ALL_CODES: [&str; 7] = [
    CODE,
    "sum_value",
    "max_value",
    "unique_user",
    "latest_value",
    "weighted_value",
    "custom_value",
];

struct Backends {
    catalog: Arc<InMemoryCatalog>,
    rows: Arc<InMemoryRowStore>,
    columns: Arc<InMemoryColumnStore>,
}

impl Backends {
    fn new() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::new()),
            rows: Arc::new(InMemoryRowStore::new()),
            columns: Arc::new(InMemoryColumnStore::new()),
        }
    }

    /// Feed the same logical event to both backends, once per metric code,
    /// so every aggregation type sees an identical stream.
    async fn ingest(&self, event: UsageEvent) {
        for code in ALL_CODES {
            let mut replica = event.clone();
            replica.code = code.to_string();
            replica.transaction_id = format!("{}::{code}", event.transaction_id);
            self.rows.insert_if_absent(replica.clone()).await.unwrap();
            self.columns.insert_if_absent(replica).await.unwrap();
        }
    }

    fn engine(&self, backend: EventStoreBackend) -> AggregationEngine {
        AggregationEngine::new(
            self.catalog.clone(),
            self.rows.clone(),
            self.columns.clone(),
            backend,
        )
    }

    /// Run one metric through both backends and demand identical output.
    async fn aggregate_both(
        &self,
        code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> UsageResult {
        let row_result = self
            .engine(EventStoreBackend::Rows)
            .aggregate(
                &MetricCode::new(code),
                &CustomerId::new(CUSTOMER),
                from,
                to,
                EventFilters::new(),
            )
            .await
            .unwrap();
        let column_result = self
            .engine(EventStoreBackend::Columns)
            .aggregate(
                &MetricCode::new(code),
                &CustomerId::new(CUSTOMER),
                from,
                to,
                EventFilters::new(),
            )
            .await
            .unwrap();

        assert_eq!(row_result, column_result, "backends disagree on {code}");
        row_result
    }
}

fn window() -> (DateTime<Utc>, DateTime<Utc>) {
    (
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap(),
    )
}

fn event(
    transaction_id: &str,
    timestamp: DateTime<Utc>,
    entries: &[(&str, serde_json::Value)],
) -> UsageEvent {
    let mut properties = Map::new();
    for (key, value) in entries {
        properties.insert(key.to_string(), value.clone());
    }
    UsageEvent::new(transaction_id, CUSTOMER, CODE, timestamp).with_properties(properties)
}

async fn metric(backends: &Backends, code: &str, aggregation: AggregationType, field: Option<&str>) {
    let mut metric = BillableMetric::new(MetricCode::new(code), code, aggregation);
    metric.field_name = field.map(str::to_string);
    if aggregation == AggregationType::Custom {
        metric.expression = Some("value * weight".to_string());
    }
    backends.catalog.add_metric(metric).await;
}

async fn seed_all_metrics(backends: &Backends) {
    metric(backends, CODE, AggregationType::Count, None).await;
    metric(backends, "sum_value", AggregationType::Sum, Some("value")).await;
    metric(backends, "max_value", AggregationType::Max, Some("value")).await;
    metric(backends, "unique_user", AggregationType::UniqueCount, Some("user")).await;
    metric(backends, "latest_value", AggregationType::Latest, Some("value")).await;
    metric(backends, "weighted_value", AggregationType::WeightedSum, Some("value")).await;
    metric(backends, "custom_value", AggregationType::Custom, None).await;
}

#[tokio::test]
async fn test_empty_event_set_is_zero_on_both_backends() {
    let backends = Backends::new();
    seed_all_metrics(&backends).await;
    let (from, to) = window();

    for code in ALL_CODES {
        let result = backends.aggregate_both(code, from, to).await;
        assert_eq!(result, UsageResult::zero(), "non-zero empty result for {code}");
    }
}

#[tokio::test]
async fn test_all_aggregations_agree_on_mixed_events() {
    let backends = Backends::new();
    seed_all_metrics(&backends).await;
    let (from, to) = window();

    // A deliberately messy stream: missing fields, numeric strings,
    // duplicate values, a timestamp tie on the latest instant.
    backends
        .ingest(event(
            "t1",
            from,
            &[("value", json!(5)), ("user", json!("alice")), ("weight", json!(2))],
        ))
        .await;
    backends
        .ingest(event(
            "t2",
            from + Duration::hours(6),
            &[("value", json!("3.5")), ("user", json!("bob")), ("weight", json!(1))],
        ))
        .await;
    backends
        .ingest(event("t3", from + Duration::hours(12), &[("user", json!("alice"))]))
        .await;
    backends
        .ingest(event(
            "t4",
            from + Duration::hours(18),
            &[("value", json!(7)), ("weight", json!(0.5))],
        ))
        .await;
    backends
        .ingest(event(
            "t5",
            from + Duration::hours(18),
            &[("value", json!(1)), ("user", json!("carol")), ("weight", json!(4))],
        ))
        .await;

    let count = backends.aggregate_both(CODE, from, to).await;
    assert_eq!(count.value, dec!(5));
    assert_eq!(count.events_count, 5);

    let sum = backends.aggregate_both("sum_value", from, to).await;
    assert_eq!(sum.value, dec!(16.5));

    let max = backends.aggregate_both("max_value", from, to).await;
    assert_eq!(max.value, dec!(7));

    let unique = backends.aggregate_both("unique_user", from, to).await;
    assert_eq!(unique.value, dec!(3));

    // t4 and t5 tie on timestamp; the later-ingested t5 wins on both
    // backends.
    let latest = backends.aggregate_both("latest_value", from, to).await;
    assert_eq!(latest.value, dec!(1));

    let weighted = backends.aggregate_both("weighted_value", from, to).await;
    // 5×6h + 3.5×6h + 0×6h + 7×0h + 1×6h over 24h = (30+21+0+0+6)/24
    assert_eq!(weighted.value, dec!(57) / dec!(24));

    // t3 has no value/weight properties, so the custom formula cannot
    // resolve its identifiers; both backends reject it identically.
    let custom_err_rows = backends
        .engine(EventStoreBackend::Rows)
        .aggregate(
            &MetricCode::new("custom_value"),
            &CustomerId::new(CUSTOMER),
            from,
            to,
            EventFilters::new(),
        )
        .await
        .unwrap_err();
    let custom_err_columns = backends
        .engine(EventStoreBackend::Columns)
        .aggregate(
            &MetricCode::new("custom_value"),
            &CustomerId::new(CUSTOMER),
            from,
            to,
            EventFilters::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(custom_err_rows.to_string(), custom_err_columns.to_string());
}

#[tokio::test]
async fn test_custom_aggregation_agrees_when_all_events_resolve() {
    let backends = Backends::new();
    seed_all_metrics(&backends).await;
    let (from, to) = window();

    backends
        .ingest(event("t1", from, &[("value", json!(2)), ("weight", json!(3))]))
        .await;
    backends
        .ingest(event(
            "t2",
            from + Duration::hours(1),
            &[("value", json!(10)), ("weight", json!(0.5))],
        ))
        .await;

    let custom = backends.aggregate_both("custom_value", from, to).await;
    assert_eq!(custom.value, dec!(11));
    assert_eq!(custom.events_count, 2);
}

#[tokio::test]
async fn test_weighted_sum_single_event_spans_window_on_both_backends() {
    let backends = Backends::new();
    seed_all_metrics(&backends).await;
    let (from, to) = window();

    backends
        .ingest(event("t1", from, &[("value", json!(42))]))
        .await;

    let weighted = backends.aggregate_both("weighted_value", from, to).await;
    assert_eq!(weighted.value, dec!(42));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Randomized parity: any event stream, any aggregation, same answer
    /// from both backends.
    #[test]
    fn prop_backends_agree(
        events in prop::collection::vec(
            (0u32..1440, prop::option::of(0i64..10_000), 0u8..4),
            0..40,
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let backends = Backends::new();
            seed_all_metrics(&backends).await;
            let (from, to) = window();

            for (index, (minutes, value, user)) in events.iter().enumerate() {
                let mut entries: Vec<(&str, serde_json::Value)> =
                    vec![("user", json!(format!("user_{user}")))];
                if let Some(value) = value {
                    entries.push(("value", json!(value)));
                    entries.push(("weight", json!(value % 7)));
                }
                backends
                    .ingest(event(
                        &format!("txn_{index}"),
                        from + Duration::minutes(i64::from(*minutes)),
                        &entries,
                    ))
                    .await;
            }

            for code in [CODE, "sum_value", "max_value", "unique_user", "latest_value", "weighted_value"] {
                backends.aggregate_both(code, from, to).await;
            }
        });
    }
}
