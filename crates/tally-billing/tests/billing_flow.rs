//! End-to-end flow: ingest events, compute the billing period, project the
//! invoice amount, record threshold crossings, and net progressive
//! invoices against the period total.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::{json, Map};

use tally_billing::aggregation::event_source::{EventFilters, UsageEvent};
use tally_billing::aggregation::{AggregationEngine, InMemoryColumnStore, InMemoryRowStore};
use tally_billing::billing::period::calculate_period;
use tally_billing::billing::progressive::ProgressiveBillingCoordinator;
use tally_billing::billing::thresholds::UsageThresholdMonitor;
use tally_billing::config::EventStoreBackend;
use tally_billing::domain::charges::{Charge, ChargeProperties, ChargeTier};
use tally_billing::domain::metrics::BillableMetric;
use tally_billing::domain::subscriptions::{Plan, Subscription};
use tally_billing::domain::thresholds::UsageThreshold;
use tally_billing::domain::types::{
    AggregationType, BillingInterval, BillingTime, ChargeModel, CustomerId, MetricCode,
};
use tally_billing::ingest::{EventIngestService, RateLimiter};
use tally_billing::storage::catalog::{
    InMemoryCatalog, InMemoryInvoiceLedger, InMemoryThresholdStore, ProgressiveInvoice,
};

struct Stack {
    catalog: Arc<InMemoryCatalog>,
    thresholds: Arc<InMemoryThresholdStore>,
    ledger: Arc<InMemoryInvoiceLedger>,
    ingest: EventIngestService,
    engine: Arc<AggregationEngine>,
    monitor: Arc<UsageThresholdMonitor>,
    coordinator: ProgressiveBillingCoordinator,
}

fn stack() -> Stack {
    let catalog = Arc::new(InMemoryCatalog::new());
    let rows = Arc::new(InMemoryRowStore::new());
    let columns = Arc::new(InMemoryColumnStore::new());

    let engine = Arc::new(AggregationEngine::new(
        catalog.clone(),
        rows.clone(),
        columns,
        EventStoreBackend::Rows,
    ));

    let thresholds = Arc::new(InMemoryThresholdStore::new());
    let monitor = Arc::new(UsageThresholdMonitor::new(
        engine.clone(),
        catalog.clone(),
        thresholds.clone(),
        thresholds.clone(),
    ));

    let ledger = Arc::new(InMemoryInvoiceLedger::new());
    let coordinator = ProgressiveBillingCoordinator::new(monitor.clone(), ledger.clone());

    let ingest = EventIngestService::new(
        rows,
        RateLimiter::new(true, 10_000, Duration::seconds(60)),
    );

    Stack {
        catalog,
        thresholds,
        ledger,
        ingest,
        engine,
        monitor,
        coordinator,
    }
}

async fn seed_plan(stack: &Stack) -> Subscription {
    let mut api_calls = BillableMetric::new(
        MetricCode::new("api_calls"),
        "API calls",
        AggregationType::Sum,
    );
    api_calls.field_name = Some("count".to_string());
    stack.catalog.add_metric(api_calls).await;

    let mut plan = Plan::new("metered", BillingInterval::Monthly, 0);
    plan.charges.push(Charge::new(
        Some(MetricCode::new("api_calls")),
        ChargeModel::Graduated,
        ChargeProperties {
            tiers: vec![
                ChargeTier::new(Some(dec!(100)), dec!(1)),
                ChargeTier::new(None, dec!(0.5)),
            ],
            ..Default::default()
        },
    ));
    let plan_id = plan.id;
    stack.catalog.add_plan(plan).await;

    let started = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let subscription = Subscription::new(
        CustomerId::new("cust_1"),
        plan_id,
        BillingTime::Calendar,
        started,
    );
    stack.catalog.add_subscription(subscription.clone()).await;
    subscription
}

fn usage_event(transaction_id: &str, at: DateTime<Utc>, count: i64) -> UsageEvent {
    let mut properties = Map::new();
    properties.insert("count".to_string(), json!(count));
    UsageEvent::new(transaction_id, "cust_1", "api_calls", at).with_properties(properties)
}

#[tokio::test]
async fn test_ingest_aggregate_rate_flow() {
    let stack = stack();
    let subscription = seed_plan(&stack).await;

    let reference = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
    let period = calculate_period(&subscription, BillingInterval::Monthly, reference).unwrap();

    stack
        .ingest
        .ingest("tenant_1", usage_event("txn_1", reference, 100))
        .await
        .unwrap();
    stack
        .ingest
        .ingest("tenant_1", usage_event("txn_2", reference + Duration::hours(1), 50))
        .await
        .unwrap();

    // Re-ingesting txn_1 changes nothing, including counters.
    let duplicate = stack
        .ingest
        .ingest("tenant_1", usage_event("txn_1", reference, 9_999))
        .await
        .unwrap();
    assert!(!duplicate.was_new);

    let usage = stack
        .engine
        .aggregate(
            &MetricCode::new("api_calls"),
            &subscription.external_customer_id,
            period.start,
            period.end,
            EventFilters::new(),
        )
        .await
        .unwrap();
    assert_eq!(usage.value, dec!(150));
    assert_eq!(usage.events_count, 2);

    // Graduated: 100×1 + 50×0.5.
    let projected = stack
        .monitor
        .current_projected_amount(&subscription, &period)
        .await
        .unwrap();
    assert_eq!(projected, dec!(125));
}

#[test_log::test(tokio::test)]
async fn test_threshold_crossing_and_progressive_netting() {
    let stack = stack();
    let subscription = seed_plan(&stack).await;

    let reference = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
    let period = calculate_period(&subscription, BillingInterval::Monthly, reference).unwrap();

    stack
        .thresholds
        .add_threshold(UsageThreshold::for_subscription(
            subscription.id,
            10_000,
            "USD",
        ))
        .await;

    // 100 calls in tier one plus 100 in tier two: 100 + 50 = 150.00,
    // crossing the 100.00 threshold.
    stack
        .ingest
        .ingest("tenant_1", usage_event("txn_1", reference, 200))
        .await
        .unwrap();

    let crossings = stack
        .monitor
        .check_thresholds(&subscription, &period)
        .await
        .unwrap();
    assert_eq!(crossings.len(), 1);
    assert_eq!(crossings[0].applied.lifetime_usage_amount_cents, 15_000);

    // The caller issues a progressive invoice for the amount due so far.
    let due = stack
        .coordinator
        .incremental_amount_due(&subscription, &period)
        .await
        .unwrap();
    assert_eq!(due, dec!(150));

    stack
        .ledger
        .add_invoice(ProgressiveInvoice {
            subscription_id: subscription.id,
            issued_at: reference,
            amount: due,
            voided: false,
        })
        .await;

    // Nothing more is owed until new usage arrives.
    let due_after_invoice = stack
        .coordinator
        .incremental_amount_due(&subscription, &period)
        .await
        .unwrap();
    assert_eq!(due_after_invoice, dec!(0));

    // More usage: 100 further tier-two calls add 50.00.
    stack
        .ingest
        .ingest(
            "tenant_1",
            usage_event("txn_2", reference + Duration::days(1), 100),
        )
        .await
        .unwrap();

    let due_after_usage = stack
        .coordinator
        .incremental_amount_due(&subscription, &period)
        .await
        .unwrap();
    assert_eq!(due_after_usage, dec!(50));

    // The final invoice credits everything billed early this period.
    let credit = stack
        .coordinator
        .period_credit(&subscription, &period)
        .await
        .unwrap();
    assert_eq!(credit, dec!(150));

    // The same threshold does not fire twice within the period.
    let repeat = stack
        .monitor
        .check_thresholds(&subscription, &period)
        .await
        .unwrap();
    assert!(repeat.is_empty());
}

#[tokio::test]
async fn test_recurring_threshold_rearms_next_period() {
    let stack = stack();
    let subscription = seed_plan(&stack).await;

    let mut threshold = UsageThreshold::for_subscription(subscription.id, 5_000, "USD");
    threshold.recurring = true;
    stack.thresholds.add_threshold(threshold).await;

    let june_ref = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
    let june = calculate_period(&subscription, BillingInterval::Monthly, june_ref).unwrap();
    stack
        .ingest
        .ingest("tenant_1", usage_event("txn_june", june_ref, 60))
        .await
        .unwrap();

    let june_crossings = stack
        .monitor
        .check_thresholds(&subscription, &june)
        .await
        .unwrap();
    assert_eq!(june_crossings.len(), 1);

    // July: a fresh period re-arms the threshold purely via the
    // crossed_at >= period_start scope.
    let july_ref = Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
    let july = calculate_period(&subscription, BillingInterval::Monthly, july_ref).unwrap();
    stack
        .ingest
        .ingest("tenant_1", usage_event("txn_july", july_ref, 60))
        .await
        .unwrap();

    let july_crossings = stack
        .monitor
        .check_thresholds(&subscription, &july)
        .await
        .unwrap();
    assert_eq!(july_crossings.len(), 1);
}

#[tokio::test]
async fn test_progressive_overbilling_floors_at_zero() {
    let stack = stack();
    let subscription = seed_plan(&stack).await;

    let reference = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
    let period = calculate_period(&subscription, BillingInterval::Monthly, reference).unwrap();

    stack
        .ingest
        .ingest("tenant_1", usage_event("txn_1", reference, 50))
        .await
        .unwrap();

    // An early invoice larger than current usage (e.g. usage later voided
    // upstream) must not produce a negative amount due.
    stack
        .ledger
        .add_invoice(ProgressiveInvoice {
            subscription_id: subscription.id,
            issued_at: reference,
            amount: dec!(500),
            voided: false,
        })
        .await;

    let due = stack
        .coordinator
        .incremental_amount_due(&subscription, &period)
        .await
        .unwrap();
    assert_eq!(due, dec!(0));
}
