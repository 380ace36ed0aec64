//! Aggregation engine: resolves a metric definition, selects an event
//! backend, and collapses matching events into a single usage value.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::aggregation::event_source::{
    numeric_properties, EventFilters, EventSource, UsageEvent, UsageQuery,
};
use crate::config::EventStoreBackend;
use crate::domain::expression::Expression;
use crate::domain::metrics::BillableMetric;
use crate::domain::types::{AggregationType, CustomerId, MetricCode, UsageResult};
use crate::error::{BillingError, Result};
use crate::storage::catalog::MetricRepository;

pub struct AggregationEngine {
    metrics: Arc<dyn MetricRepository>,
    row_store: Arc<dyn EventSource>,
    column_store: Arc<dyn EventSource>,
    backend: EventStoreBackend,
}

impl AggregationEngine {
    pub fn new(
        metrics: Arc<dyn MetricRepository>,
        row_store: Arc<dyn EventSource>,
        column_store: Arc<dyn EventSource>,
        backend: EventStoreBackend,
    ) -> Self {
        Self {
            metrics,
            row_store,
            column_store,
            backend,
        }
    }

    /// Exactly one backend serves each call, per configuration.
    fn source(&self) -> &dyn EventSource {
        match self.backend {
            EventStoreBackend::Rows => self.row_store.as_ref(),
            EventStoreBackend::Columns => self.column_store.as_ref(),
        }
    }

    /// Aggregate usage for one customer/metric over `[from, to)`.
    pub async fn aggregate(
        &self,
        code: &MetricCode,
        customer: &CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: EventFilters,
    ) -> Result<UsageResult> {
        if to < from {
            return Err(BillingError::EmptyWindow { from, to });
        }

        let metric = self
            .metrics
            .get_metric(code)
            .await?
            .ok_or_else(|| BillingError::MetricNotFound {
                code: code.to_string(),
            })?;
        metric.validate()?;

        let query =
            UsageQuery::new(customer.as_str(), code.as_str(), from, to).with_filters(filters);
        let source = self.source();

        let raw = match metric.aggregation_type {
            AggregationType::Count => source.count(&query).await?,
            AggregationType::Sum => source.sum(&query, metric.required_field()?).await?,
            AggregationType::Max => source.max(&query, metric.required_field()?).await?,
            AggregationType::UniqueCount => {
                source.unique_count(&query, metric.required_field()?).await?
            }
            AggregationType::Latest => source.latest(&query, metric.required_field()?).await?,
            AggregationType::WeightedSum => {
                source.weighted_sum(&query, metric.required_field()?).await?
            }
            AggregationType::Custom => self.aggregate_custom(&metric, &query).await?,
        };

        let value = metric.rounding.unwrap_or_default().apply(raw.value);

        debug!(
            metric = %metric.code,
            aggregation = %metric.aggregation_type,
            events = raw.events_count,
            %value,
            "aggregated usage"
        );

        Ok(UsageResult::new(value, raw.events_count))
    }

    /// Evaluate the metric's expression per event and sum the results.
    async fn aggregate_custom(
        &self,
        metric: &BillableMetric,
        query: &UsageQuery,
    ) -> Result<UsageResult> {
        let expression = Expression::parse(metric.required_expression()?)?;
        let events = self.source().events(query).await?;

        let mut total = Decimal::ZERO;
        for event in &events {
            let variables = numeric_properties(&event.properties);
            total += expression.evaluate(&variables)?;
        }

        Ok(UsageResult::new(total, events.len() as u64))
    }

    /// Matching events with raw property maps, ordered by timestamp, for
    /// charge models that price per event.
    pub async fn raw_events(
        &self,
        code: &MetricCode,
        customer: &CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filters: EventFilters,
    ) -> Result<Vec<UsageEvent>> {
        if to < from {
            return Err(BillingError::EmptyWindow { from, to });
        }
        let query =
            UsageQuery::new(customer.as_str(), code.as_str(), from, to).with_filters(filters);
        self.source().events(&query).await
    }
}
