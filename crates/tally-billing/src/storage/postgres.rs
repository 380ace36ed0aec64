//! Postgres-backed event store: the production row-oriented backend.
//!
//! Aggregations push down into SQL; property filters are applied as an
//! exact-match conjunction over the jsonb bag. LATEST orders by
//! `(timestamp, seq)` so the last-ingested event wins timestamp ties,
//! matching the in-memory backends.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::debug;

use crate::aggregation::event_source::{
    weighted_integral, EventSource, EventWriter, UsageEvent, UsageQuery,
};
use crate::config::DatabaseConfig;
use crate::domain::types::UsageResult;
use crate::error::{BillingError, Result};

const SCOPE_CLAUSE: &str = r#"
    external_customer_id = $1
    AND code = $2
    AND timestamp >= $3
    AND timestamp < $4
    AND NOT EXISTS (
        SELECT 1 FROM jsonb_each_text($5::jsonb) AS f(key, value)
        WHERE properties ->> f.key IS DISTINCT FROM f.value
    )
"#;

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| BillingError::DatabaseError {
                operation: "connect".to_string(),
                source: Box::new(e),
            })?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::DatabaseError {
                operation: "run_migrations".to_string(),
                source: Box::new(e),
            })?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn filters_json(query: &UsageQuery) -> serde_json::Value {
        serde_json::json!(query.filters)
    }

    async fn scoped_count(&self, query: &UsageQuery) -> Result<u64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS events_count FROM billing.usage_events WHERE {SCOPE_CLAUSE}"
        ))
        .bind(&query.external_customer_id)
        .bind(&query.code)
        .bind(query.from)
        .bind(query.to)
        .bind(Self::filters_json(query))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::DatabaseError {
            operation: "scoped_count".to_string(),
            source: Box::new(e),
        })?;

        Ok(row.get::<i64, _>("events_count") as u64)
    }

    async fn scoped_aggregate(
        &self,
        operation: &str,
        select: &str,
        query: &UsageQuery,
        field: &str,
    ) -> Result<UsageResult> {
        let row = sqlx::query(&format!(
            "SELECT {select} AS value, COUNT(*) AS events_count \
             FROM billing.usage_events WHERE {SCOPE_CLAUSE}"
        ))
        .bind(&query.external_customer_id)
        .bind(&query.code)
        .bind(query.from)
        .bind(query.to)
        .bind(Self::filters_json(query))
        .bind(field)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::DatabaseError {
            operation: operation.to_string(),
            source: Box::new(e),
        })?;

        Ok(UsageResult::new(
            row.get("value"),
            row.get::<i64, _>("events_count") as u64,
        ))
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> UsageEvent {
        let properties: serde_json::Value = row.get("properties");
        UsageEvent {
            transaction_id: row.get("transaction_id"),
            external_customer_id: row.get("external_customer_id"),
            code: row.get("code"),
            timestamp: row.get("timestamp"),
            properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl EventWriter for PostgresEventStore {
    async fn insert_if_absent(&self, event: UsageEvent) -> Result<(UsageEvent, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO billing.usage_events (
                transaction_id, external_customer_id, code, timestamp, properties
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&event.transaction_id)
        .bind(&event.external_customer_id)
        .bind(&event.code)
        .bind(event.timestamp)
        .bind(serde_json::Value::Object(event.properties.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| BillingError::DatabaseError {
            operation: "insert_if_absent".to_string(),
            source: Box::new(e),
        })?;

        if inserted.rows_affected() == 1 {
            debug!(transaction_id = %event.transaction_id, "appended usage event");
            return Ok((event, true));
        }

        let row = sqlx::query(
            r#"
            SELECT transaction_id, external_customer_id, code, timestamp, properties
            FROM billing.usage_events
            WHERE transaction_id = $1
            "#,
        )
        .bind(&event.transaction_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::DatabaseError {
            operation: "fetch_existing_event".to_string(),
            source: Box::new(e),
        })?;

        debug!(
            transaction_id = %event.transaction_id,
            "duplicate transaction_id, returning stored event"
        );
        Ok((Self::row_to_event(&row), false))
    }
}

#[async_trait]
impl EventSource for PostgresEventStore {
    async fn count(&self, query: &UsageQuery) -> Result<UsageResult> {
        let count = self.scoped_count(query).await?;
        Ok(UsageResult::new(Decimal::from(count), count))
    }

    async fn sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        self.scoped_aggregate(
            "sum",
            "COALESCE(SUM((properties ->> $6)::numeric), 0)",
            query,
            field,
        )
        .await
    }

    async fn max(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        self.scoped_aggregate(
            "max",
            "COALESCE(MAX((properties ->> $6)::numeric), 0)",
            query,
            field,
        )
        .await
    }

    async fn unique_count(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        self.scoped_aggregate(
            "unique_count",
            "COUNT(DISTINCT properties ->> $6)::numeric",
            query,
            field,
        )
        .await
    }

    async fn latest(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let row = sqlx::query(&format!(
            "SELECT properties ->> $6 AS value FROM billing.usage_events \
             WHERE {SCOPE_CLAUSE} ORDER BY timestamp DESC, seq DESC LIMIT 1"
        ))
        .bind(&query.external_customer_id)
        .bind(&query.code)
        .bind(query.from)
        .bind(query.to)
        .bind(Self::filters_json(query))
        .bind(field)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::DatabaseError {
            operation: "latest".to_string(),
            source: Box::new(e),
        })?;

        let value = row
            .and_then(|r| r.get::<Option<String>, _>("value"))
            .and_then(|text| Decimal::from_str(text.trim()).ok())
            .unwrap_or(Decimal::ZERO);
        let events_count = self.scoped_count(query).await?;

        Ok(UsageResult::new(value, events_count))
    }

    async fn weighted_sum(&self, query: &UsageQuery, field: &str) -> Result<UsageResult> {
        let events = self.events(query).await?;
        let value = weighted_integral(&events, field, query);
        Ok(UsageResult::new(value, events.len() as u64))
    }

    async fn events(&self, query: &UsageQuery) -> Result<Vec<UsageEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT transaction_id, external_customer_id, code, timestamp, properties \
             FROM billing.usage_events WHERE {SCOPE_CLAUSE} ORDER BY timestamp ASC, seq ASC"
        ))
        .bind(&query.external_customer_id)
        .bind(&query.code)
        .bind(query.from)
        .bind(query.to)
        .bind(Self::filters_json(query))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::DatabaseError {
            operation: "events".to_string(),
            source: Box::new(e),
        })?;

        Ok(rows.iter().map(Self::row_to_event).collect())
    }
}
