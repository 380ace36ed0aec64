//! Idempotent event ingestion.

pub mod rate_limit;

pub use rate_limit::RateLimiter;

use chrono::Duration;
use std::sync::Arc;
use tracing::debug;

use crate::aggregation::event_source::{EventWriter, UsageEvent};
use crate::config::IngestionConfig;
use crate::error::{BillingError, Result};

/// Outcome of one ingestion call.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub event: UsageEvent,
    /// False when the transaction_id had been seen before; `event` is then
    /// the originally stored event, unchanged.
    pub was_new: bool,
}

pub struct EventIngestService {
    writer: Arc<dyn EventWriter>,
    limiter: RateLimiter,
}

impl EventIngestService {
    pub fn new(writer: Arc<dyn EventWriter>, limiter: RateLimiter) -> Self {
        Self { writer, limiter }
    }

    pub fn with_config(writer: Arc<dyn EventWriter>, config: &IngestionConfig) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_enabled,
            config.events_per_window,
            Duration::seconds(config.window_seconds as i64),
        );
        Self::new(writer, limiter)
    }

    /// Validate, rate-limit by tenant key, and persist idempotently.
    pub async fn ingest(&self, tenant_key: &str, event: UsageEvent) -> Result<IngestOutcome> {
        validate(&event)?;

        if !self.limiter.check_and_record(tenant_key).await {
            return Err(BillingError::RateLimited {
                key: tenant_key.to_string(),
            });
        }

        let (event, was_new) = self.writer.insert_if_absent(event).await?;
        debug!(
            transaction_id = %event.transaction_id,
            code = %event.code,
            was_new,
            "ingested event"
        );
        Ok(IngestOutcome { event, was_new })
    }
}

fn validate(event: &UsageEvent) -> Result<()> {
    for (field, value) in [
        ("transaction_id", &event.transaction_id),
        ("external_customer_id", &event.external_customer_id),
        ("code", &event.code),
    ] {
        if value.trim().is_empty() {
            return Err(BillingError::ValidationError {
                field: field.to_string(),
                message: "must not be empty".to_string(),
            });
        }
    }
    Ok(())
}
