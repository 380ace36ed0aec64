use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors surfaced by the metering and rating core.
///
/// All variants are caller or configuration defects except `DatabaseError`,
/// which wraps store failures unchanged for the caller to retry or report.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billable metric not found: {code}")]
    MetricNotFound { code: String },

    #[error("plan not found: {id}")]
    PlanNotFound { id: String },

    #[error("subscription not found: {id}")]
    SubscriptionNotFound { id: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("malformed expression: {message}")]
    MalformedExpression { message: String },

    #[error("empty time window: from {from} to {to}")]
    EmptyWindow {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error("rate limit exceeded for key {key}")]
    RateLimited { key: String },

    #[error("validation failed for {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("database error during {operation}: {source}")]
    DatabaseError {
        operation: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("configuration error: {details}")]
    ConfigError { details: String },
}

impl BillingError {
    /// True when the error indicates a missing referenced entity.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BillingError::MetricNotFound { .. }
                | BillingError::PlanNotFound { .. }
                | BillingError::SubscriptionNotFound { .. }
        )
    }
}
