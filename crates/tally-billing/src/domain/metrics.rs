use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregation::rounding::RoundingPolicy;
use crate::domain::expression::Expression;
use crate::domain::types::{AggregationType, MetricCode};
use crate::error::{BillingError, Result};

/// Definition of a meterable quantity.
///
/// Identity (`code`, `aggregation_type`) is immutable; display fields are
/// not. The aggregation engine re-reads the definition on every computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillableMetric {
    pub code: MetricCode,
    pub name: String,
    pub description: String,
    pub aggregation_type: AggregationType,
    pub field_name: Option<String>,
    pub expression: Option<String>,
    pub rounding: Option<RoundingPolicy>,
    pub created_at: DateTime<Utc>,
}

impl BillableMetric {
    pub fn new(
        code: MetricCode,
        name: impl Into<String>,
        aggregation_type: AggregationType,
    ) -> Self {
        Self {
            code,
            name: name.into(),
            description: String::new(),
            aggregation_type,
            field_name: None,
            expression: None,
            rounding: None,
            created_at: Utc::now(),
        }
    }

    /// Check the definition satisfies its aggregation type's requirements.
    pub fn validate(&self) -> Result<()> {
        if self.aggregation_type.requires_field()
            && self.field_name.as_deref().map_or(true, str::is_empty)
        {
            return Err(BillingError::InvalidConfiguration {
                message: format!(
                    "aggregation {} on metric {} requires a field_name",
                    self.aggregation_type, self.code
                ),
            });
        }

        if self.aggregation_type.requires_expression() {
            match self.expression.as_deref() {
                Some(raw) if !raw.trim().is_empty() => {
                    Expression::parse(raw)?;
                }
                _ => {
                    return Err(BillingError::InvalidConfiguration {
                        message: format!(
                            "aggregation {} on metric {} requires an expression",
                            self.aggregation_type, self.code
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// The event property this metric reads, or an error if unset.
    pub fn required_field(&self) -> Result<&str> {
        self.field_name
            .as_deref()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| BillingError::InvalidConfiguration {
                message: format!("metric {} has no field_name", self.code),
            })
    }

    /// The per-event formula this metric evaluates, or an error if unset.
    pub fn required_expression(&self) -> Result<&str> {
        self.expression
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| BillingError::InvalidConfiguration {
                message: format!("metric {} has no expression", self.code),
            })
    }
}
