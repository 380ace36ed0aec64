//! Rounding applied to aggregated usage values.
//!
//! Applied exactly once, after the raw aggregation, never before.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingFunction {
    None,
    Round,
    Ceil,
    Floor,
}

/// Rounding function plus decimal precision, as configured on a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingPolicy {
    pub function: RoundingFunction,
    pub precision: u32,
}

impl Default for RoundingPolicy {
    fn default() -> Self {
        Self {
            function: RoundingFunction::None,
            precision: 0,
        }
    }
}

impl RoundingPolicy {
    pub fn new(function: RoundingFunction, precision: u32) -> Self {
        Self {
            function,
            precision,
        }
    }

    /// Apply the policy to an aggregated value. `Round` is half-up.
    pub fn apply(&self, value: Decimal) -> Decimal {
        match self.function {
            RoundingFunction::None => value,
            RoundingFunction::Round => value
                .round_dp_with_strategy(self.precision, RoundingStrategy::MidpointAwayFromZero),
            RoundingFunction::Ceil => {
                let shift = self.shift();
                ((value * shift).ceil()) / shift
            }
            RoundingFunction::Floor => {
                let shift = self.shift();
                ((value * shift).floor()) / shift
            }
        }
    }

    fn shift(&self) -> Decimal {
        let mut shift = Decimal::ONE;
        for _ in 0..self.precision {
            shift *= Decimal::TEN;
        }
        shift
    }
}
