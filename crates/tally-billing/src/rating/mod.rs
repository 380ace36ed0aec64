//! Rating: converting an aggregated usage value into a monetary amount.

pub mod calculators;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::charges::Charge;
use crate::domain::types::ChargeModel;
use crate::error::Result;

/// A priced line produced by rating one charge.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCharge {
    pub units: Decimal,
    pub amount: Decimal,
}

/// Inputs beyond the aggregated total that some models need.
#[derive(Debug, Clone, Default)]
pub struct RatingContext {
    /// Per-event property maps, in window order, for the dynamic model.
    pub events: Vec<Map<String, Value>>,
}

impl RatingContext {
    pub fn with_events(events: Vec<Map<String, Value>>) -> Self {
        Self { events }
    }
}

/// Single dispatch point across charge models.
///
/// Returns `None` when usage and amount are both zero so the caller emits
/// no empty line item.
pub fn calculate_amount(
    charge: &Charge,
    units: Decimal,
    context: &RatingContext,
) -> Result<Option<AppliedCharge>> {
    charge.validate()?;

    let properties = &charge.properties;
    let amount = match charge.model {
        ChargeModel::Standard => calculators::standard(units, properties)?,
        ChargeModel::Graduated => calculators::graduated(units, properties)?,
        ChargeModel::Volume => calculators::volume(units, properties)?,
        ChargeModel::Package => calculators::package(units, properties)?,
        ChargeModel::Percentage => calculators::percentage(units, properties)?,
        ChargeModel::GraduatedPercentage => {
            calculators::graduated_percentage(units, properties)?
        }
        ChargeModel::Dynamic => calculators::dynamic(&context.events, properties)?,
        ChargeModel::Custom => calculators::custom(units, properties)?,
    };

    if units.is_zero() && amount.is_zero() {
        return Ok(None);
    }

    Ok(Some(AppliedCharge { units, amount }))
}
