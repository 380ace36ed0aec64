//! One pure pricing function per charge model.
//!
//! Every function maps (usage, properties) to a monetary amount and fails
//! only on configuration defects. Monetary arithmetic is exact decimal.

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::aggregation::event_source::numeric_properties;
use crate::domain::charges::{ChargeProperties, ChargeTier};
use crate::domain::expression::Expression;
use crate::error::{BillingError, Result};

fn missing(key: &str) -> BillingError {
    BillingError::InvalidConfiguration {
        message: format!("charge properties missing {key}"),
    }
}

/// `units × unit_price`, clamped to `[min_price, max_price]`; a bound of
/// zero (or unset) does not clamp.
pub fn standard(units: Decimal, properties: &ChargeProperties) -> Result<Decimal> {
    let unit_price = properties.unit_price.ok_or_else(|| missing("unit_price"))?;
    let mut amount = units * unit_price;

    if let Some(min_price) = properties.min_price {
        if min_price > Decimal::ZERO && amount < min_price {
            amount = min_price;
        }
    }
    if let Some(max_price) = properties.max_price {
        if max_price > Decimal::ZERO && amount > max_price {
            amount = max_price;
        }
    }

    Ok(amount)
}

/// Consume usage tier by tier from the bottom; each engaged tier bills its
/// slice at the tier's unit price plus its flat amount.
pub fn graduated(units: Decimal, properties: &ChargeProperties) -> Result<Decimal> {
    if properties.tiers.is_empty() {
        return Err(missing("tiers"));
    }

    let mut remaining = units;
    let mut amount = Decimal::ZERO;
    let mut lower_bound = Decimal::ZERO;

    for tier in &properties.tiers {
        if remaining <= Decimal::ZERO {
            break;
        }
        let capacity = match tier.up_to {
            Some(bound) => bound - lower_bound,
            None => remaining,
        };
        let slice = remaining.min(capacity);
        if slice > Decimal::ZERO {
            amount += slice * tier.unit_price + tier.flat_amount;
            remaining -= slice;
        }
        if let Some(bound) = tier.up_to {
            lower_bound = bound;
        }
    }

    Ok(amount)
}

/// The single tier containing the total prices all units; usage beyond
/// every bound falls into the last tier.
pub fn volume(units: Decimal, properties: &ChargeProperties) -> Result<Decimal> {
    let tier = containing_tier(units, &properties.tiers)?;
    let flat_amount = if units > Decimal::ZERO {
        tier.flat_amount
    } else {
        Decimal::ZERO
    };
    Ok(units * tier.unit_price + flat_amount)
}

/// `ceil((units - free_units) / package_size) × unit_price`; packages are
/// never fractional.
pub fn package(units: Decimal, properties: &ChargeProperties) -> Result<Decimal> {
    let unit_price = properties.unit_price.ok_or_else(|| missing("unit_price"))?;
    let package_size = properties
        .package_size
        .filter(|size| *size > Decimal::ZERO)
        .ok_or_else(|| missing("package_size"))?;

    let free_units = properties.free_units.unwrap_or(Decimal::ZERO);
    let billable = (units - free_units).max(Decimal::ZERO);
    if billable.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let packages = (billable / package_size).ceil();
    Ok(packages * unit_price)
}

/// `base_amount × (percentage / 100)`.
pub fn percentage(base_amount: Decimal, properties: &ChargeProperties) -> Result<Decimal> {
    let rate = properties.percentage.ok_or_else(|| missing("percentage"))?;
    Ok(base_amount * rate / Decimal::ONE_HUNDRED)
}

/// Graduated walk over a pre-computed base amount; each tier applies its
/// percentage rate to its slice of the amount axis.
pub fn graduated_percentage(
    base_amount: Decimal,
    properties: &ChargeProperties,
) -> Result<Decimal> {
    if properties.tiers.is_empty() {
        return Err(missing("tiers"));
    }

    let mut remaining = base_amount;
    let mut amount = Decimal::ZERO;
    let mut lower_bound = Decimal::ZERO;

    for tier in &properties.tiers {
        if remaining <= Decimal::ZERO {
            break;
        }
        let capacity = match tier.up_to {
            Some(bound) => bound - lower_bound,
            None => remaining,
        };
        let slice = remaining.min(capacity);
        if slice > Decimal::ZERO {
            amount += slice * tier.rate / Decimal::ONE_HUNDRED + tier.flat_amount;
            remaining -= slice;
        }
        if let Some(bound) = tier.up_to {
            lower_bound = bound;
        }
    }

    Ok(amount)
}

/// Evaluate the charge expression once per event against that event's
/// numeric properties, and sum.
pub fn dynamic(events: &[Map<String, Value>], properties: &ChargeProperties) -> Result<Decimal> {
    let raw = properties.expression.as_deref().ok_or_else(|| missing("expression"))?;
    let expression = Expression::parse(raw)?;

    let mut amount = Decimal::ZERO;
    for event_properties in events {
        let variables = numeric_properties(event_properties);
        amount += expression.evaluate(&variables)?;
    }

    Ok(amount)
}

/// Single evaluation of the charge expression against `units` plus the
/// numeric charge properties.
pub fn custom(units: Decimal, properties: &ChargeProperties) -> Result<Decimal> {
    let raw = properties.expression.as_deref().ok_or_else(|| missing("expression"))?;
    let expression = Expression::parse(raw)?;

    let mut variables = HashMap::new();
    variables.insert("units".to_string(), units);
    for (name, value) in [
        ("unit_price", properties.unit_price),
        ("min_price", properties.min_price),
        ("max_price", properties.max_price),
        ("package_size", properties.package_size),
        ("free_units", properties.free_units),
        ("percentage", properties.percentage),
    ] {
        if let Some(value) = value {
            variables.insert(name.to_string(), value);
        }
    }

    expression.evaluate(&variables)
}

fn containing_tier<'a>(units: Decimal, tiers: &'a [ChargeTier]) -> Result<&'a ChargeTier> {
    tiers
        .iter()
        .find(|tier| tier.up_to.map_or(true, |bound| units <= bound))
        .or_else(|| tiers.last())
        .ok_or_else(|| missing("tiers"))
}
