use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::expression::Expression;
use crate::domain::types::{ChargeId, ChargeModel, MetricCode};
use crate::error::{BillingError, Result};

/// One pricing tier. `up_to` is inclusive; `None` means unbounded and is
/// only valid on the last tier. `unit_price` prices units for graduated and
/// volume models; `rate` is the percentage applied by graduated-percentage
/// tiers. `flat_amount` is added once when the tier is engaged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeTier {
    pub up_to: Option<Decimal>,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub rate: Decimal,
    #[serde(default)]
    pub flat_amount: Decimal,
}

impl ChargeTier {
    pub fn new(up_to: Option<Decimal>, unit_price: Decimal) -> Self {
        Self {
            up_to,
            unit_price,
            rate: Decimal::ZERO,
            flat_amount: Decimal::ZERO,
        }
    }
}

/// Open property bag for a charge; which keys are required depends on the
/// charge model and is checked by [`Charge::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeProperties {
    pub unit_price: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub tiers: Vec<ChargeTier>,
    pub package_size: Option<Decimal>,
    pub free_units: Option<Decimal>,
    pub percentage: Option<Decimal>,
    pub expression: Option<String>,
}

/// A priced component of a plan. `metric_code` is `None` only for flat fees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: ChargeId,
    pub metric_code: Option<MetricCode>,
    pub model: ChargeModel,
    pub properties: ChargeProperties,
}

impl Charge {
    pub fn new(
        metric_code: Option<MetricCode>,
        model: ChargeModel,
        properties: ChargeProperties,
    ) -> Self {
        Self {
            id: ChargeId::new(),
            metric_code,
            model,
            properties,
        }
    }

    /// Check the properties bag carries everything the model needs.
    pub fn validate(&self) -> Result<()> {
        match self.model {
            ChargeModel::Standard => {
                self.require(self.properties.unit_price.is_some(), "unit_price")?;
            }
            ChargeModel::Graduated | ChargeModel::Volume | ChargeModel::GraduatedPercentage => {
                self.require(!self.properties.tiers.is_empty(), "tiers")?;
                self.validate_tiers()?;
            }
            ChargeModel::Package => {
                self.require(self.properties.unit_price.is_some(), "unit_price")?;
                let size = self.properties.package_size.unwrap_or(Decimal::ZERO);
                if size <= Decimal::ZERO {
                    return Err(BillingError::InvalidConfiguration {
                        message: format!("charge {} requires a positive package_size", self.id),
                    });
                }
            }
            ChargeModel::Percentage => {
                self.require(self.properties.percentage.is_some(), "percentage")?;
            }
            ChargeModel::Dynamic | ChargeModel::Custom => {
                match self.properties.expression.as_deref() {
                    Some(raw) if !raw.trim().is_empty() => {
                        Expression::parse(raw)?;
                    }
                    _ => {
                        return Err(BillingError::InvalidConfiguration {
                            message: format!("charge {} requires an expression", self.id),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn require(&self, present: bool, key: &str) -> Result<()> {
        if present {
            Ok(())
        } else {
            Err(BillingError::InvalidConfiguration {
                message: format!("charge {} ({}) is missing {key}", self.id, self.model),
            })
        }
    }

    /// Tiers must ascend strictly and only the last may be unbounded.
    fn validate_tiers(&self) -> Result<()> {
        let tiers = &self.properties.tiers;
        let mut previous: Option<Decimal> = None;

        for (index, tier) in tiers.iter().enumerate() {
            let is_last = index == tiers.len() - 1;
            match tier.up_to {
                None if !is_last => {
                    return Err(BillingError::InvalidConfiguration {
                        message: format!(
                            "charge {}: only the last tier may omit up_to",
                            self.id
                        ),
                    });
                }
                Some(bound) => {
                    if let Some(prev) = previous {
                        if bound <= prev {
                            return Err(BillingError::InvalidConfiguration {
                                message: format!(
                                    "charge {}: tiers must ascend strictly at index {index}",
                                    self.id
                                ),
                            });
                        }
                    }
                    previous = Some(bound);
                }
                None => {}
            }
        }

        Ok(())
    }
}
