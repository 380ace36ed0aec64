//! Progressive billing: invoicing usage-to-date before the period ends.
//!
//! Amounts already billed early in a period are netted out so usage is
//! never billed twice; the same total is credited against the final
//! end-of-period invoice.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::billing::period::BillingPeriod;
use crate::billing::thresholds::UsageThresholdMonitor;
use crate::domain::subscriptions::Subscription;
use crate::error::Result;
use crate::storage::catalog::InvoiceRepository;

pub struct ProgressiveBillingCoordinator {
    monitor: Arc<UsageThresholdMonitor>,
    invoices: Arc<dyn InvoiceRepository>,
}

impl ProgressiveBillingCoordinator {
    pub fn new(monitor: Arc<UsageThresholdMonitor>, invoices: Arc<dyn InvoiceRepository>) -> Self {
        Self { monitor, invoices }
    }

    /// Amount owed now: projected period amount minus what progressive
    /// invoices already billed this period, floored at zero.
    pub async fn incremental_amount_due(
        &self,
        subscription: &Subscription,
        period: &BillingPeriod,
    ) -> Result<Decimal> {
        let projected = self
            .monitor
            .current_projected_amount(subscription, period)
            .await?;
        let already_billed = self
            .invoices
            .progressive_invoiced_total(&subscription.id, period.start, period.end)
            .await?;

        Ok((projected - already_billed).max(Decimal::ZERO))
    }

    /// Total billed early this period, to be subtracted from the final
    /// end-of-period invoice.
    pub async fn period_credit(
        &self,
        subscription: &Subscription,
        period: &BillingPeriod,
    ) -> Result<Decimal> {
        self.invoices
            .progressive_invoiced_total(&subscription.id, period.start, period.end)
            .await
    }
}
