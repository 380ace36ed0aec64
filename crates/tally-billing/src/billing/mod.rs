pub mod period;
pub mod progressive;
pub mod thresholds;

pub use period::{calculate_period, prorate, BillingPeriod};
pub use progressive::ProgressiveBillingCoordinator;
pub use thresholds::{ThresholdCrossing, UsageThresholdMonitor};
