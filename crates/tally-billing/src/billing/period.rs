//! Billing period boundaries and proration.
//!
//! Calendar periods align to fixed boundaries (Monday, first of month,
//! quarter start, January 1st) regardless of subscription start.
//! Anniversary periods anchor to the subscription's start instant and walk
//! whole intervals, clamping day-of-month to each target month.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::subscriptions::Subscription;
use crate::domain::types::{BillingInterval, BillingTime};
use crate::error::Result;

/// The half-open interval `[start, end)` a subscription is metered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Compute the billing period containing `reference`.
pub fn calculate_period(
    subscription: &Subscription,
    interval: BillingInterval,
    reference: DateTime<Utc>,
) -> Result<BillingPeriod> {
    let period = match subscription.billing_time {
        BillingTime::Calendar => calendar_period(interval, reference),
        BillingTime::Anniversary => {
            anniversary_period(subscription.period_anchor(), interval, reference)
        }
    };
    Ok(period)
}

fn calendar_period(interval: BillingInterval, reference: DateTime<Utc>) -> BillingPeriod {
    let date = reference.date_naive();
    match interval {
        BillingInterval::Weekly => {
            let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
            let start = midnight(monday);
            BillingPeriod {
                start,
                end: start + Duration::weeks(1),
            }
        }
        BillingInterval::Monthly => {
            let start = midnight(first_of_month(date.year(), date.month()));
            BillingPeriod {
                start,
                end: add_months(start, 1),
            }
        }
        BillingInterval::Quarterly => {
            let quarter_month = ((date.month() - 1) / 3) * 3 + 1;
            let start = midnight(first_of_month(date.year(), quarter_month));
            BillingPeriod {
                start,
                end: add_months(start, 3),
            }
        }
        BillingInterval::Yearly => {
            let start = midnight(first_of_month(date.year(), 1));
            BillingPeriod {
                start,
                end: add_months(start, 12),
            }
        }
    }
}

fn anniversary_period(
    anchor: DateTime<Utc>,
    interval: BillingInterval,
    reference: DateTime<Utc>,
) -> BillingPeriod {
    let mut index: i32 = 0;
    loop {
        let start = shift(anchor, interval, index);
        let end = shift(anchor, interval, index + 1);
        if reference < start {
            index -= 1;
        } else if reference >= end {
            index += 1;
        } else {
            return BillingPeriod { start, end };
        }
    }
}

/// `anchor` moved by `index` whole intervals. Month-based intervals always
/// clamp against the anchor's own day-of-month, so a Jan 31 anchor yields
/// Feb 28/29 and then Mar 31, never drifting.
fn shift(anchor: DateTime<Utc>, interval: BillingInterval, index: i32) -> DateTime<Utc> {
    match interval {
        BillingInterval::Weekly => anchor + Duration::weeks(i64::from(index)),
        BillingInterval::Monthly => add_months(anchor, index),
        BillingInterval::Quarterly => add_months(anchor, 3 * index),
        BillingInterval::Yearly => add_months(anchor, 12 * index),
    }
}

/// Move an instant by whole months, clamping the day to the target month's
/// last valid day. The time of day is preserved.
fn add_months(instant: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    let total = instant.year() * 12 + instant.month0() as i32 + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = instant.day().min(days_in_month(year, month));

    NaiveDate::from_ymd_opt(year, month, day)
        .map(|date| date.and_time(instant.time()).and_utc())
        .unwrap_or(instant)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// Scale a full-period amount by the day fraction of the period a slice
/// covers, half-up to the nearest integer currency unit. A slice covering
/// the whole period returns the amount untouched; non-positive durations
/// return zero.
pub fn prorate(
    amount: Decimal,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    slice_start: DateTime<Utc>,
    slice_end: DateTime<Utc>,
) -> Decimal {
    let period_days = (period_end - period_start).num_days();
    let slice_days = (slice_end - slice_start).num_days();
    if period_days <= 0 || slice_days <= 0 {
        return Decimal::ZERO;
    }
    if slice_days >= period_days {
        return amount;
    }

    (amount * Decimal::from(slice_days) / Decimal::from(period_days))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}
