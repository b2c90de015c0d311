use rust_decimal::Decimal;
use tally_core::MonthKey;

use crate::{AdHocTransaction, RecurringUsage};

/// First month of the support program; eligible spend from here on pays the
/// 10% surcharge.
pub const SUPPORT_PROGRAM_START: MonthKey = MonthKey::new(2024, 8);

/// 10% support surcharge on eligible net spend.
fn support_rate() -> Decimal {
    Decimal::new(1, 1)
}

/// VAT multiplier applied net-of-support.
fn vat_multiplier() -> Decimal {
    Decimal::new(12, 1)
}

/// Derived monetary totals for a single ledger line. Values stay at full
/// decimal precision; rounding happens only at display and export.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LineTotals {
    pub support_charge: Decimal,
    pub gross_usd: Option<Decimal>,
    pub gross_gbp: Option<Decimal>,
}

/// Compute the totals for a usage line given its month's exchange rate.
///
/// An unrecorded amount yields empty totals. Shared-charge share joins the
/// net amount before both the support surcharge and VAT are applied.
pub fn usage_totals(usage: &RecurringUsage, exchange_rate: Decimal) -> LineTotals {
    let Some(amount) = usage.amount else {
        return LineTotals::default();
    };
    let support_charge = if usage.month >= SUPPORT_PROGRAM_START {
        (amount + usage.shared_charge_share) * support_rate()
    } else {
        Decimal::ZERO
    };
    let gross_usd = (amount + usage.shared_charge_share + support_charge) * vat_multiplier();
    LineTotals {
        support_charge,
        gross_usd: Some(gross_usd),
        gross_gbp: Some(usd_to_gbp(gross_usd, exchange_rate)),
    }
}

/// Compute the totals for an ad-hoc transaction.
///
/// Pound lines are settled directly: the gross pound total is the amount
/// itself and no dollar total exists. Dollar lines pay support only for
/// support-bearing kinds dated on or after the program start, and VAT only
/// for VAT-bearing kinds, then convert via the line's own exchange rate.
pub fn transaction_totals(tx: &AdHocTransaction) -> LineTotals {
    let Some(amount) = tx.amount else {
        return LineTotals::default();
    };
    match tx.currency {
        tally_core::Currency::Gbp => LineTotals {
            support_charge: Decimal::ZERO,
            gross_usd: None,
            gross_gbp: Some(amount),
        },
        tally_core::Currency::Usd => {
            let eligible =
                tx.kind.bears_support() && MonthKey::from_date(tx.date) >= SUPPORT_PROGRAM_START;
            let support_charge = if eligible {
                amount * support_rate()
            } else {
                Decimal::ZERO
            };
            let gross_usd = if tx.kind.bears_vat() {
                (amount + support_charge) * vat_multiplier()
            } else {
                amount + support_charge
            };
            LineTotals {
                support_charge,
                gross_usd: Some(gross_usd),
                gross_gbp: tx.exchange_rate.map(|rate| usd_to_gbp(gross_usd, rate)),
            }
        }
    }
}

/// Convert dollars to pounds at the given USD-per-GBP rate.
pub fn usd_to_gbp(usd: Decimal, rate: Decimal) -> Decimal {
    usd * rate
}

/// Inverse of [`usd_to_gbp`]. A zero rate has no inverse and maps to zero.
pub fn gbp_to_usd(gbp: Decimal, rate: Decimal) -> Decimal {
    if rate.is_zero() {
        Decimal::ZERO
    } else {
        gbp / rate
    }
}
