use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{AccountId, Currency, MonthKey};

/// The monthly usage line automatically maintained for every open month of
/// an account. Usage amounts are always dollar-denominated; a null amount
/// means "not yet recorded".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecurringUsage {
    pub id: i64,
    pub account_id: AccountId,
    pub month: MonthKey,
    pub amount: Option<Decimal>,
    /// Written only by the shared-charge allocator.
    pub shared_charge_share: Decimal,
    pub note: Option<String>,
    pub recharge_request: Option<i64>,
}

impl RecurringUsage {
    /// Usage lines are dated on the first of their month.
    pub fn date(&self) -> NaiveDate {
        self.month.first_day()
    }
}

/// A manually entered ledger entry not tied to a usage month.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdHocTransaction {
    pub id: i64,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub date: NaiveDate,
    pub amount: Option<Decimal>,
    pub currency: Currency,
    /// USD per GBP, attached to dollar lines only; pound lines need none.
    pub exchange_rate: Option<Decimal>,
    pub reference: Option<String>,
    pub project_code: Option<String>,
    pub task_code: Option<String>,
    pub recharge_request: Option<i64>,
}

/// Kinds of ad-hoc transaction the ledger accepts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    PrePay,
    SavingsPlan,
    Adjustment,
    RechargeCredit,
    StartingBalance,
    UnrecoveredSpend,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::PrePay => "pre-pay",
            TransactionKind::SavingsPlan => "savings-plan",
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::RechargeCredit => "recharge-credit",
            TransactionKind::StartingBalance => "starting-balance",
            TransactionKind::UnrecoveredSpend => "unrecovered-spend",
        }
    }

    /// Only savings-plan commitments attract the support surcharge.
    pub fn bears_support(self) -> bool {
        matches!(self, TransactionKind::SavingsPlan)
    }

    /// Starting balances and unrecovered spend carry amounts that already
    /// went through billing once, so no VAT is added again.
    pub fn bears_vat(self) -> bool {
        !matches!(
            self,
            TransactionKind::StartingBalance | TransactionKind::UnrecoveredSpend
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre-pay" => Ok(TransactionKind::PrePay),
            "savings-plan" => Ok(TransactionKind::SavingsPlan),
            "adjustment" => Ok(TransactionKind::Adjustment),
            "recharge-credit" => Ok(TransactionKind::RechargeCredit),
            "starting-balance" => Ok(TransactionKind::StartingBalance),
            "unrecovered-spend" => Ok(TransactionKind::UnrecoveredSpend),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

/// Which of the two line tables a [`LineRef`] points into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Usage,
    Transaction,
}

impl LineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LineKind::Usage => "usage",
            LineKind::Transaction => "transaction",
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage-level handle to a single ledger line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LineRef {
    pub kind: LineKind,
    pub id: i64,
}

impl LineRef {
    pub fn usage(id: i64) -> Self {
        Self {
            kind: LineKind::Usage,
            id,
        }
    }

    pub fn transaction(id: i64) -> Self {
        Self {
            kind: LineKind::Transaction,
            id,
        }
    }
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Grid-facing restatement of one ledger line with every derived total
/// resolved. This is the shape consumed directly by rendering callers.
#[derive(Clone, Debug, Serialize)]
pub struct LineRow {
    pub id: i64,
    pub kind: LineKind,
    pub date: NaiveDate,
    pub transaction_kind: Option<TransactionKind>,
    pub amount: Option<Decimal>,
    /// Populated for usage lines only.
    pub shared_charge: Option<Decimal>,
    pub support_charge: Decimal,
    pub currency: Currency,
    pub gross_total_usd: Option<Decimal>,
    pub gross_total_gbp: Option<Decimal>,
    pub running_total: Option<Decimal>,
    pub recharge_reference: Option<String>,
    pub note: Option<String>,
}
