use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::AccountId;

/// A billed cloud account as known to the ledger.
///
/// Accounts are created on first sighting from an account-list sync or by
/// manual entry, closed by setting `close_date`, and never hard-deleted
/// while they own ledger lines.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Root email registered with the provider.
    pub email: Option<String>,
    pub status: AccountStatus,
    pub budget_holder: Option<String>,
    pub budget_holder_email: Option<String>,
    pub finance_code: Option<String>,
    pub task_code: Option<String>,
    pub open_date: Option<NaiveDate>,
    pub close_date: Option<NaiveDate>,
    /// Whether this account's lines are ever collected into recharge batches.
    pub is_recharged: bool,
}

impl Account {
    /// Minimal constructor used when an account is first sighted.
    pub fn new(id: impl Into<AccountId>, name: impl Into<String>, status: AccountStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            status,
            budget_holder: None,
            budget_holder_email: None,
            finance_code: None,
            task_code: None,
            open_date: None,
            close_date: None,
            is_recharged: true,
        }
    }

    /// Final date on which the account accrues usage: the close date capped
    /// at today, or today while the account remains open.
    pub fn final_date(&self, today: NaiveDate) -> NaiveDate {
        self.close_date.map_or(today, |close| close.min(today))
    }
}

/// Account lifecycle status as reported by the provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "Active",
            AccountStatus::Suspended => "Suspended",
            AccountStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The provider's org API reports upper-case statuses.
        match s {
            "Active" | "ACTIVE" => Ok(AccountStatus::Active),
            "Suspended" | "SUSPENDED" => Ok(AccountStatus::Suspended),
            "Closed" | "CLOSED" => Ok(AccountStatus::Closed),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// One record of an external account-list refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountSync {
    pub id: AccountId,
    pub name: String,
    pub email: Option<String>,
    pub status: AccountStatus,
}
