use chrono::NaiveDate;
use serde::Serialize;
use tally_core::{AccountId, MonthKey};
use tracing::info;

use crate::{AccountStatus, LedgerResult, LineRef, SqliteStore};

/// An account whose usage coverage has holes: months inside its lifecycle
/// with no usage line at all.
#[derive(Clone, Debug, Serialize)]
pub struct CoverageGap {
    pub account_id: AccountId,
    pub missing: Vec<MonthKey>,
}

/// Everything the hygiene sweep found. Empty vectors mean a clean ledger;
/// reporting never mutates anything.
#[derive(Clone, Debug, Default, Serialize)]
pub struct QualityReport {
    /// Accounts that cannot be reconciled because they have no open date.
    pub missing_open_date: Vec<AccountId>,
    /// Closed or suspended accounts that never recorded a close date.
    pub missing_close_date: Vec<AccountId>,
    pub coverage_gaps: Vec<CoverageGap>,
    /// Usage lines dated outside their account's lifecycle, typically left
    /// behind after a close date moved earlier.
    pub out_of_range_usage: Vec<(AccountId, MonthKey)>,
    /// Recharge-credit transactions with no project code to post against.
    pub recharge_missing_project_code: Vec<(AccountId, LineRef)>,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_open_date.is_empty()
            && self.missing_close_date.is_empty()
            && self.coverage_gaps.is_empty()
            && self.out_of_range_usage.is_empty()
            && self.recharge_missing_project_code.is_empty()
    }
}

/// Sweep the whole ledger for the conditions the report describes.
pub fn quality_report(store: &SqliteStore, today: NaiveDate) -> LedgerResult<QualityReport> {
    let mut report = QualityReport::default();

    for account in store.accounts()? {
        // The date and transaction checks are independent; an account missing
        // its open date still gets the rest of the sweep.
        if matches!(
            account.status,
            AccountStatus::Closed | AccountStatus::Suspended
        ) && account.close_date.is_none()
        {
            report.missing_close_date.push(account.id.clone());
        }
        if account.open_date.is_none() {
            report.missing_open_date.push(account.id.clone());
        }

        for tx in store.transactions_for_account(&account.id)? {
            if tx.kind == crate::TransactionKind::RechargeCredit && tx.project_code.is_none() {
                report
                    .recharge_missing_project_code
                    .push((account.id.clone(), LineRef::transaction(tx.id)));
            }
        }

        // Coverage checks need a lifecycle to compare against.
        let Some(open_date) = account.open_date else {
            continue;
        };
        let start = MonthKey::from_date(open_date);
        let end = MonthKey::from_date(account.final_date(today));
        let recorded: Vec<MonthKey> = store
            .usage_for_account(&account.id)?
            .iter()
            .map(|line| line.month)
            .collect();

        if start <= end {
            let missing: Vec<MonthKey> = MonthKey::range(start, end)
                .filter(|month| !recorded.contains(month))
                .collect();
            if !missing.is_empty() {
                report.coverage_gaps.push(CoverageGap {
                    account_id: account.id.clone(),
                    missing,
                });
            }
        }
        for month in recorded {
            if month < start || month > end {
                report.out_of_range_usage.push((account.id.clone(), month));
            }
        }
    }

    if !report.is_clean() {
        info!(
            missing_open_date = report.missing_open_date.len(),
            missing_close_date = report.missing_close_date.len(),
            coverage_gaps = report.coverage_gaps.len(),
            out_of_range = report.out_of_range_usage.len(),
            uncoded_recharges = report.recharge_missing_project_code.len(),
            "ledger hygiene issues found"
        );
    }
    Ok(report)
}
