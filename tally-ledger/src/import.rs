use chrono::NaiveDate;
use rusqlite::params;
use rust_decimal::Decimal;
use tally_core::{AccountId, MonthKey};
use tracing::info;

use crate::reconcile::reconcile_in;
use crate::store::{account_by_id, parse_decimal, usage_row_for};
use crate::{LedgerError, LedgerResult, SqliteStore};

/// Record exchange rates for a batch of months in one transaction. Every
/// rate is validated before anything is written; a bad rate rejects the
/// whole batch.
pub fn import_rates(store: &SqliteStore, rates: &[(MonthKey, Decimal)]) -> LedgerResult<()> {
    for (month, rate) in rates {
        if *rate <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "exchange rate for {month} must be positive, got {rate}"
            )));
        }
    }
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    for (month, rate) in rates {
        tx.execute(
            "INSERT INTO months (month_code, exchange_rate) VALUES (?1, ?2)
             ON CONFLICT(month_code) DO UPDATE SET exchange_rate = excluded.exchange_rate",
            params![month.code(), rate.to_string()],
        )?;
    }
    tx.commit()?;
    info!(months = rates.len(), "imported exchange rates");
    Ok(())
}

/// Load one month of provider billing figures, given as
/// `(account id, dollar amount)` text pairs straight off the billing export.
///
/// All rows are validated up front; the first bad row rejects the whole
/// batch, named by its position. Each touched account is reconciled before
/// its amount lands, so the usage line is guaranteed to exist. Returns the
/// number of usage lines written.
pub fn import_usage(
    store: &SqliteStore,
    month: MonthKey,
    rows: &[(String, String)],
    today: NaiveDate,
) -> LedgerResult<usize> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;

    let mut parsed: Vec<(AccountId, Decimal)> = Vec::with_capacity(rows.len());
    for (index, (account_text, amount_text)) in rows.iter().enumerate() {
        let line = index + 1;
        let account_text = account_text.trim();
        if account_text.len() != 12 || !account_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LedgerError::Validation(format!(
                "usage import line {line}: {account_text:?} is not a 12-digit account id"
            )));
        }
        let account_id = AccountId::new(account_text);
        if account_by_id(&tx, &account_id)?.is_none() {
            return Err(LedgerError::Validation(format!(
                "usage import line {line}: account {account_id} is not in the ledger"
            )));
        }
        let amount = parse_decimal(amount_text.trim()).map_err(|_| {
            LedgerError::Validation(format!(
                "usage import line {line}: {amount_text:?} is not a decimal amount"
            ))
        })?;
        parsed.push((account_id, amount));
    }

    let mut written = 0;
    for (account_id, amount) in parsed {
        let account = crate::store::require_account(&tx, &account_id)?;
        reconcile_in(&tx, &account, today)?;
        let usage = usage_row_for(&tx, &account_id, month)?.ok_or_else(|| {
            LedgerError::DataIntegrity(format!(
                "account {account_id} has no usage line for {month}; \
                 is {month} outside its lifecycle?"
            ))
        })?;
        tx.execute(
            "UPDATE monthly_usage SET amount = ?2 WHERE id = ?1",
            params![usage.id, amount.to_string()],
        )?;
        written += 1;
    }
    tx.commit()?;
    info!(%month, lines = written, "imported monthly usage");
    Ok(written)
}
