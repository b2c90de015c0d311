use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::Connection;
use tally_core::{AccountId, Currency};

use crate::compute::{transaction_totals, usage_totals};
use crate::reconcile::reconcile_in;
use crate::store::{rate_for, require_account, row_to_transaction, row_to_usage};
use crate::{LedgerResult, LineKind, LineRow, SqliteStore};

/// Every ledger line of an account as grid-ready rows, oldest first.
///
/// Reconciles the account first, so the statement always covers the full
/// lifecycle, then resolves each line's exchange rate and derived totals.
/// `running_total` is left empty; the running-balance calculator fills it.
pub fn account_statement(
    store: &SqliteStore,
    account_id: &AccountId,
    today: NaiveDate,
) -> LedgerResult<Vec<LineRow>> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    let account = require_account(&tx, account_id)?;
    reconcile_in(&tx, &account, today)?;
    let rows = collect_rows(&tx, account_id, None)?;
    tx.commit()?;
    Ok(rows)
}

/// Serialize statement rows for the grid frontend.
pub fn statement_json(rows: &[LineRow]) -> LedgerResult<String> {
    serde_json::to_string(rows)
        .map_err(|err| crate::LedgerError::Serialization(format!("statement rows: {err}")))
}

/// Gather an account's lines as [`LineRow`]s, sorted ascending by date with
/// ties broken by table insertion order (usage lines before same-day
/// transactions). `cutoff` keeps only lines dated on or before it.
pub(crate) fn collect_rows(
    conn: &Connection,
    account_id: &AccountId,
    cutoff: Option<NaiveDate>,
) -> LedgerResult<Vec<LineRow>> {
    let references = request_references(conn)?;
    let mut rows: Vec<LineRow> = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT id, account_id, month_code, amount, shared_charge_share, note, recharge_request_id
         FROM monthly_usage WHERE account_id = ?1 ORDER BY month_code, id",
    )?;
    let mut usage_rows = stmt.query(rusqlite::params![account_id.as_str()])?;
    while let Some(row) = usage_rows.next()? {
        let usage = row_to_usage(row)?;
        let date = usage.date();
        if cutoff.is_some_and(|limit| date > limit) {
            continue;
        }
        let totals = usage_totals(&usage, rate_for(conn, usage.month)?);
        rows.push(LineRow {
            id: usage.id,
            kind: LineKind::Usage,
            date,
            transaction_kind: None,
            amount: usage.amount,
            shared_charge: Some(usage.shared_charge_share),
            support_charge: totals.support_charge,
            currency: Currency::Usd,
            gross_total_usd: totals.gross_usd,
            gross_total_gbp: totals.gross_gbp,
            running_total: None,
            recharge_reference: usage
                .recharge_request
                .and_then(|id| references.get(&id).cloned()),
            note: usage.note,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT id, account_id, kind, date, amount, currency, exchange_rate,
                reference, project_code, task_code, recharge_request_id
         FROM transactions WHERE account_id = ?1 ORDER BY date, id",
    )?;
    let mut tx_rows = stmt.query(rusqlite::params![account_id.as_str()])?;
    while let Some(row) = tx_rows.next()? {
        let transaction = row_to_transaction(row)?;
        if cutoff.is_some_and(|limit| transaction.date > limit) {
            continue;
        }
        let totals = transaction_totals(&transaction);
        rows.push(LineRow {
            id: transaction.id,
            kind: LineKind::Transaction,
            date: transaction.date,
            transaction_kind: Some(transaction.kind),
            amount: transaction.amount,
            shared_charge: None,
            support_charge: totals.support_charge,
            currency: transaction.currency,
            gross_total_usd: totals.gross_usd,
            gross_total_gbp: totals.gross_gbp,
            running_total: None,
            recharge_reference: transaction
                .recharge_request
                .and_then(|id| references.get(&id).cloned()),
            note: transaction.reference,
        });
    }

    // Both partitions arrive pre-sorted, so a stable sort on date alone
    // preserves insertion order within a day.
    rows.sort_by_key(|row| row.date);
    Ok(rows)
}

fn request_references(conn: &Connection) -> LedgerResult<HashMap<i64, String>> {
    let mut stmt = conn.prepare("SELECT id, reference FROM recharge_requests")?;
    let mut rows = stmt.query([])?;
    let mut references = HashMap::new();
    while let Some(row) = rows.next()? {
        references.insert(row.get::<_, i64>(0)?, row.get::<_, String>(1)?);
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewTransaction;
    use crate::{Account, AccountStatus, TransactionKind};
    use rust_decimal_macros::dec;
    use tally_core::MonthKey;
    use tempfile::tempdir;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn statement_reconciles_and_orders_by_date() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("tally.db")).unwrap();
        let mut account = Account::new("123456789012", "research", AccountStatus::Active);
        account.open_date = Some(date(2024, 1, 1));
        store.upsert_account(&account).unwrap();
        store
            .insert_transaction(&NewTransaction {
                account_id: account.id.clone(),
                kind: TransactionKind::PrePay,
                date: date(2024, 2, 14),
                amount: Some(dec!(500)),
                currency: tally_core::Currency::Gbp,
                exchange_rate: None,
                reference: Some("PO-77".into()),
                project_code: None,
                task_code: None,
            })
            .unwrap();

        let rows = account_statement(&store, &account.id, date(2024, 3, 15)).unwrap();
        // Jan, Feb, Mar usage plus the pre-pay, interleaved by date.
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].date, date(2024, 1, 1));
        assert_eq!(rows[1].date, date(2024, 2, 1));
        assert_eq!(rows[2].date, date(2024, 2, 14));
        assert_eq!(rows[2].kind, LineKind::Transaction);
        assert_eq!(rows[2].gross_total_gbp, Some(dec!(500)));
        assert_eq!(rows[3].date, date(2024, 3, 1));
        assert!(rows.iter().filter(|row| row.kind == LineKind::Usage).all(|row| row.amount.is_none()));
    }

    #[test]
    fn usage_rows_carry_month_rate_totals() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("tally.db")).unwrap();
        let mut account = Account::new("123456789012", "research", AccountStatus::Active);
        account.open_date = Some(date(2024, 9, 1));
        store.upsert_account(&account).unwrap();
        let september = MonthKey::new(2024, 9);

        crate::reconcile(&store, &account.id, date(2024, 9, 30)).unwrap();
        store.set_exchange_rate(september, dec!(0.78)).unwrap();
        let usage = store
            .usage_for_month(&account.id, september)
            .unwrap()
            .unwrap();
        store.set_usage_amount(usage.id, Some(dec!(1000))).unwrap();

        let rows = account_statement(&store, &account.id, date(2024, 9, 30)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].support_charge, dec!(100.0));
        assert_eq!(rows[0].gross_total_usd, Some(dec!(1320.00)));
        assert_eq!(rows[0].gross_total_gbp.map(tally_core::round_money), Some(dec!(1029.60)));
    }

    #[test]
    fn rows_serialize_for_the_grid() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("tally.db")).unwrap();
        let mut account = Account::new("123456789012", "research", AccountStatus::Active);
        account.open_date = Some(date(2024, 1, 1));
        store.upsert_account(&account).unwrap();

        let rows = account_statement(&store, &account.id, date(2024, 1, 15)).unwrap();
        let json = statement_json(&rows).unwrap();
        assert!(json.contains("\"kind\":\"usage\""));
        assert!(json.contains("\"date\":\"2024-01-01\""));
    }
}
