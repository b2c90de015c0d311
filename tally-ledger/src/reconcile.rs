use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use tally_core::{AccountId, MonthKey};
use tracing::info;

use crate::store::{ensure_month, require_account};
use crate::{Account, LedgerResult, SqliteStore};

/// Guarantee one usage line per calendar month of the account's lifecycle.
///
/// Missing months are created with a null amount and zero shared-charge
/// share; existing lines are never touched, and lines outside the range are
/// never deleted here (the data-quality report flags those instead).
/// Idempotent: a second call creates nothing. Returns the newly created
/// months, or an empty set when the account has no open date.
pub fn reconcile(
    store: &SqliteStore,
    account_id: &AccountId,
    today: NaiveDate,
) -> LedgerResult<Vec<MonthKey>> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    let account = require_account(&tx, account_id)?;
    let created = reconcile_in(&tx, &account, today)?;
    tx.commit()?;
    Ok(created)
}

/// Reconciliation body, shared with engines that already hold a transaction.
pub(crate) fn reconcile_in(
    conn: &Connection,
    account: &Account,
    today: NaiveDate,
) -> LedgerResult<Vec<MonthKey>> {
    let Some(open_date) = account.open_date else {
        return Ok(Vec::new());
    };
    let start = MonthKey::from_date(open_date);
    let end = MonthKey::from_date(account.final_date(today));
    if end < start {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT month_code FROM monthly_usage
         WHERE account_id = ?1 AND month_code BETWEEN ?2 AND ?3",
    )?;
    let mut rows = stmt.query(params![account.id.as_str(), start.code(), end.code()])?;
    let mut existing: HashSet<i32> = HashSet::new();
    while let Some(row) = rows.next()? {
        existing.insert(row.get(0)?);
    }

    let mut created = Vec::new();
    for month in MonthKey::range(start, end) {
        if existing.contains(&month.code()) {
            continue;
        }
        ensure_month(conn, month)?;
        conn.execute(
            "INSERT INTO monthly_usage (account_id, month_code, shared_charge_share)
             VALUES (?1, ?2, '0')",
            params![account.id.as_str(), month.code()],
        )?;
        created.push(month);
    }
    if !created.is_empty() {
        info!(
            account = %account.id,
            months = created.len(),
            "created missing usage lines"
        );
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Account, AccountStatus};
    use tempfile::tempdir;

    fn store_with_account(
        dir: &tempfile::TempDir,
        open: Option<NaiveDate>,
        close: Option<NaiveDate>,
    ) -> (SqliteStore, AccountId) {
        let store = SqliteStore::open(dir.path().join("tally.db")).unwrap();
        let mut account = Account::new("123456789012", "research", AccountStatus::Active);
        account.open_date = open;
        account.close_date = close;
        store.upsert_account(&account).unwrap();
        (store, account.id)
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn fills_every_open_month() {
        let dir = tempdir().unwrap();
        let (store, id) = store_with_account(&dir, Some(date(2024, 1, 1)), None);

        let created = reconcile(&store, &id, date(2024, 3, 15)).unwrap();
        assert_eq!(
            created,
            vec![
                MonthKey::new(2024, 1),
                MonthKey::new(2024, 2),
                MonthKey::new(2024, 3),
            ]
        );

        let usage = store.usage_for_account(&id).unwrap();
        assert_eq!(usage.len(), 3);
        assert!(usage.iter().all(|line| line.amount.is_none()));
        assert!(usage
            .iter()
            .all(|line| line.shared_charge_share.is_zero()));
    }

    #[test]
    fn is_idempotent() {
        let dir = tempdir().unwrap();
        let (store, id) = store_with_account(&dir, Some(date(2024, 1, 1)), None);
        let today = date(2024, 3, 15);

        reconcile(&store, &id, today).unwrap();
        let first: Vec<_> = store
            .usage_for_account(&id)
            .unwrap()
            .iter()
            .map(|line| line.month)
            .collect();

        let second_pass = reconcile(&store, &id, today).unwrap();
        assert!(second_pass.is_empty());
        let second: Vec<_> = store
            .usage_for_account(&id)
            .unwrap()
            .iter()
            .map(|line| line.month)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn no_open_date_is_a_no_op() {
        let dir = tempdir().unwrap();
        let (store, id) = store_with_account(&dir, None, None);
        assert!(reconcile(&store, &id, date(2024, 3, 15)).unwrap().is_empty());
        assert!(store.usage_for_account(&id).unwrap().is_empty());
    }

    #[test]
    fn stops_at_close_date() {
        let dir = tempdir().unwrap();
        let (store, id) =
            store_with_account(&dir, Some(date(2023, 11, 5)), Some(date(2024, 1, 20)));

        let created = reconcile(&store, &id, date(2024, 6, 1)).unwrap();
        assert_eq!(
            created,
            vec![
                MonthKey::new(2023, 11),
                MonthKey::new(2023, 12),
                MonthKey::new(2024, 1),
            ]
        );
    }

    #[test]
    fn lowered_close_date_leaves_existing_lines_in_place() {
        let dir = tempdir().unwrap();
        let (store, id) = store_with_account(&dir, Some(date(2024, 1, 1)), None);
        let today = date(2024, 4, 10);
        reconcile(&store, &id, today).unwrap();
        assert_eq!(store.usage_for_account(&id).unwrap().len(), 4);

        let mut account = store.account(&id).unwrap().unwrap();
        account.close_date = Some(date(2024, 2, 28));
        store.upsert_account(&account).unwrap();

        reconcile(&store, &id, today).unwrap();
        // March and April rows survive; flagging them is the quality report's job.
        assert_eq!(store.usage_for_account(&id).unwrap().len(), 4);
    }
}
