use chrono::NaiveDate;
use rust_decimal::Decimal;
use tally_core::AccountId;

use crate::statement::collect_rows;
use crate::store::require_account;
use crate::{LedgerError, LedgerResult, LineRow, SqliteStore};

/// Date-ordered history of an account with a cumulative pound balance
/// attached to every line.
///
/// Pure read: nothing in the store is mutated or cached, so the result is
/// always consistent with the latest shared-charge recompute or edit. Lines
/// with no recorded amount contribute nothing and are filtered out before
/// accumulation. With `inclusive` false the cutoff is the day before
/// `as_of`. No history yields an empty list.
pub fn running_balance(
    store: &SqliteStore,
    account_id: &AccountId,
    as_of: NaiveDate,
    inclusive: bool,
) -> LedgerResult<Vec<LineRow>> {
    let conn = store.connect()?;
    require_account(&conn, account_id)?;
    let cutoff = if inclusive {
        as_of
    } else {
        as_of.pred_opt().ok_or_else(|| {
            LedgerError::Validation(format!("no day precedes {as_of} for an exclusive balance"))
        })?
    };

    let mut rows = collect_rows(&conn, account_id, Some(cutoff))?;
    rows.retain(|row| row.amount.is_some());

    let mut running = Decimal::ZERO;
    for row in &mut rows {
        running += row.gross_total_gbp.unwrap_or(Decimal::ZERO);
        row.running_total = Some(running);
    }
    Ok(rows)
}

/// The account's cumulative pound balance at the cutoff; zero with no
/// history.
pub fn balance(
    store: &SqliteStore,
    account_id: &AccountId,
    as_of: NaiveDate,
    inclusive: bool,
) -> LedgerResult<Decimal> {
    let rows = running_balance(store, account_id, as_of, inclusive)?;
    Ok(rows
        .last()
        .and_then(|row| row.running_total)
        .unwrap_or(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewTransaction;
    use crate::{Account, AccountStatus, TransactionKind};
    use rust_decimal_macros::dec;
    use tally_core::Currency;
    use tempfile::tempdir;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn pound_transaction(account: &AccountId, day: NaiveDate, amount: Decimal) -> NewTransaction {
        NewTransaction {
            account_id: account.clone(),
            kind: TransactionKind::Adjustment,
            date: day,
            amount: Some(amount),
            currency: Currency::Gbp,
            exchange_rate: None,
            reference: None,
            project_code: None,
            task_code: None,
        }
    }

    fn seeded_store(dir: &tempfile::TempDir) -> (SqliteStore, AccountId) {
        let store = SqliteStore::open(dir.path().join("tally.db")).unwrap();
        let account = Account::new("123456789012", "research", AccountStatus::Active);
        store.upsert_account(&account).unwrap();
        (store, account.id)
    }

    #[test]
    fn empty_history_is_zero() {
        let dir = tempdir().unwrap();
        let (store, id) = seeded_store(&dir);
        assert!(running_balance(&store, &id, date(2024, 6, 1), true)
            .unwrap()
            .is_empty());
        assert_eq!(balance(&store, &id, date(2024, 6, 1), true).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn accumulates_in_date_order_regardless_of_insertion_order() {
        let dir = tempdir().unwrap();
        let (store, id) = seeded_store(&dir);
        // Inserted newest first; the running totals must still follow dates.
        store
            .insert_transaction(&pound_transaction(&id, date(2024, 3, 1), dec!(30)))
            .unwrap();
        store
            .insert_transaction(&pound_transaction(&id, date(2024, 1, 1), dec!(10)))
            .unwrap();
        store
            .insert_transaction(&pound_transaction(&id, date(2024, 2, 1), dec!(20)))
            .unwrap();

        let rows = running_balance(&store, &id, date(2024, 12, 31), true).unwrap();
        let totals: Vec<_> = rows.iter().map(|row| row.running_total.unwrap()).collect();
        assert_eq!(totals, vec![dec!(10), dec!(30), dec!(60)]);
    }

    #[test]
    fn same_day_ties_keep_insertion_order() {
        let dir = tempdir().unwrap();
        let (store, id) = seeded_store(&dir);
        let day = date(2024, 5, 1);
        let first = store
            .insert_transaction(&pound_transaction(&id, day, dec!(1)))
            .unwrap();
        let second = store
            .insert_transaction(&pound_transaction(&id, day, dec!(2)))
            .unwrap();

        let rows = running_balance(&store, &id, day, true).unwrap();
        assert_eq!(rows[0].id, first);
        assert_eq!(rows[1].id, second);
        assert_eq!(rows[1].running_total, Some(dec!(3)));
    }

    #[test]
    fn exclusive_cutoff_stops_the_day_before() {
        let dir = tempdir().unwrap();
        let (store, id) = seeded_store(&dir);
        store
            .insert_transaction(&pound_transaction(&id, date(2024, 4, 1), dec!(100)))
            .unwrap();
        store
            .insert_transaction(&pound_transaction(&id, date(2024, 4, 2), dec!(50)))
            .unwrap();

        assert_eq!(balance(&store, &id, date(2024, 4, 2), true).unwrap(), dec!(150));
        assert_eq!(balance(&store, &id, date(2024, 4, 2), false).unwrap(), dec!(100));
    }

    #[test]
    fn unrecorded_amounts_are_filtered_out() {
        let dir = tempdir().unwrap();
        let (store, id) = seeded_store(&dir);
        let mut account = store.account(&id).unwrap().unwrap();
        account.open_date = Some(date(2024, 1, 1));
        store.upsert_account(&account).unwrap();
        crate::reconcile(&store, &id, date(2024, 2, 15)).unwrap();
        store
            .insert_transaction(&pound_transaction(&id, date(2024, 1, 10), dec!(25)))
            .unwrap();

        // Both usage lines still have null amounts and must not appear.
        let rows = running_balance(&store, &id, date(2024, 2, 15), true).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].running_total, Some(dec!(25)));
    }
}
