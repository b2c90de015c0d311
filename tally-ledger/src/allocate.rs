use std::collections::BTreeSet;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tally_core::{AccountId, MonthKey};
use tracing::{info, warn};

use crate::reconcile::reconcile_in;
use crate::store::{account_by_id, ensure_month, parse_decimal, require_account, usage_row_for};
use crate::{Account, LedgerError, LedgerResult, SqliteStore};

/// A cost pool split evenly across a set of accounts for one month.
#[derive(Clone, Debug)]
pub struct SharedCharge {
    pub id: i64,
    pub name: String,
    /// Net dollar amount of the whole pool.
    pub amount: Decimal,
    pub month: MonthKey,
    pub accounts: Vec<AccountId>,
}

impl SharedCharge {
    pub fn cost_per_account(&self) -> Decimal {
        self.amount / Decimal::from(self.accounts.len().max(1))
    }
}

/// Fields accepted when creating or editing a shared charge.
#[derive(Clone, Debug)]
pub struct SharedChargeInput {
    /// `None` creates a new charge; `Some` edits an existing one.
    pub id: Option<i64>,
    pub name: String,
    pub amount: Decimal,
    pub month: MonthKey,
    pub accounts: Vec<AccountId>,
}

/// What a recompute touched. Participants whose month falls outside their
/// account lifecycle are surfaced here rather than silently skipped.
#[derive(Clone, Debug, Default)]
pub struct AllocationOutcome {
    pub updated: Vec<(AccountId, Decimal)>,
    pub outside_lifecycle: Vec<(AccountId, MonthKey)>,
}

/// Insert or update a shared charge and rederive every affected share.
///
/// The recompute is always a full re-derivation over all charges for each
/// affected (account, month) pair, so edits, deletes, and duplicates stay
/// correct. The affected set is the union of previous and new participants;
/// when an edit moves the charge to a different month, both months are
/// recomputed. Runs as one transaction.
pub fn save_shared_charge(
    store: &SqliteStore,
    input: &SharedChargeInput,
    today: NaiveDate,
) -> LedgerResult<(i64, AllocationOutcome)> {
    if input.name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "shared charge must have a name".into(),
        ));
    }
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;

    // Reject unknown participants before touching anything.
    for account_id in &input.accounts {
        if account_by_id(&tx, account_id)?.is_none() {
            return Err(LedgerError::Validation(format!(
                "shared charge \"{}\" references unknown account {account_id}",
                input.name
            )));
        }
    }
    ensure_month(&tx, input.month)?;

    let mut affected: BTreeSet<(MonthKey, AccountId)> = BTreeSet::new();
    let charge_id = match input.id {
        Some(id) => {
            let previous = charge_by_id(&tx, id)?.ok_or_else(|| {
                LedgerError::DataIntegrity(format!("shared charge {id} does not exist"))
            })?;
            for account_id in previous.accounts {
                affected.insert((previous.month, account_id));
            }
            tx.execute(
                "UPDATE shared_charges SET name = ?2, amount = ?3, month_code = ?4 WHERE id = ?1",
                params![id, input.name, input.amount.to_string(), input.month.code()],
            )?;
            tx.execute(
                "DELETE FROM shared_charge_accounts WHERE shared_charge_id = ?1",
                params![id],
            )?;
            id
        }
        None => {
            tx.execute(
                "INSERT INTO shared_charges (name, amount, month_code) VALUES (?1, ?2, ?3)",
                params![input.name, input.amount.to_string(), input.month.code()],
            )?;
            tx.last_insert_rowid()
        }
    };

    for account_id in &input.accounts {
        tx.execute(
            "INSERT OR IGNORE INTO shared_charge_accounts (shared_charge_id, account_id)
             VALUES (?1, ?2)",
            params![charge_id, account_id.as_str()],
        )?;
        affected.insert((input.month, account_id.clone()));
    }

    let outcome = recompute_shares(&tx, &affected, today)?;
    tx.commit()?;
    Ok((charge_id, outcome))
}

/// Delete a shared charge and rederive shares for every account that
/// participated in it.
pub fn delete_shared_charge(
    store: &SqliteStore,
    charge_id: i64,
    today: NaiveDate,
) -> LedgerResult<AllocationOutcome> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    let charge = charge_by_id(&tx, charge_id)?.ok_or_else(|| {
        LedgerError::DataIntegrity(format!("shared charge {charge_id} does not exist"))
    })?;
    // Join rows cascade with the charge.
    tx.execute("DELETE FROM shared_charges WHERE id = ?1", params![charge_id])?;

    let affected: BTreeSet<(MonthKey, AccountId)> = charge
        .accounts
        .into_iter()
        .map(|account_id| (charge.month, account_id))
        .collect();
    let outcome = recompute_shares(&tx, &affected, today)?;
    tx.commit()?;
    Ok(outcome)
}

pub fn shared_charge(store: &SqliteStore, charge_id: i64) -> LedgerResult<Option<SharedCharge>> {
    let conn = store.connect()?;
    charge_by_id(&conn, charge_id)
}

pub fn shared_charges_for_month(
    store: &SqliteStore,
    month: MonthKey,
) -> LedgerResult<Vec<SharedCharge>> {
    let conn = store.connect()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, amount, month_code FROM shared_charges
         WHERE month_code = ?1 ORDER BY id",
    )?;
    let mut rows = stmt.query(params![month.code()])?;
    let mut charges = Vec::new();
    while let Some(row) = rows.next()? {
        charges.push(read_charge(&conn, row)?);
    }
    Ok(charges)
}

fn charge_by_id(conn: &Connection, charge_id: i64) -> LedgerResult<Option<SharedCharge>> {
    let header: Option<(i64, String, String, i32)> = conn
        .query_row(
            "SELECT id, name, amount, month_code FROM shared_charges WHERE id = ?1",
            params![charge_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    let Some((id, name, amount, month_code)) = header else {
        return Ok(None);
    };
    Ok(Some(SharedCharge {
        id,
        name,
        amount: parse_decimal(&amount)?,
        month: MonthKey::from_code(month_code),
        accounts: charge_participants(conn, id)?,
    }))
}

fn read_charge(conn: &Connection, row: &rusqlite::Row<'_>) -> LedgerResult<SharedCharge> {
    let id: i64 = row.get(0)?;
    let name: String = row.get(1)?;
    let amount: String = row.get(2)?;
    let month_code: i32 = row.get(3)?;
    Ok(SharedCharge {
        id,
        name,
        amount: parse_decimal(&amount)?,
        month: MonthKey::from_code(month_code),
        accounts: charge_participants(conn, id)?,
    })
}

fn charge_participants(conn: &Connection, charge_id: i64) -> LedgerResult<Vec<AccountId>> {
    let mut stmt = conn.prepare(
        "SELECT account_id FROM shared_charge_accounts
         WHERE shared_charge_id = ?1 ORDER BY account_id",
    )?;
    let mut rows = stmt.query(params![charge_id])?;
    let mut accounts = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        accounts.push(AccountId::from(id));
    }
    Ok(accounts)
}

/// Full re-derivation of `shared_charge_share` for each target pair: the sum
/// over every charge the account participates in for that month of
/// `amount / participant_count`. Never an incremental add.
fn recompute_shares(
    conn: &Connection,
    targets: &BTreeSet<(MonthKey, AccountId)>,
    today: NaiveDate,
) -> LedgerResult<AllocationOutcome> {
    let mut outcome = AllocationOutcome::default();
    for (month, account_id) in targets {
        let account = require_account(conn, account_id)?;
        let total = share_total(conn, account_id, *month)?;

        let usage = match usage_row_for(conn, account_id, *month)? {
            Some(usage) => usage,
            None if month_in_lifecycle(&account, *month, today) => {
                reconcile_in(conn, &account, today)?;
                usage_row_for(conn, account_id, *month)?.ok_or_else(|| {
                    LedgerError::DataIntegrity(format!(
                        "usage line for account {account_id} in {month} missing after reconcile"
                    ))
                })?
            }
            None => {
                warn!(
                    account = %account_id,
                    month = %month,
                    "shared charge participant has no usage line for the month; \
                     account lifecycle does not cover it"
                );
                outcome.outside_lifecycle.push((account_id.clone(), *month));
                continue;
            }
        };
        conn.execute(
            "UPDATE monthly_usage SET shared_charge_share = ?2 WHERE id = ?1",
            params![usage.id, total.to_string()],
        )?;
        outcome.updated.push((account_id.clone(), total));
    }
    info!(
        updated = outcome.updated.len(),
        surfaced = outcome.outside_lifecycle.len(),
        "recomputed shared-charge shares"
    );
    Ok(outcome)
}

fn share_total(conn: &Connection, account_id: &AccountId, month: MonthKey) -> LedgerResult<Decimal> {
    let mut stmt = conn.prepare(
        "SELECT sc.amount,
                (SELECT COUNT(*) FROM shared_charge_accounts j2
                 WHERE j2.shared_charge_id = sc.id) AS participants
         FROM shared_charges sc
         JOIN shared_charge_accounts j ON j.shared_charge_id = sc.id
         WHERE j.account_id = ?1 AND sc.month_code = ?2",
    )?;
    let mut rows = stmt.query(params![account_id.as_str(), month.code()])?;
    let mut total = Decimal::ZERO;
    while let Some(row) = rows.next()? {
        let amount: String = row.get(0)?;
        let participants: i64 = row.get(1)?;
        total += parse_decimal(&amount)? / Decimal::from(participants.max(1));
    }
    Ok(total)
}

fn month_in_lifecycle(account: &Account, month: MonthKey, today: NaiveDate) -> bool {
    let Some(open_date) = account.open_date else {
        return false;
    };
    month >= MonthKey::from_date(open_date)
        && month <= MonthKey::from_date(account.final_date(today))
}
