use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tally_core::{AccountId, Currency, MonthKey};

use crate::{
    Account, AccountStatus, AccountSync, AdHocTransaction, LedgerError, LedgerResult,
    RecurringUsage, TransactionKind,
};

const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    status TEXT NOT NULL,
    budget_holder TEXT,
    budget_holder_email TEXT,
    finance_code TEXT,
    task_code TEXT,
    open_date TEXT,
    close_date TEXT,
    is_recharged INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS months (
    month_code INTEGER PRIMARY KEY,
    exchange_rate TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS recharge_requests (
    id INTEGER PRIMARY KEY,
    reference TEXT NOT NULL,
    created TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS monthly_usage (
    id INTEGER PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    month_code INTEGER NOT NULL REFERENCES months(month_code),
    amount TEXT,
    shared_charge_share TEXT NOT NULL DEFAULT '0',
    note TEXT,
    recharge_request_id INTEGER REFERENCES recharge_requests(id),
    UNIQUE (account_id, month_code)
);
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    kind TEXT NOT NULL,
    date TEXT NOT NULL,
    amount TEXT,
    currency TEXT NOT NULL,
    exchange_rate TEXT,
    reference TEXT,
    project_code TEXT,
    task_code TEXT,
    recharge_request_id INTEGER REFERENCES recharge_requests(id)
);
CREATE TABLE IF NOT EXISTS shared_charges (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    amount TEXT NOT NULL,
    month_code INTEGER NOT NULL REFERENCES months(month_code)
);
CREATE TABLE IF NOT EXISTS shared_charge_accounts (
    shared_charge_id INTEGER NOT NULL REFERENCES shared_charges(id) ON DELETE CASCADE,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    PRIMARY KEY (shared_charge_id, account_id)
);
CREATE INDEX IF NOT EXISTS usage_idx_account_month
    ON monthly_usage(account_id, month_code);
CREATE INDEX IF NOT EXISTS usage_idx_request
    ON monthly_usage(recharge_request_id);
CREATE INDEX IF NOT EXISTS transactions_idx_account_date
    ON transactions(account_id, date);
CREATE INDEX IF NOT EXISTS transactions_idx_request
    ON transactions(recharge_request_id);
"#;

const USAGE_COLUMNS: &str =
    "id, account_id, month_code, amount, shared_charge_share, note, recharge_request_id";
const TRANSACTION_COLUMNS: &str = "id, account_id, kind, date, amount, currency, exchange_rate, \
     reference, project_code, task_code, recharge_request_id";
const ACCOUNT_COLUMNS: &str = "id, name, email, status, budget_holder, budget_holder_email, \
     finance_code, task_code, open_date, close_date, is_recharged";

/// Fields accepted when recording a new ad-hoc transaction.
#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub date: NaiveDate,
    pub amount: Option<Decimal>,
    pub currency: Currency,
    pub exchange_rate: Option<Decimal>,
    pub reference: Option<String>,
    pub project_code: Option<String>,
    pub task_code: Option<String>,
}

/// SQLite-backed ledger store. Every engine operation receives this handle
/// and runs inside a single transaction on its own connection.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let store = Self { path: path.into() };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(())
    }

    pub(crate) fn connect(&self) -> LedgerResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        Ok(conn)
    }

    // --- accounts ---

    pub fn upsert_account(&self, account: &Account) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO accounts (id, name, email, status, budget_holder, budget_holder_email,
                                   finance_code, task_code, open_date, close_date, is_recharged)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 status = excluded.status,
                 budget_holder = excluded.budget_holder,
                 budget_holder_email = excluded.budget_holder_email,
                 finance_code = excluded.finance_code,
                 task_code = excluded.task_code,
                 open_date = excluded.open_date,
                 close_date = excluded.close_date,
                 is_recharged = excluded.is_recharged",
            params![
                account.id.as_str(),
                account.name,
                account.email,
                account.status.as_str(),
                account.budget_holder,
                account.budget_holder_email,
                account.finance_code,
                account.task_code,
                account.open_date.map(|date| date.to_string()),
                account.close_date.map(|date| date.to_string()),
                account.is_recharged,
            ],
        )?;
        Ok(())
    }

    pub fn account(&self, id: &AccountId) -> LedgerResult<Option<Account>> {
        let conn = self.connect()?;
        account_by_id(&conn, id)
    }

    pub fn accounts(&self) -> LedgerResult<Vec<Account>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY name"))?;
        let mut rows = stmt.query([])?;
        let mut accounts = Vec::new();
        while let Some(row) = rows.next()? {
            accounts.push(row_to_account(row)?);
        }
        Ok(accounts)
    }

    /// Remove an account. Rejected while the account still owns ledger lines
    /// or participates in a shared charge.
    pub fn delete_account(&self, id: &AccountId) -> LedgerResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        require_account(&tx, id)?;
        let lines: i64 = tx.query_row(
            "SELECT (SELECT COUNT(*) FROM monthly_usage WHERE account_id = ?1)
                  + (SELECT COUNT(*) FROM transactions WHERE account_id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if lines > 0 {
            return Err(LedgerError::StateConflict(format!(
                "account {id} still owns {lines} ledger lines and cannot be deleted"
            )));
        }
        let participations: i64 = tx.query_row(
            "SELECT COUNT(*) FROM shared_charge_accounts WHERE account_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if participations > 0 {
            return Err(LedgerError::StateConflict(format!(
                "account {id} participates in {participations} shared charges; \
                 remove it from those charges first"
            )));
        }
        tx.execute("DELETE FROM accounts WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        Ok(())
    }

    /// Apply a batch of records from an external account-list refresh.
    /// Unknown accounts are created on first sighting; known accounts get
    /// their name, root email, and status updated while billing fields are
    /// left alone. Returns the number of newly created accounts.
    pub fn sync_accounts(&self, updates: &[AccountSync]) -> LedgerResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut created = 0;
        for update in updates {
            let known: bool = tx
                .query_row(
                    "SELECT 1 FROM accounts WHERE id = ?1",
                    params![update.id.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if known {
                tx.execute(
                    "UPDATE accounts SET name = ?2, email = ?3, status = ?4 WHERE id = ?1",
                    params![
                        update.id.as_str(),
                        update.name,
                        update.email,
                        update.status.as_str(),
                    ],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO accounts (id, name, email, status, is_recharged)
                     VALUES (?1, ?2, ?3, ?4, 1)",
                    params![
                        update.id.as_str(),
                        update.name,
                        update.email,
                        update.status.as_str(),
                    ],
                )?;
                created += 1;
            }
        }
        tx.commit()?;
        if created > 0 {
            tracing::info!(created, total = updates.len(), "account sync applied");
        }
        Ok(created)
    }

    // --- exchange rates ---

    /// Rate for a month, lazily creating the month row at the default rate
    /// of 1 the first time it is referenced.
    pub fn exchange_rate(&self, month: MonthKey) -> LedgerResult<Decimal> {
        let conn = self.connect()?;
        ensure_month(&conn, month)?;
        rate_for(&conn, month)
    }

    pub fn set_exchange_rate(&self, month: MonthKey, rate: Decimal) -> LedgerResult<()> {
        if rate <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "exchange rate for {month} must be positive, got {rate}"
            )));
        }
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO months (month_code, exchange_rate) VALUES (?1, ?2)
             ON CONFLICT(month_code) DO UPDATE SET exchange_rate = excluded.exchange_rate",
            params![month.code(), rate.to_string()],
        )?;
        Ok(())
    }

    /// Every month known to the store with its rate, oldest first.
    pub fn months(&self) -> LedgerResult<Vec<(MonthKey, Decimal)>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT month_code, exchange_rate FROM months ORDER BY month_code")?;
        let mut rows = stmt.query([])?;
        let mut months = Vec::new();
        while let Some(row) = rows.next()? {
            let code: i32 = row.get(0)?;
            let rate: String = row.get(1)?;
            months.push((MonthKey::from_code(code), parse_decimal(&rate)?));
        }
        Ok(months)
    }

    // --- usage lines ---

    pub fn usage(&self, id: i64) -> LedgerResult<Option<RecurringUsage>> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {USAGE_COLUMNS} FROM monthly_usage WHERE id = ?1"),
            params![id],
            |row| Ok(row_to_usage_raw(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn usage_for_month(
        &self,
        account_id: &AccountId,
        month: MonthKey,
    ) -> LedgerResult<Option<RecurringUsage>> {
        let conn = self.connect()?;
        usage_row_for(&conn, account_id, month)
    }

    pub fn usage_for_account(&self, account_id: &AccountId) -> LedgerResult<Vec<RecurringUsage>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USAGE_COLUMNS} FROM monthly_usage WHERE account_id = ?1 ORDER BY month_code"
        ))?;
        let mut rows = stmt.query(params![account_id.as_str()])?;
        let mut usage = Vec::new();
        while let Some(row) = rows.next()? {
            usage.push(row_to_usage(row)?);
        }
        Ok(usage)
    }

    pub fn set_usage_amount(&self, usage_id: i64, amount: Option<Decimal>) -> LedgerResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE monthly_usage SET amount = ?2 WHERE id = ?1",
            params![usage_id, amount.map(|value| value.to_string())],
        )?;
        if changed == 0 {
            return Err(LedgerError::DataIntegrity(format!(
                "usage line {usage_id} does not exist"
            )));
        }
        Ok(())
    }

    pub fn set_usage_note(&self, usage_id: i64, note: Option<&str>) -> LedgerResult<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE monthly_usage SET note = ?2 WHERE id = ?1",
            params![usage_id, note],
        )?;
        if changed == 0 {
            return Err(LedgerError::DataIntegrity(format!(
                "usage line {usage_id} does not exist"
            )));
        }
        Ok(())
    }

    /// Explicit, user-gated removal of a usage line, for rows flagged as
    /// out-of-range after a close date was lowered. The reconciler never
    /// deletes; only this does.
    pub fn delete_usage(&self, usage_id: i64) -> LedgerResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let batch: Option<Option<i64>> = tx
            .query_row(
                "SELECT recharge_request_id FROM monthly_usage WHERE id = ?1",
                params![usage_id],
                |row| row.get(0),
            )
            .optional()?;
        match batch {
            None => {
                return Err(LedgerError::DataIntegrity(format!(
                    "usage line {usage_id} does not exist"
                )))
            }
            Some(Some(request)) => {
                return Err(LedgerError::StateConflict(format!(
                    "usage line {usage_id} is assigned to recharge request {request}; \
                     unassign it before deleting"
                )))
            }
            Some(None) => {}
        }
        tx.execute("DELETE FROM monthly_usage WHERE id = ?1", params![usage_id])?;
        tx.commit()?;
        Ok(())
    }

    // --- ad-hoc transactions ---

    pub fn insert_transaction(&self, new: &NewTransaction) -> LedgerResult<i64> {
        validate_transaction_currency(&new.account_id, new.currency, new.exchange_rate)?;
        let conn = self.connect()?;
        require_account(&conn, &new.account_id)?;
        conn.execute(
            "INSERT INTO transactions (account_id, kind, date, amount, currency, exchange_rate,
                                       reference, project_code, task_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.account_id.as_str(),
                new.kind.as_str(),
                new.date.to_string(),
                new.amount.map(|value| value.to_string()),
                new.currency.as_str(),
                new.exchange_rate.map(|value| value.to_string()),
                new.reference,
                new.project_code,
                new.task_code,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn transaction(&self, id: i64) -> LedgerResult<Option<AdHocTransaction>> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"),
            params![id],
            |row| Ok(row_to_transaction_raw(row)),
        )
        .optional()?
        .transpose()
    }

    pub fn transactions_for_account(
        &self,
        account_id: &AccountId,
    ) -> LedgerResult<Vec<AdHocTransaction>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE account_id = ?1 ORDER BY date, id"
        ))?;
        let mut rows = stmt.query(params![account_id.as_str()])?;
        let mut transactions = Vec::new();
        while let Some(row) = rows.next()? {
            transactions.push(row_to_transaction(row)?);
        }
        Ok(transactions)
    }

    /// Save edits to a transaction's own fields. The batch reference is
    /// deliberately not writable here; only the recharge engine moves lines
    /// in and out of batches.
    pub fn update_transaction(&self, tx: &AdHocTransaction) -> LedgerResult<()> {
        validate_transaction_currency(&tx.account_id, tx.currency, tx.exchange_rate)?;
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE transactions SET kind = ?2, date = ?3, amount = ?4, currency = ?5,
                 exchange_rate = ?6, reference = ?7, project_code = ?8, task_code = ?9
             WHERE id = ?1",
            params![
                tx.id,
                tx.kind.as_str(),
                tx.date.to_string(),
                tx.amount.map(|value| value.to_string()),
                tx.currency.as_str(),
                tx.exchange_rate.map(|value| value.to_string()),
                tx.reference,
                tx.project_code,
                tx.task_code,
            ],
        )?;
        if changed == 0 {
            return Err(LedgerError::DataIntegrity(format!(
                "transaction {} does not exist",
                tx.id
            )));
        }
        Ok(())
    }

    pub fn delete_transaction(&self, id: i64) -> LedgerResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let batch: Option<Option<i64>> = tx
            .query_row(
                "SELECT recharge_request_id FROM transactions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match batch {
            None => {
                return Err(LedgerError::DataIntegrity(format!(
                    "transaction {id} does not exist"
                )))
            }
            Some(Some(request)) => {
                return Err(LedgerError::StateConflict(format!(
                    "transaction {id} is assigned to recharge request {request}; \
                     unassign it before deleting"
                )))
            }
            Some(None) => {}
        }
        tx.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }
}

fn validate_transaction_currency(
    account_id: &AccountId,
    currency: Currency,
    exchange_rate: Option<Decimal>,
) -> LedgerResult<()> {
    match (currency, exchange_rate) {
        (Currency::Usd, None) => Err(LedgerError::Validation(format!(
            "dollar transaction for account {account_id} needs an exchange rate"
        ))),
        (Currency::Usd, Some(rate)) if rate <= Decimal::ZERO => Err(LedgerError::Validation(
            format!("exchange rate for account {account_id} must be positive, got {rate}"),
        )),
        (Currency::Gbp, Some(_)) => Err(LedgerError::Validation(format!(
            "pound transaction for account {account_id} must not carry an exchange rate"
        ))),
        _ => Ok(()),
    }
}

// --- connection-level helpers shared by the engines ---

pub(crate) fn ensure_month(conn: &Connection, month: MonthKey) -> LedgerResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO months (month_code, exchange_rate) VALUES (?1, '1')",
        params![month.code()],
    )?;
    Ok(())
}

pub(crate) fn rate_for(conn: &Connection, month: MonthKey) -> LedgerResult<Decimal> {
    let rate: Option<String> = conn
        .query_row(
            "SELECT exchange_rate FROM months WHERE month_code = ?1",
            params![month.code()],
            |row| row.get(0),
        )
        .optional()?;
    match rate {
        Some(text) => parse_decimal(&text),
        None => Err(LedgerError::DataIntegrity(format!(
            "no exchange rate recorded for {month}"
        ))),
    }
}

pub(crate) fn account_by_id(conn: &Connection, id: &AccountId) -> LedgerResult<Option<Account>> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
        params![id.as_str()],
        |row| Ok(row_to_account_raw(row)),
    )
    .optional()?
    .transpose()
}

pub(crate) fn require_account(conn: &Connection, id: &AccountId) -> LedgerResult<Account> {
    account_by_id(conn, id)?.ok_or_else(|| {
        LedgerError::DataIntegrity(format!("account {id} is not present in the store"))
    })
}

pub(crate) fn usage_row_for(
    conn: &Connection,
    account_id: &AccountId,
    month: MonthKey,
) -> LedgerResult<Option<RecurringUsage>> {
    conn.query_row(
        &format!(
            "SELECT {USAGE_COLUMNS} FROM monthly_usage WHERE account_id = ?1 AND month_code = ?2"
        ),
        params![account_id.as_str(), month.code()],
        |row| Ok(row_to_usage_raw(row)),
    )
    .optional()?
    .transpose()
}

pub(crate) fn parse_decimal(text: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(text)
        .map_err(|err| LedgerError::Serialization(format!("invalid decimal {text}: {err}")))
}

pub(crate) fn parse_date(text: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::from_str(text)
        .map_err(|err| LedgerError::Serialization(format!("invalid date {text}: {err}")))
}

fn parse_opt_decimal(value: Option<String>) -> LedgerResult<Option<Decimal>> {
    value.as_deref().map(parse_decimal).transpose()
}

// The `_raw` variants keep the rusqlite row closure infallible and surface
// parse failures as LedgerError afterwards, matching how queries unwrap
// `.optional()?.transpose()`.

fn row_to_account_raw(row: &rusqlite::Row<'_>) -> LedgerResult<Account> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let email: Option<String> = row.get(2)?;
    let status: String = row.get(3)?;
    let budget_holder: Option<String> = row.get(4)?;
    let budget_holder_email: Option<String> = row.get(5)?;
    let finance_code: Option<String> = row.get(6)?;
    let task_code: Option<String> = row.get(7)?;
    let open_date: Option<String> = row.get(8)?;
    let close_date: Option<String> = row.get(9)?;
    let is_recharged: bool = row.get(10)?;
    Ok(Account {
        id: AccountId::from(id),
        name,
        email,
        status: AccountStatus::from_str(&status).map_err(LedgerError::Serialization)?,
        budget_holder,
        budget_holder_email,
        finance_code,
        task_code,
        open_date: open_date.as_deref().map(parse_date).transpose()?,
        close_date: close_date.as_deref().map(parse_date).transpose()?,
        is_recharged,
    })
}

pub(crate) fn row_to_account(row: &rusqlite::Row<'_>) -> LedgerResult<Account> {
    row_to_account_raw(row)
}

fn row_to_usage_raw(row: &rusqlite::Row<'_>) -> LedgerResult<RecurringUsage> {
    let id: i64 = row.get(0)?;
    let account_id: String = row.get(1)?;
    let month_code: i32 = row.get(2)?;
    let amount: Option<String> = row.get(3)?;
    let share: String = row.get(4)?;
    let note: Option<String> = row.get(5)?;
    let recharge_request: Option<i64> = row.get(6)?;
    Ok(RecurringUsage {
        id,
        account_id: AccountId::from(account_id),
        month: MonthKey::from_code(month_code),
        amount: parse_opt_decimal(amount)?,
        shared_charge_share: parse_decimal(&share)?,
        note,
        recharge_request,
    })
}

pub(crate) fn row_to_usage(row: &rusqlite::Row<'_>) -> LedgerResult<RecurringUsage> {
    row_to_usage_raw(row)
}

fn row_to_transaction_raw(row: &rusqlite::Row<'_>) -> LedgerResult<AdHocTransaction> {
    let id: i64 = row.get(0)?;
    let account_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let date: String = row.get(3)?;
    let amount: Option<String> = row.get(4)?;
    let currency: String = row.get(5)?;
    let exchange_rate: Option<String> = row.get(6)?;
    let reference: Option<String> = row.get(7)?;
    let project_code: Option<String> = row.get(8)?;
    let task_code: Option<String> = row.get(9)?;
    let recharge_request: Option<i64> = row.get(10)?;
    Ok(AdHocTransaction {
        id,
        account_id: AccountId::from(account_id),
        kind: TransactionKind::from_str(&kind).map_err(LedgerError::Serialization)?,
        date: parse_date(&date)?,
        amount: parse_opt_decimal(amount)?,
        currency: Currency::from_str(&currency).map_err(LedgerError::Serialization)?,
        exchange_rate: parse_opt_decimal(exchange_rate)?,
        reference,
        project_code,
        task_code,
        recharge_request,
    })
}

pub(crate) fn row_to_transaction(row: &rusqlite::Row<'_>) -> LedgerResult<AdHocTransaction> {
    row_to_transaction_raw(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn test_store(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(dir.path().join("tally.db")).unwrap()
    }

    fn active_account(id: &str) -> Account {
        Account::new(id, format!("account-{id}"), AccountStatus::Active)
    }

    #[test]
    fn account_round_trip() {
        let dir = tempdir().unwrap();
        let store = test_store(&dir);
        let mut account = active_account("123456789012");
        account.open_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        account.finance_code = Some("FC-100".into());
        store.upsert_account(&account).unwrap();

        let loaded = store.account(&account.id).unwrap().unwrap();
        assert_eq!(loaded.name, account.name);
        assert_eq!(loaded.open_date, account.open_date);
        assert_eq!(loaded.finance_code.as_deref(), Some("FC-100"));
        assert!(loaded.is_recharged);
    }

    #[test]
    fn sync_creates_on_first_sighting_and_preserves_billing_fields() {
        let dir = tempdir().unwrap();
        let store = test_store(&dir);
        let mut account = active_account("123456789012");
        account.finance_code = Some("FC-1".into());
        store.upsert_account(&account).unwrap();

        let created = store
            .sync_accounts(&[
                AccountSync {
                    id: account.id.clone(),
                    name: "renamed".into(),
                    email: Some("root@example.org".into()),
                    status: AccountStatus::Suspended,
                },
                AccountSync {
                    id: AccountId::from("210987654321"),
                    name: "fresh".into(),
                    email: None,
                    status: AccountStatus::Active,
                },
            ])
            .unwrap();
        assert_eq!(created, 1);

        let updated = store.account(&account.id).unwrap().unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.status, AccountStatus::Suspended);
        assert_eq!(updated.finance_code.as_deref(), Some("FC-1"));
        assert!(store.account(&AccountId::from("210987654321")).unwrap().is_some());
    }

    #[test]
    fn month_rate_defaults_to_one_and_is_editable() {
        let dir = tempdir().unwrap();
        let store = test_store(&dir);
        let month = MonthKey::new(2024, 3);
        assert_eq!(store.exchange_rate(month).unwrap(), Decimal::ONE);

        store.set_exchange_rate(month, dec!(0.78)).unwrap();
        assert_eq!(store.exchange_rate(month).unwrap(), dec!(0.78));

        let err = store.set_exchange_rate(month, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn usd_transaction_requires_a_rate() {
        let dir = tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert_account(&active_account("123456789012")).unwrap();

        let mut new = NewTransaction {
            account_id: AccountId::from("123456789012"),
            kind: TransactionKind::PrePay,
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            amount: Some(dec!(100)),
            currency: Currency::Usd,
            exchange_rate: None,
            reference: None,
            project_code: None,
            task_code: None,
        };
        assert!(matches!(
            store.insert_transaction(&new).unwrap_err(),
            LedgerError::Validation(_)
        ));

        new.exchange_rate = Some(dec!(0.8));
        let id = store.insert_transaction(&new).unwrap();
        let loaded = store.transaction(id).unwrap().unwrap();
        assert_eq!(loaded.exchange_rate, Some(dec!(0.8)));
        assert_eq!(loaded.kind, TransactionKind::PrePay);
    }

    #[test]
    fn pound_transaction_rejects_a_rate() {
        let dir = tempdir().unwrap();
        let store = test_store(&dir);
        store.upsert_account(&active_account("123456789012")).unwrap();

        let new = NewTransaction {
            account_id: AccountId::from("123456789012"),
            kind: TransactionKind::Adjustment,
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            amount: Some(dec!(100)),
            currency: Currency::Gbp,
            exchange_rate: Some(dec!(0.8)),
            reference: None,
            project_code: None,
            task_code: None,
        };
        assert!(matches!(
            store.insert_transaction(&new).unwrap_err(),
            LedgerError::Validation(_)
        ));
    }

    #[test]
    fn delete_account_refused_while_lines_exist() {
        let dir = tempdir().unwrap();
        let store = test_store(&dir);
        let account = active_account("123456789012");
        store.upsert_account(&account).unwrap();
        store
            .insert_transaction(&NewTransaction {
                account_id: account.id.clone(),
                kind: TransactionKind::Adjustment,
                date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                amount: Some(dec!(10)),
                currency: Currency::Gbp,
                exchange_rate: None,
                reference: None,
                project_code: None,
                task_code: None,
            })
            .unwrap();

        let err = store.delete_account(&account.id).unwrap_err();
        assert!(matches!(err, LedgerError::StateConflict(_)));
        assert!(err.to_string().contains("123456789012"));
    }
}
