use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{round_money, AccountId};
use tracing::{info, warn};

use crate::compute::{transaction_totals, usage_totals};
use crate::store::{parse_date, rate_for, row_to_transaction, row_to_usage};
use crate::{LedgerError, LedgerResult, LineKind, LineRef, SqliteStore};

/// A named, dated batch of ledger lines submitted for internal invoicing.
/// The request groups lines by reference; it never owns them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RechargeRequest {
    pub id: i64,
    pub reference: String,
    pub created: NaiveDate,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: RequestStatus,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestStatus {
    Draft,
    Submitted,
    Completed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Draft => "Draft",
            RequestStatus::Submitted => "Submitted",
            RequestStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(RequestStatus::Draft),
            "Submitted" => Ok(RequestStatus::Submitted),
            "Completed" => Ok(RequestStatus::Completed),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// Why a line was passed over during assignment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// The line's amount is still unrecorded; it cannot be recharged.
    MissingAmount,
    /// The line already belongs to another request and is never silently
    /// reassigned.
    AlreadyAssigned { request: i64 },
}

/// Result of an assignment pass: which lines were attached and which were
/// skipped, with the reason for each skip.
#[derive(Clone, Debug, Default)]
pub struct AssignmentOutcome {
    pub assigned: Vec<LineRef>,
    pub skipped: Vec<(LineRef, SkipReason)>,
}

/// One exported row of a batch summary: an account and its rounded pound
/// total across every line assigned to the request.
#[derive(Clone, Debug, Serialize)]
pub struct SummaryRow {
    pub account_id: AccountId,
    pub account_name: String,
    pub budget_holder: Option<String>,
    pub budget_holder_email: Option<String>,
    pub finance_code: Option<String>,
    pub task_code: Option<String>,
    pub line_count: usize,
    pub total: Decimal,
}

pub fn create_request(
    store: &SqliteStore,
    reference: &str,
    created: NaiveDate,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> LedgerResult<RechargeRequest> {
    if reference.trim().is_empty() {
        return Err(LedgerError::Validation(
            "recharge request must have a reference".into(),
        ));
    }
    if end_date < start_date {
        return Err(LedgerError::Validation(format!(
            "recharge request {reference}: end date {end_date} precedes start date {start_date}"
        )));
    }
    let conn = store.connect()?;
    conn.execute(
        "INSERT INTO recharge_requests (reference, created, start_date, end_date, status)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            reference,
            created.to_string(),
            start_date.to_string(),
            end_date.to_string(),
            RequestStatus::Draft.as_str(),
        ],
    )?;
    Ok(RechargeRequest {
        id: conn.last_insert_rowid(),
        reference: reference.to_string(),
        created,
        start_date,
        end_date,
        status: RequestStatus::Draft,
    })
}

pub fn request(store: &SqliteStore, request_id: i64) -> LedgerResult<Option<RechargeRequest>> {
    let conn = store.connect()?;
    request_by_id(&conn, request_id)
}

pub fn list_requests(store: &SqliteStore) -> LedgerResult<Vec<RechargeRequest>> {
    let conn = store.connect()?;
    let mut stmt = conn.prepare(
        "SELECT id, reference, created, start_date, end_date, status
         FROM recharge_requests ORDER BY start_date, id",
    )?;
    let mut rows = stmt.query([])?;
    let mut requests = Vec::new();
    while let Some(row) = rows.next()? {
        requests.push(row_to_request(row)?);
    }
    Ok(requests)
}

pub fn update_request(
    store: &SqliteStore,
    request_id: i64,
    reference: &str,
    status: RequestStatus,
) -> LedgerResult<()> {
    if reference.trim().is_empty() {
        return Err(LedgerError::Validation(format!(
            "recharge request {request_id} must keep a non-empty reference"
        )));
    }
    let conn = store.connect()?;
    let changed = conn.execute(
        "UPDATE recharge_requests SET reference = ?2, status = ?3 WHERE id = ?1",
        params![request_id, reference, status.as_str()],
    )?;
    if changed == 0 {
        return Err(LedgerError::DataIntegrity(format!(
            "recharge request {request_id} does not exist"
        )));
    }
    Ok(())
}

/// Attach lines to a request. Lines with unrecorded amounts and lines
/// already assigned elsewhere are skipped with a warning, never mutated.
pub fn assign_lines(
    store: &SqliteStore,
    lines: &[LineRef],
    request_id: i64,
) -> LedgerResult<AssignmentOutcome> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    require_request(&tx, request_id)?;
    let outcome = assign_refs(&tx, lines, request_id)?;
    tx.commit()?;
    Ok(outcome)
}

/// Attach every not-yet-assigned line dated within the request's own date
/// range, for accounts that are recharged at all. Skips follow the same
/// rules as [`assign_lines`].
pub fn collect_range(store: &SqliteStore, request_id: i64) -> LedgerResult<AssignmentOutcome> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    let request = require_request(&tx, request_id)?;

    let mut candidates: Vec<LineRef> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT u.id, u.month_code FROM monthly_usage u
             JOIN accounts a ON a.id = u.account_id
             WHERE a.is_recharged AND u.recharge_request_id IS NULL
             ORDER BY u.id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let month = tally_core::MonthKey::from_code(row.get(1)?);
            let date = month.first_day();
            if date >= request.start_date && date <= request.end_date {
                candidates.push(LineRef::usage(id));
            }
        }
        let mut stmt = tx.prepare(
            "SELECT t.id FROM transactions t
             JOIN accounts a ON a.id = t.account_id
             WHERE a.is_recharged AND t.recharge_request_id IS NULL
               AND t.date >= ?1 AND t.date <= ?2
             ORDER BY t.id",
        )?;
        let mut rows = stmt.query(params![
            request.start_date.to_string(),
            request.end_date.to_string()
        ])?;
        while let Some(row) = rows.next()? {
            candidates.push(LineRef::transaction(row.get(0)?));
        }
    }

    let outcome = assign_refs(&tx, &candidates, request_id)?;
    tx.commit()?;
    info!(
        request = request_id,
        assigned = outcome.assigned.len(),
        skipped = outcome.skipped.len(),
        "collected lines into recharge request"
    );
    Ok(outcome)
}

/// Detach lines from whatever request they belong to. Unconditional; a line
/// that was never assigned is left as-is.
pub fn unassign_lines(store: &SqliteStore, lines: &[LineRef]) -> LedgerResult<()> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    for line in lines {
        let changed = tx.execute(
            &format!(
                "UPDATE {} SET recharge_request_id = NULL WHERE id = ?1",
                table_for(line.kind)
            ),
            params![line.id],
        )?;
        if changed == 0 {
            return Err(LedgerError::DataIntegrity(format!(
                "{line} does not exist"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

/// Delete a request. Refused while any line still references it; deleting a
/// non-empty batch is an error, not a cascade.
pub fn delete_request(store: &SqliteStore, request_id: i64) -> LedgerResult<()> {
    let mut conn = store.connect()?;
    let tx = conn.transaction()?;
    require_request(&tx, request_id)?;
    let assigned: i64 = tx.query_row(
        "SELECT (SELECT COUNT(*) FROM monthly_usage WHERE recharge_request_id = ?1)
              + (SELECT COUNT(*) FROM transactions WHERE recharge_request_id = ?1)",
        params![request_id],
        |row| row.get(0),
    )?;
    if assigned > 0 {
        return Err(LedgerError::StateConflict(format!(
            "recharge request {request_id} still has {assigned} assigned lines; \
             unassign them before deleting"
        )));
    }
    tx.execute(
        "DELETE FROM recharge_requests WHERE id = ?1",
        params![request_id],
    )?;
    tx.commit()?;
    Ok(())
}

/// Per-account totals over every line assigned to the request. The set of
/// summarized lines is exactly the set of lines referencing the request.
pub fn summarize(store: &SqliteStore, request_id: i64) -> LedgerResult<Vec<SummaryRow>> {
    let conn = store.connect()?;
    require_request(&conn, request_id)?;

    struct Accumulator {
        row: SummaryRow,
        total: Decimal,
    }
    let mut by_account: std::collections::BTreeMap<AccountId, Accumulator> =
        std::collections::BTreeMap::new();

    let mut add = |conn: &Connection,
                   account_id: AccountId,
                   gross_gbp: Option<Decimal>|
     -> LedgerResult<()> {
        let entry = match by_account.entry(account_id.clone()) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(slot) => {
                let account = crate::store::require_account(conn, &account_id)?;
                slot.insert(Accumulator {
                    row: SummaryRow {
                        account_id: account.id,
                        account_name: account.name,
                        budget_holder: account.budget_holder,
                        budget_holder_email: account.budget_holder_email,
                        finance_code: account.finance_code,
                        task_code: account.task_code,
                        line_count: 0,
                        total: Decimal::ZERO,
                    },
                    total: Decimal::ZERO,
                })
            }
        };
        entry.row.line_count += 1;
        entry.total += gross_gbp.unwrap_or(Decimal::ZERO);
        Ok(())
    };

    let mut stmt = conn.prepare(
        "SELECT id, account_id, month_code, amount, shared_charge_share, note, recharge_request_id
         FROM monthly_usage WHERE recharge_request_id = ?1 ORDER BY id",
    )?;
    let mut rows = stmt.query(params![request_id])?;
    while let Some(row) = rows.next()? {
        let usage = row_to_usage(row)?;
        let totals = usage_totals(&usage, rate_for(&conn, usage.month)?);
        add(&conn, usage.account_id, totals.gross_gbp)?;
    }

    let mut stmt = conn.prepare(
        "SELECT id, account_id, kind, date, amount, currency, exchange_rate,
                reference, project_code, task_code, recharge_request_id
         FROM transactions WHERE recharge_request_id = ?1 ORDER BY id",
    )?;
    let mut rows = stmt.query(params![request_id])?;
    while let Some(row) = rows.next()? {
        let transaction = row_to_transaction(row)?;
        let totals = transaction_totals(&transaction);
        add(&conn, transaction.account_id, totals.gross_gbp)?;
    }

    let mut summary: Vec<SummaryRow> = by_account
        .into_values()
        .map(|mut acc| {
            acc.row.total = round_money(acc.total);
            acc.row
        })
        .collect();
    summary.sort_by(|a, b| a.account_name.cmp(&b.account_name));
    Ok(summary)
}

/// Render summary rows as the comma-separated journal-transfer export. The
/// CC column is always left empty for the finance team to fill in.
pub fn export_csv(rows: &[SummaryRow]) -> String {
    let mut out = String::from(
        "Account Number, Account Name, Budget Holder Name, Budget Holder Email, \
         CC email, Finance Code, Task Code, Total\n",
    );
    for row in rows {
        out.push_str(&format!(
            "{}, {}, {}, {}, , {}, {}, {:.2}\n",
            row.account_id,
            row.account_name,
            row.budget_holder.as_deref().unwrap_or(""),
            row.budget_holder_email.as_deref().unwrap_or(""),
            row.finance_code.as_deref().unwrap_or(""),
            row.task_code.as_deref().unwrap_or(""),
            row.total,
        ));
    }
    out
}

fn table_for(kind: LineKind) -> &'static str {
    match kind {
        LineKind::Usage => "monthly_usage",
        LineKind::Transaction => "transactions",
    }
}

fn require_request(conn: &Connection, request_id: i64) -> LedgerResult<RechargeRequest> {
    request_by_id(conn, request_id)?.ok_or_else(|| {
        LedgerError::DataIntegrity(format!("recharge request {request_id} does not exist"))
    })
}

fn request_by_id(conn: &Connection, request_id: i64) -> LedgerResult<Option<RechargeRequest>> {
    conn.query_row(
        "SELECT id, reference, created, start_date, end_date, status
         FROM recharge_requests WHERE id = ?1",
        params![request_id],
        |row| Ok(row_to_request_raw(row)),
    )
    .optional()?
    .transpose()
}

fn row_to_request_raw(row: &rusqlite::Row<'_>) -> LedgerResult<RechargeRequest> {
    let id: i64 = row.get(0)?;
    let reference: String = row.get(1)?;
    let created: String = row.get(2)?;
    let start_date: String = row.get(3)?;
    let end_date: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(RechargeRequest {
        id,
        reference,
        created: parse_date(&created)?,
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        status: RequestStatus::from_str(&status).map_err(LedgerError::Serialization)?,
    })
}

fn row_to_request(row: &rusqlite::Row<'_>) -> LedgerResult<RechargeRequest> {
    row_to_request_raw(row)
}

fn assign_refs(
    conn: &Connection,
    lines: &[LineRef],
    request_id: i64,
) -> LedgerResult<AssignmentOutcome> {
    let mut outcome = AssignmentOutcome::default();
    for line in lines {
        let state: Option<(Option<String>, Option<i64>)> = conn
            .query_row(
                &format!(
                    "SELECT amount, recharge_request_id FROM {} WHERE id = ?1",
                    table_for(line.kind)
                ),
                params![line.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((amount, current)) = state else {
            return Err(LedgerError::DataIntegrity(format!(
                "{line} does not exist"
            )));
        };
        if amount.is_none() {
            warn!(%line, request = request_id, "skipping line with unrecorded amount");
            outcome.skipped.push((*line, SkipReason::MissingAmount));
            continue;
        }
        match current {
            Some(other) if other != request_id => {
                warn!(
                    %line,
                    assigned_to = other,
                    request = request_id,
                    "line already belongs to another recharge request"
                );
                outcome
                    .skipped
                    .push((*line, SkipReason::AlreadyAssigned { request: other }));
                continue;
            }
            Some(_) => {
                // Already on this request; assignment is idempotent.
                outcome.assigned.push(*line);
                continue;
            }
            None => {}
        }
        conn.execute(
            &format!(
                "UPDATE {} SET recharge_request_id = ?2 WHERE id = ?1",
                table_for(line.kind)
            ),
            params![line.id, request_id],
        )?;
        outcome.assigned.push(*line);
    }
    Ok(outcome)
}
