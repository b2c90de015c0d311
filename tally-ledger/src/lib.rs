//! Billing ledger for a fleet of cloud accounts.
//!
//! One SQLite file holds accounts, their automatically maintained monthly
//! usage lines, ad-hoc transactions, shared-charge allocations and recharge
//! batches. Everything money-shaped is [`rust_decimal::Decimal`]; derived
//! totals (support surcharge, VAT, pound conversion) are recomputed from
//! recorded inputs rather than stored.

pub mod account;
pub mod allocate;
pub mod balance;
pub mod compute;
pub mod error;
pub mod import;
pub mod line;
pub mod quality;
pub mod recharge;
pub mod reconcile;
pub mod statement;
pub mod store;

pub use account::{Account, AccountStatus, AccountSync};
pub use allocate::{
    delete_shared_charge, save_shared_charge, shared_charge, shared_charges_for_month,
    AllocationOutcome, SharedCharge, SharedChargeInput,
};
pub use balance::{balance, running_balance};
pub use compute::{
    gbp_to_usd, transaction_totals, usage_totals, usd_to_gbp, LineTotals, SUPPORT_PROGRAM_START,
};
pub use error::{LedgerError, LedgerResult};
pub use import::{import_rates, import_usage};
pub use line::{AdHocTransaction, LineKind, LineRef, LineRow, RecurringUsage, TransactionKind};
pub use quality::{quality_report, CoverageGap, QualityReport};
pub use recharge::{
    assign_lines, collect_range, create_request, delete_request, export_csv, list_requests,
    summarize, unassign_lines, update_request, AssignmentOutcome, RechargeRequest, RequestStatus,
    SkipReason, SummaryRow,
};
pub use reconcile::reconcile;
pub use statement::{account_statement, statement_json};
pub use store::{NewTransaction, SqliteStore};
