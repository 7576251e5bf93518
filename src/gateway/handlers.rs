//! Internal API handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::{info, warn};
use uuid::Uuid;

use super::state::AppState;
use super::types::{
    AccountStatusRequest, ApiError, ApiResult, BalanceUpdateResponse, ConfirmationsRequest,
    DepositListQuery, FailRequest, HealthResponse, OpenAccountRequest, TransactionQuery,
    TransactionResponse, UpdateBalanceRequest, VerifyProofRequest, VerifyProofResponse, ok,
};
use crate::banking::{BankingEvent, BankingOutcome};
use crate::deposit::{Deposit, DepositAddress, NewDeposit};
use crate::proof::{InclusionProof, ProofOfReservesReport, verify_inclusion};
use crate::reconciliation::ReconciliationReport;
use crate::reservation::{ReservationRequest, TradeFill};
use crate::wallet::{BalanceUpdate, EntryPage, LedgerEntry, Wallet};
use crate::withdrawal::{NewWithdrawal, Withdrawal};

// ============================================================================
// Accounts & balances
// ============================================================================

/// Open an account with a zero wallet per configured currency (idempotent)
#[utoipa::path(
    post,
    path = "/internal/v1/accounts",
    request_body = OpenAccountRequest,
    responses((status = 200, description = "Wallets of the account")),
    tag = "Balances"
)]
pub async fn open_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenAccountRequest>,
) -> ApiResult<Vec<Wallet>> {
    ok(state.wallets.open_account(&req.account_id).await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/accounts/{account_id}/status",
    params(("account_id" = String, Path, description = "Account id")),
    request_body = AccountStatusRequest,
    responses(
        (status = 200, description = "Status changed"),
        (status = 404, description = "Unknown account")
    ),
    tag = "Balances"
)]
pub async fn set_account_status(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Json(req): Json<AccountStatusRequest>,
) -> ApiResult<()> {
    state
        .wallets
        .set_account_status(&account_id, req.status)
        .await?;
    ok(())
}

#[utoipa::path(
    get,
    path = "/internal/v1/balances/{account_id}",
    params(("account_id" = String, Path, description = "Account id")),
    responses((status = 200, description = "All wallets of the account")),
    tag = "Balances"
)]
pub async fn get_balances(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
) -> ApiResult<Vec<Wallet>> {
    ok(state.wallets.list_wallets(&account_id).await?)
}

#[utoipa::path(
    get,
    path = "/internal/v1/balances/{account_id}/{currency}",
    params(
        ("account_id" = String, Path, description = "Account id"),
        ("currency" = String, Path, description = "Currency code")
    ),
    responses(
        (status = 200, description = "Wallet"),
        (status = 404, description = "Wallet does not exist")
    ),
    tag = "Balances"
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path((account_id, currency)): Path<(String, String)>,
) -> ApiResult<Wallet> {
    ok(state.wallets.get_wallet(&account_id, &currency).await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/balances/reserve",
    request_body(content = String, description = "account_id, currency, amount, reference", content_type = "application/json"),
    responses(
        (status = 200, description = "Wallet after the reservation"),
        (status = 422, description = "Insufficient available balance or account restricted")
    ),
    tag = "Balances"
)]
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReservationRequest>,
) -> ApiResult<Wallet> {
    ok(state.reservations.reserve(&req).await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/balances/release",
    request_body(content = String, description = "account_id, currency, amount, reference", content_type = "application/json"),
    responses(
        (status = 200, description = "Wallet after the release"),
        (status = 422, description = "Insufficient reserved balance")
    ),
    tag = "Balances"
)]
pub async fn release(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReservationRequest>,
) -> ApiResult<Wallet> {
    ok(state.reservations.release(&req).await?)
}

async fn apply_update(state: &AppState, req: UpdateBalanceRequest) -> Result<LedgerEntry, ApiError> {
    let reference = req.reference()?;
    let entry = state
        .wallets
        .update_balance(BalanceUpdate {
            account_id: req.account_id,
            currency: req.currency,
            amount: req.amount,
            entry_type: req.entry_type,
            reference,
            description: req.description,
        })
        .await?;
    Ok(entry)
}

#[utoipa::path(
    post,
    path = "/internal/v1/balances/update",
    request_body = UpdateBalanceRequest,
    responses(
        (status = 200, description = "New balance and journal entry id", body = BalanceUpdateResponse),
        (status = 422, description = "Debit exceeds available balance")
    ),
    tag = "Balances"
)]
pub async fn update_balance(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateBalanceRequest>,
) -> ApiResult<BalanceUpdateResponse> {
    let entry = apply_update(&state, req).await?;
    ok(BalanceUpdateResponse::from(&entry))
}

#[utoipa::path(
    post,
    path = "/internal/v1/transactions",
    request_body = UpdateBalanceRequest,
    responses((status = 200, description = "Recorded transaction", body = TransactionResponse)),
    tag = "Transactions"
)]
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateBalanceRequest>,
) -> ApiResult<TransactionResponse> {
    let entry = apply_update(&state, req).await?;
    ok(TransactionResponse {
        transaction_id: entry.id,
        new_balance: entry.balance_after,
    })
}

#[utoipa::path(
    get,
    path = "/internal/v1/transactions/{account_id}",
    params(("account_id" = String, Path, description = "Account id"), TransactionQuery),
    responses((status = 200, description = "Journal entries, newest first")),
    tag = "Transactions"
)]
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<EntryPage> {
    let (filter, page) = query.split();
    ok(state.wallets.list_entries(&account_id, &filter, page).await?)
}

/// Settle a matched trade against both sides' reserved funds
#[utoipa::path(
    post,
    path = "/internal/v1/trades/settle",
    request_body(content = String, description = "Trade fill", content_type = "application/json"),
    responses((status = 200, description = "Journal entries written")),
    tag = "Transactions"
)]
pub async fn settle_trade(
    State(state): State<Arc<AppState>>,
    Json(fill): Json<TradeFill>,
) -> ApiResult<Vec<LedgerEntry>> {
    ok(state.reservations.settle_fill(&fill).await?)
}

// ============================================================================
// Deposits & banking
// ============================================================================

#[utoipa::path(
    post,
    path = "/internal/v1/deposits",
    request_body(content = String, description = "Detected deposit", content_type = "application/json"),
    responses((status = 200, description = "Stored deposit (existing row on replay)")),
    tag = "Deposits"
)]
pub async fn record_deposit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewDeposit>,
) -> ApiResult<Deposit> {
    ok(state.deposits.record_deposit(req).await?)
}

#[utoipa::path(
    get,
    path = "/internal/v1/deposits",
    params(DepositListQuery),
    responses((status = 200, description = "Deposits of the account, newest first")),
    tag = "Deposits"
)]
pub async fn list_deposits(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DepositListQuery>,
) -> ApiResult<Vec<Deposit>> {
    ok(state
        .deposits
        .list_deposits(&query.account_id, query.limit.unwrap_or(50))
        .await?)
}

#[utoipa::path(
    get,
    path = "/internal/v1/deposits/{id}",
    params(("id" = Uuid, Path, description = "Deposit id")),
    responses((status = 200, description = "Deposit"), (status = 404, description = "Unknown deposit")),
    tag = "Deposits"
)]
pub async fn get_deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Deposit> {
    ok(state.deposits.get_deposit(id).await?)
}

/// Confirmation webhook: apply a reported count and credit when it crosses the threshold
#[utoipa::path(
    post,
    path = "/internal/v1/deposits/{id}/confirmations",
    params(("id" = Uuid, Path, description = "Deposit id")),
    request_body = ConfirmationsRequest,
    responses((status = 200, description = "Deposit after the update")),
    tag = "Deposits"
)]
pub async fn confirm_deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ConfirmationsRequest>,
) -> ApiResult<Deposit> {
    let outcome = state.deposits.confirm(id, req.confirmations).await?;
    info!(deposit_id = %id, outcome = ?outcome, "Confirmation webhook applied");
    ok(state.deposits.get_deposit(id).await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/deposit-addresses",
    request_body(content = String, description = "account_id, currency, address", content_type = "application/json"),
    responses(
        (status = 200, description = "Address registered"),
        (status = 400, description = "Address belongs to another account")
    ),
    tag = "Deposits"
)]
pub async fn register_address(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DepositAddress>,
) -> ApiResult<()> {
    state.deposits.register_address(req).await?;
    ok(())
}

#[utoipa::path(
    post,
    path = "/internal/v1/banking/events",
    request_body(content = String, description = "Tagged banking settlement event", content_type = "application/json"),
    responses((status = 200, description = "Event applied or recognised as a replay")),
    tag = "Deposits"
)]
pub async fn banking_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<BankingEvent>,
) -> ApiResult<BankingOutcome> {
    ok(state.banking.handle(event).await?)
}

// ============================================================================
// Withdrawals
// ============================================================================

#[utoipa::path(
    post,
    path = "/internal/v1/withdrawals",
    request_body(content = String, description = "account_id, currency, amount, fee, destination", content_type = "application/json"),
    responses(
        (status = 200, description = "Pending withdrawal with funds reserved"),
        (status = 422, description = "Insufficient available balance or account restricted")
    ),
    tag = "Withdrawals"
)]
pub async fn request_withdrawal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewWithdrawal>,
) -> ApiResult<Withdrawal> {
    ok(state.withdrawals.request(req).await?)
}

#[utoipa::path(
    get,
    path = "/internal/v1/withdrawals/{id}",
    params(("id" = Uuid, Path, description = "Withdrawal id")),
    responses((status = 200, description = "Withdrawal"), (status = 404, description = "Unknown withdrawal")),
    tag = "Withdrawals"
)]
pub async fn get_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Withdrawal> {
    ok(state.withdrawals.get(id).await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/withdrawals/{id}/approve",
    params(("id" = Uuid, Path, description = "Withdrawal id")),
    responses((status = 200, description = "Approved"), (status = 409, description = "Not pending")),
    tag = "Withdrawals"
)]
pub async fn approve_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Withdrawal> {
    ok(state.withdrawals.approve(id).await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/withdrawals/{id}/fail",
    params(("id" = Uuid, Path, description = "Withdrawal id")),
    request_body = FailRequest,
    responses((status = 200, description = "Failed, reserved funds released"), (status = 409, description = "Already terminal")),
    tag = "Withdrawals"
)]
pub async fn fail_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailRequest>,
) -> ApiResult<Withdrawal> {
    ok(state.withdrawals.fail(id, &req.reason).await?)
}

// ============================================================================
// Reconciliation & proof of reserves
// ============================================================================

#[utoipa::path(
    post,
    path = "/internal/v1/reconciliation/run",
    responses((status = 200, description = "Full reconciliation report")),
    tag = "Reconciliation"
)]
pub async fn run_reconciliation(
    State(state): State<Arc<AppState>>,
) -> ApiResult<ReconciliationReport> {
    ok(state.reconciliation.run().await?)
}

#[utoipa::path(
    get,
    path = "/internal/v1/reconciliation/report",
    responses((status = 200, description = "Latest stored report, computed if none exists")),
    tag = "Reconciliation"
)]
pub async fn get_reconciliation_report(
    State(state): State<Arc<AppState>>,
) -> ApiResult<ReconciliationReport> {
    ok(state.reconciliation.latest_or_run().await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/proof-of-reserves/run",
    responses((status = 200, description = "Published report with Merkle root")),
    tag = "Reconciliation"
)]
pub async fn run_proof_of_reserves(
    State(state): State<Arc<AppState>>,
) -> ApiResult<ProofOfReservesReport> {
    ok(state.proofs.run().await?)
}

#[utoipa::path(
    get,
    path = "/internal/v1/proof-of-reserves/latest",
    responses((status = 200, description = "Latest report, null when none was published")),
    tag = "Reconciliation"
)]
pub async fn latest_proof_of_reserves(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Option<ProofOfReservesReport>> {
    ok(state.proofs.latest().await?)
}

#[utoipa::path(
    get,
    path = "/internal/v1/proof-of-reserves/proof/{account_id}/{currency}",
    params(
        ("account_id" = String, Path, description = "Account id"),
        ("currency" = String, Path, description = "Currency code")
    ),
    responses(
        (status = 200, description = "Inclusion proof against the published root"),
        (status = 404, description = "No leaf for this wallet")
    ),
    tag = "Reconciliation"
)]
pub async fn inclusion_proof(
    State(state): State<Arc<AppState>>,
    Path((account_id, currency)): Path<(String, String)>,
) -> ApiResult<InclusionProof> {
    ok(state.proofs.inclusion_proof(&account_id, &currency).await?)
}

#[utoipa::path(
    post,
    path = "/internal/v1/proof-of-reserves/verify",
    request_body = VerifyProofRequest,
    responses((status = 200, description = "Whether the path leads to the root", body = VerifyProofResponse)),
    tag = "Reconciliation"
)]
pub async fn verify_proof(Json(req): Json<VerifyProofRequest>) -> ApiResult<VerifyProofResponse> {
    let valid = verify_inclusion(
        &req.account_id,
        &req.currency,
        req.balance,
        &req.nonce,
        &req.merkle_root,
        &req.path,
    );
    ok(VerifyProofResponse { valid })
}

// ============================================================================
// System
// ============================================================================

/// Healthy: 200 with a timestamp. Unhealthy: 503 without internal details.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable")
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    if let Some(db) = &state.db {
        if let Err(e) = db.health_check().await {
            warn!(error = %e, "Database health check failed");
            return Err(ApiError::service_unavailable("unavailable"));
        }
    }
    ok(HealthResponse {
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        storage: state.storage_kind().to_string(),
        revision: env!("GIT_REVISION").to_string(),
    })
}
