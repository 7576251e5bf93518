//! OpenAPI document for the internal API, served by Swagger UI at `/docs`

use utoipa::OpenApi;

use super::handlers;
use super::types::{
    AccountStatusRequest, BalanceUpdateResponse, ConfirmationsRequest, FailRequest,
    HealthResponse, OpenAccountRequest, TransactionResponse, UpdateBalanceRequest,
    VerifyProofRequest, VerifyProofResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Exchange Ledger Internal API",
        version = "1.0.0",
        description = "Wallet balances, journal, deposits, withdrawals, reconciliation and proof of reserves"
    ),
    paths(
        handlers::health_check,
        handlers::open_account,
        handlers::set_account_status,
        handlers::get_balances,
        handlers::get_balance,
        handlers::reserve,
        handlers::release,
        handlers::update_balance,
        handlers::create_transaction,
        handlers::list_transactions,
        handlers::settle_trade,
        handlers::record_deposit,
        handlers::list_deposits,
        handlers::get_deposit,
        handlers::confirm_deposit,
        handlers::register_address,
        handlers::banking_event,
        handlers::request_withdrawal,
        handlers::get_withdrawal,
        handlers::approve_withdrawal,
        handlers::fail_withdrawal,
        handlers::run_reconciliation,
        handlers::get_reconciliation_report,
        handlers::run_proof_of_reserves,
        handlers::latest_proof_of_reserves,
        handlers::inclusion_proof,
        handlers::verify_proof,
    ),
    components(schemas(
        OpenAccountRequest,
        AccountStatusRequest,
        UpdateBalanceRequest,
        BalanceUpdateResponse,
        TransactionResponse,
        ConfirmationsRequest,
        FailRequest,
        VerifyProofRequest,
        VerifyProofResponse,
        HealthResponse,
    )),
    tags(
        (name = "System", description = "Health"),
        (name = "Balances", description = "Accounts, wallets and reservations"),
        (name = "Transactions", description = "Journal and trade settlement"),
        (name = "Deposits", description = "Deposit tracking and banking events"),
        (name = "Withdrawals", description = "Withdrawal lifecycle"),
        (name = "Reconciliation", description = "Reconciliation and proof of reserves")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_internal_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/internal/v1/balances/{account_id}/{currency}"));
        assert!(paths.contains_key("/internal/v1/reconciliation/run"));
        assert!(paths.contains_key("/internal/v1/proof-of-reserves/verify"));
    }
}
