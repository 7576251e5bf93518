//! Internal HTTP API
//!
//! All ledger routes live under `/internal/v1`; `/health` and the API docs
//! sit at the root. Every request runs under the configured timeout.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::LedgerError;
pub use state::{AppState, Stores};
use types::ApiError;

async fn request_timeout(
    State(timeout): State<Duration>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(%method, %path, timeout_ms = timeout.as_millis() as u64, "Request timed out");
            ApiError::from(LedgerError::Timeout(format!("{} {}", method, path))).into_response()
        }
    }
}

pub fn router(state: Arc<AppState>, timeout: Duration) -> Router {
    let internal = Router::new()
        // Accounts & balances
        .route("/accounts", post(handlers::open_account))
        .route("/accounts/{account_id}/status", post(handlers::set_account_status))
        .route("/balances/reserve", post(handlers::reserve))
        .route("/balances/release", post(handlers::release))
        .route("/balances/update", post(handlers::update_balance))
        .route("/balances/{account_id}", get(handlers::get_balances))
        .route("/balances/{account_id}/{currency}", get(handlers::get_balance))
        // Journal
        .route("/transactions", post(handlers::create_transaction))
        .route("/transactions/{account_id}", get(handlers::list_transactions))
        .route("/trades/settle", post(handlers::settle_trade))
        // Deposits
        .route(
            "/deposits",
            post(handlers::record_deposit).get(handlers::list_deposits),
        )
        .route("/deposits/{id}", get(handlers::get_deposit))
        .route("/deposits/{id}/confirmations", post(handlers::confirm_deposit))
        .route("/deposit-addresses", post(handlers::register_address))
        .route("/banking/events", post(handlers::banking_event))
        // Withdrawals
        .route("/withdrawals", post(handlers::request_withdrawal))
        .route("/withdrawals/{id}", get(handlers::get_withdrawal))
        .route("/withdrawals/{id}/approve", post(handlers::approve_withdrawal))
        .route("/withdrawals/{id}/fail", post(handlers::fail_withdrawal))
        // Reconciliation & proof of reserves
        .route("/reconciliation/run", post(handlers::run_reconciliation))
        .route("/reconciliation/report", get(handlers::get_reconciliation_report))
        .route("/proof-of-reserves/run", post(handlers::run_proof_of_reserves))
        .route("/proof-of-reserves/latest", get(handlers::latest_proof_of_reserves))
        .route(
            "/proof-of-reserves/proof/{account_id}/{currency}",
            get(handlers::inclusion_proof),
        )
        .route("/proof-of-reserves/verify", post(handlers::verify_proof));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/internal/v1", internal)
        .layer(from_fn_with_state(timeout, request_timeout))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Internal API listening");
        info!("API docs: http://{}/docs", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClients;
    use crate::config::AppConfig;
    use crate::money::CurrencyRegistry;
    use crate::storage::MemoryStore;
    use crate::withdrawal::settlement::mock::MockSettlementClient;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const CONFIG: &str = r#"
log_level: info
log_dir: ./logs
log_file: ledger.log
use_json: false
rotation: never
server: { host: 127.0.0.1, port: 0 }
currencies:
  - { code: BTC, decimals: 8, kind: crypto, required_confirmations: 2 }
  - { code: USD, decimals: 2, kind: fiat }
fee_account: fees
"#;

    fn app() -> Router {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let currencies = Arc::new(CurrencyRegistry::from_config(&config.currencies).unwrap());
        let state = AppState::new(
            &config,
            currencies,
            Stores::from_backend(Arc::new(MemoryStore::new())),
            ChainClients::new(),
            Arc::new(MockSettlementClient::new()),
            None,
        );
        router(Arc::new(state), config.request_timeout())
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn funded(app: &Router, account: &str, amount: &str) {
        call(app, "POST", "/internal/v1/accounts", Some(json!({ "account_id": account }))).await;
        let (status, _) = call(
            app,
            "POST",
            "/internal/v1/balances/update",
            Some(json!({
                "account_id": account,
                "currency": "USD",
                "amount": amount,
                "entry_type": "deposit",
                "reference_id": "seed",
                "reference_type": "test"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["storage"], "memory");
    }

    #[tokio::test]
    async fn test_balance_lifecycle() {
        let app = app();
        funded(&app, "alice", "100").await;

        let (status, body) = call(
            &app,
            "POST",
            "/internal/v1/balances/reserve",
            Some(json!({ "account_id": "alice", "currency": "USD", "amount": "30", "reference": "ord-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        let (status, body) = call(&app, "GET", "/internal/v1/balances/alice/USD", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["balance"], "100");
        assert_eq!(body["data"]["available_balance"], "70");
        assert_eq!(body["data"]["reserved_balance"], "30");

        let (status, body) = call(
            &app,
            "POST",
            "/internal/v1/transactions",
            Some(json!({ "account_id": "alice", "currency": "USD", "amount": "-20", "entry_type": "adjustment" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["new_balance"], "80");
        assert!(body["data"]["transaction_id"].is_string());

        let (status, body) = call(&app, "GET", "/internal/v1/transactions/alice?currency=USD", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["entries"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_error_responses() {
        let app = app();
        funded(&app, "bob", "10").await;

        let (status, body) = call(&app, "GET", "/internal/v1/balances/bob/EUR", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "WALLET_NOT_FOUND");

        let (status, body) = call(
            &app,
            "POST",
            "/internal/v1/balances/reserve",
            Some(json!({ "account_id": "bob", "currency": "USD", "amount": "11" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "INSUFFICIENT_BALANCE");
        assert_eq!(body["code"], types::error_codes::INSUFFICIENT_BALANCE);

        let (status, body) = call(
            &app,
            "POST",
            "/internal/v1/balances/update",
            Some(json!({ "account_id": "bob", "currency": "USD", "amount": "0.001", "entry_type": "deposit" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "PRECISION_OVERFLOW");
    }

    #[tokio::test]
    async fn test_reconciliation_and_proofs() {
        let app = app();
        funded(&app, "carol", "42.5").await;

        let (status, body) = call(&app, "POST", "/internal/v1/reconciliation/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["discrepancy_count"], 0);

        let (status, body) = call(&app, "GET", "/internal/v1/reconciliation/report", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");

        let (status, _) = call(&app, "POST", "/internal/v1/proof-of-reserves/run", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, proof) =
            call(&app, "GET", "/internal/v1/proof-of-reserves/proof/carol/USD", None).await;
        assert_eq!(status, StatusCode::OK);
        let proof = &proof["data"];

        let (status, body) = call(
            &app,
            "POST",
            "/internal/v1/proof-of-reserves/verify",
            Some(json!({
                "account_id": "carol",
                "currency": "USD",
                "balance": proof["balance"],
                "nonce": proof["nonce"],
                "merkle_root": proof["merkle_root"],
                "path": proof["path"],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["valid"], true);

        let (status, _) =
            call(&app, "GET", "/internal/v1/proof-of-reserves/proof/nobody/USD", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_withdrawal_routes() {
        let app = app();
        funded(&app, "dave", "50").await;

        let (status, body) = call(
            &app,
            "POST",
            "/internal/v1/withdrawals",
            Some(json!({ "account_id": "dave", "currency": "USD", "amount": "20", "fee": "1", "destination": "acct-9" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/internal/v1/withdrawals/{}/fail", id),
            Some(json!({ "reason": "compliance" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "POST", &format!("/internal/v1/withdrawals/{}/approve", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_STATE_TRANSITION");

        let (_, body) = call(&app, "GET", "/internal/v1/balances/dave/USD", None).await;
        assert_eq!(body["data"]["available_balance"], "50");
    }
}
