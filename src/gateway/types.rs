//! API envelope, error mapping and request/response DTOs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::proof::ProofStep;
use crate::wallet::{AccountStatus, EntryFilter, EntryType, LedgerEntry, Page, Reference};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - error: stable error name (errors only)
/// - data: payload (success only)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "ok")]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            error: None,
            data: Some(data),
        }
    }

    pub fn error(code: i32, error: &str, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            error: Some(error.to_string()),
            data: None,
        }
    }
}

/// Standard API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const ACCOUNT_RESTRICTED: i32 = 1003;
    pub const INVALID_STATE: i32 = 1004;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const EXTERNAL_SERVICE: i32 = 5002;
    pub const TIMEOUT: i32 = 5004;
}

/// Error half of every handler result
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: i32,
    error: &'static str,
    msg: String,
}

impl ApiError {
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: error_codes::SERVICE_UNAVAILABLE,
            error: "SERVICE_UNAVAILABLE",
            msg: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let code = match &e {
            LedgerError::Validation(_)
            | LedgerError::UnsupportedCurrency(_)
            | LedgerError::PrecisionOverflow { .. } => error_codes::INVALID_PARAMETER,
            LedgerError::InsufficientBalance { .. } | LedgerError::InsufficientReserved { .. } => {
                error_codes::INSUFFICIENT_BALANCE
            }
            LedgerError::AccountRestricted(_) => error_codes::ACCOUNT_RESTRICTED,
            LedgerError::InvalidStateTransition(_) => error_codes::INVALID_STATE,
            LedgerError::AccountNotFound(_)
            | LedgerError::WalletNotFound { .. }
            | LedgerError::DepositNotFound(_)
            | LedgerError::WithdrawalNotFound(_)
            | LedgerError::ProofNotFound { .. } => error_codes::NOT_FOUND,
            LedgerError::Concurrency(_) => error_codes::CONFLICT,
            LedgerError::ExternalService(_) => error_codes::EXTERNAL_SERVICE,
            LedgerError::Timeout(_) => error_codes::TIMEOUT,
            LedgerError::Database(_) | LedgerError::Integrity(_) | LedgerError::Internal(_) => {
                error_codes::INTERNAL_ERROR
            }
        };
        let status = StatusCode::from_u16(e.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let msg = if status.is_server_error() && code == error_codes::INTERNAL_ERROR {
            tracing::error!(error = %e, "Request failed with internal error");
            "internal error".to_string()
        } else {
            e.to_string()
        };
        Self {
            status,
            code,
            error: e.code(),
            msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()>::error(self.code, self.error, self.msg)),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenAccountRequest {
    pub account_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AccountStatusRequest {
    #[schema(value_type = String, example = "restricted")]
    pub status: AccountStatus,
}

/// Direct journaled balance change
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateBalanceRequest {
    pub account_id: String,
    pub currency: String,
    /// Signed: negative amounts debit the wallet
    #[schema(value_type = String, example = "100.50")]
    pub amount: Decimal,
    #[schema(value_type = String, example = "deposit")]
    pub entry_type: EntryType,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    pub description: Option<String>,
}

impl UpdateBalanceRequest {
    pub fn reference(&self) -> Result<Option<Reference>, LedgerError> {
        match (&self.reference_id, &self.reference_type) {
            (Some(id), kind) => Ok(Some(Reference::new(
                kind.as_deref().unwrap_or("manual"),
                id.as_str(),
            ))),
            (None, Some(_)) => Err(LedgerError::Validation(
                "reference_type requires reference_id".into(),
            )),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransactionQuery {
    pub currency: Option<String>,
    #[param(value_type = Option<String>)]
    pub entry_type: Option<EntryType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl TransactionQuery {
    pub fn split(self) -> (EntryFilter, Page) {
        (
            EntryFilter {
                currency: self.currency,
                entry_type: self.entry_type,
                from: self.from,
                to: self.to,
            },
            Page::new(self.limit, self.offset),
        )
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DepositListQuery {
    pub account_id: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmationsRequest {
    pub confirmations: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FailRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyProofRequest {
    pub account_id: String,
    pub currency: String,
    #[schema(value_type = String)]
    pub balance: Decimal,
    pub nonce: String,
    pub merkle_root: String,
    #[schema(value_type = Vec<Object>)]
    pub path: Vec<ProofStep>,
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceUpdateResponse {
    pub entry_id: Uuid,
    #[schema(value_type = String)]
    pub new_balance: Decimal,
}

impl From<&LedgerEntry> for BalanceUpdateResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.id,
            new_balance: entry.balance_after,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub transaction_id: Uuid,
    #[schema(value_type = String)]
    pub new_balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyProofResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = 1703494800000_i64)]
    pub timestamp_ms: i64,
    /// "postgres" or "memory"
    pub storage: String,
    /// Source revision the binary was built from
    pub revision: String,
}
