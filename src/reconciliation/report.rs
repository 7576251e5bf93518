use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall outcome of one reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    /// Some chain queries failed; everything that could be checked was clean
    Partial,
    DiscrepanciesFound,
}

/// Outcome of the external check for one crypto asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetStatus {
    Ok,
    /// Variance within threshold but some address queries failed
    Warning,
    /// Variance above threshold
    Alert,
    /// No chain balance could be obtained
    Error,
}

/// Wallet balance disagreeing with the sum of its journal entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub account_id: String,
    pub currency: String,
    pub wallet_balance: Decimal,
    pub ledger_balance: Decimal,
    /// wallet - ledger
    pub difference: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencySummary {
    pub currency: String,
    pub total_balance: Decimal,
    pub accounts_with_balance: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCheck {
    pub currency: String,
    pub ledger_total: Decimal,
    pub chain_total: Option<Decimal>,
    /// |chain - ledger| / ledger
    pub variance: Option<Decimal>,
    pub addresses_checked: usize,
    pub addresses_failed: usize,
    pub status: AssetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub wallets_checked: usize,
    /// Total found; `discrepancies` may be truncated
    pub discrepancy_count: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub summary: Vec<CurrencySummary>,
    pub external: Vec<ExternalCheck>,
    pub duration_ms: u64,
}

impl ReconciliationReport {
    /// Chain balance per currency, for assets whose chain query produced a total.
    pub fn chain_totals(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.external
            .iter()
            .filter_map(|c| c.chain_total.map(|t| (c.currency.as_str(), t)))
    }
}

/// Discrepancies first, then partial, else ok.
pub fn overall_status(discrepancy_count: usize, external: &[ExternalCheck]) -> ReportStatus {
    if discrepancy_count > 0 || external.iter().any(|c| c.status == AssetStatus::Alert) {
        ReportStatus::DiscrepanciesFound
    } else if external
        .iter()
        .any(|c| matches!(c.status, AssetStatus::Error | AssetStatus::Warning))
    {
        ReportStatus::Partial
    } else {
        ReportStatus::Ok
    }
}
