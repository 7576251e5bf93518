//! Read seams for reconciliation and proof of reserves

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::report::ReconciliationReport;
use crate::deposit::DepositAddress;
use crate::error::LedgerError;
use crate::proof::ProofOfReservesReport;
use crate::wallet::{Wallet, WalletKey};

/// Wallets, journal sums and deposit addresses read at one point in time
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub wallets: Vec<Wallet>,
    /// Sum of entry amounts per (account, currency)
    pub ledger_sums: BTreeMap<WalletKey, Decimal>,
    pub addresses: Vec<DepositAddress>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl LedgerSnapshot {
    pub fn addresses_for<'a>(&'a self, currency: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.addresses
            .iter()
            .filter(move |a| a.currency == currency)
            .map(|a| a.address.as_str())
    }
}

#[async_trait]
pub trait ReconciliationSource: Send + Sync {
    /// One consistent read; never blocks writers.
    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError>;
}

/// Append-only storage for generated reports
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save_reconciliation(&self, report: &ReconciliationReport) -> Result<(), LedgerError>;

    async fn latest_reconciliation(&self) -> Result<Option<ReconciliationReport>, LedgerError>;

    async fn save_proof_of_reserves(&self, report: &ProofOfReservesReport)
    -> Result<(), LedgerError>;

    async fn latest_proof_of_reserves(&self)
    -> Result<Option<ProofOfReservesReport>, LedgerError>;
}
