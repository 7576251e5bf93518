//! Reconciliation Engine
//!
//! Internal check: every wallet balance against the sum of its journal.
//! External check: per crypto asset, total user balance against the chain
//! balance of all known deposit addresses. Findings are reported, never
//! corrected.

use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::report::{
    AssetStatus, CurrencySummary, Discrepancy, ExternalCheck, ReconciliationReport,
    overall_status,
};
use super::source::{LedgerSnapshot, ReconciliationSource, ReportStore};
use crate::chain::{ChainClients, ChainError};
use crate::config::ReconciliationConfig;
use crate::error::LedgerError;
use crate::money::{CurrencyRegistry, CurrencySpec};
use crate::retry::RetryPolicy;

pub struct ReconciliationEngine {
    source: Arc<dyn ReconciliationSource>,
    reports: Arc<dyn ReportStore>,
    currencies: Arc<CurrencyRegistry>,
    chains: ChainClients,
    retry: RetryPolicy,
    config: ReconciliationConfig,
}

impl ReconciliationEngine {
    pub fn new(
        source: Arc<dyn ReconciliationSource>,
        reports: Arc<dyn ReportStore>,
        currencies: Arc<CurrencyRegistry>,
        chains: ChainClients,
        retry: RetryPolicy,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            source,
            reports,
            currencies,
            chains,
            retry,
            config,
        }
    }

    /// Run both checks against one snapshot and store the report.
    pub async fn run(&self) -> Result<ReconciliationReport, LedgerError> {
        let started = Instant::now();
        let snapshot = self.source.snapshot().await?;

        let discrepancies = self.internal_check(&snapshot);
        let summary = summarize(&snapshot);
        let external = self.external_check(&snapshot).await;

        let discrepancy_count = discrepancies.len();
        for d in discrepancies.iter().take(10) {
            warn!(
                account_id = %d.account_id,
                currency = %d.currency,
                wallet_balance = %d.wallet_balance,
                ledger_balance = %d.ledger_balance,
                difference = %d.difference,
                "Ledger discrepancy"
            );
        }

        let report = ReconciliationReport {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            status: overall_status(discrepancy_count, &external),
            wallets_checked: snapshot.wallets.len(),
            discrepancy_count,
            discrepancies: discrepancies
                .into_iter()
                .take(self.config.max_reported_discrepancies)
                .collect(),
            summary,
            external,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.reports.save_reconciliation(&report).await?;

        info!(
            report_id = %report.id,
            status = ?report.status,
            wallets = report.wallets_checked,
            discrepancies = report.discrepancy_count,
            duration_ms = report.duration_ms,
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Stored report, or a fresh run when none exists yet.
    pub async fn latest_or_run(&self) -> Result<ReconciliationReport, LedgerError> {
        match self.reports.latest_reconciliation().await? {
            Some(report) => Ok(report),
            None => self.run().await,
        }
    }

    fn internal_check(&self, snapshot: &LedgerSnapshot) -> Vec<Discrepancy> {
        let mut unmatched = snapshot.ledger_sums.clone();
        let mut found = Vec::new();

        for wallet in &snapshot.wallets {
            let ledger = unmatched.remove(&wallet.key()).unwrap_or_default();
            let difference = wallet.balance() - ledger;
            if difference.abs() > self.currencies.tolerance(wallet.currency()) {
                found.push(Discrepancy {
                    account_id: wallet.account_id().to_string(),
                    currency: wallet.currency().to_string(),
                    wallet_balance: wallet.balance(),
                    ledger_balance: ledger,
                    difference,
                });
            }
        }

        // Journal entries with no wallet row
        for (key, ledger) in unmatched {
            if ledger.abs() > self.currencies.tolerance(&key.currency) {
                found.push(Discrepancy {
                    account_id: key.account_id,
                    currency: key.currency,
                    wallet_balance: Decimal::ZERO,
                    ledger_balance: ledger,
                    difference: -ledger,
                });
            }
        }
        found
    }

    async fn external_check(&self, snapshot: &LedgerSnapshot) -> Vec<ExternalCheck> {
        let mut totals: BTreeMap<&str, Decimal> = BTreeMap::new();
        for wallet in &snapshot.wallets {
            *totals.entry(wallet.currency()).or_default() += wallet.balance();
        }

        let mut checks = Vec::new();
        for spec in self.currencies.crypto() {
            let ledger_total = totals.get(spec.code.as_str()).copied().unwrap_or_default();
            let addresses: Vec<String> = snapshot
                .addresses_for(&spec.code)
                .map(str::to_string)
                .collect();
            checks.push(self.check_asset(spec, ledger_total, addresses).await);
        }
        checks
    }

    async fn check_asset(
        &self,
        spec: &CurrencySpec,
        ledger_total: Decimal,
        addresses: Vec<String>,
    ) -> ExternalCheck {
        let mut check = ExternalCheck {
            currency: spec.code.clone(),
            ledger_total,
            chain_total: None,
            variance: None,
            addresses_checked: addresses.len(),
            addresses_failed: 0,
            status: AssetStatus::Error,
            message: None,
        };
        let Some(client) = self.chains.get(&spec.code) else {
            check.message = Some("no chain client configured".into());
            return check;
        };

        let timeout = Duration::from_millis(self.config.chain_timeout_ms);
        let retry = &self.retry;
        let results: Vec<Result<Decimal, ChainError>> = stream::iter(addresses)
            .map(|address| async move {
                let address = address.as_str();
                retry
                    .run("get_address_balance", move || async move {
                        tokio::time::timeout(timeout, client.get_address_balance(address))
                            .await
                            .unwrap_or(Err(ChainError::Timeout))
                    })
                    .await
            })
            .buffer_unordered(self.config.address_concurrency.max(1))
            .collect()
            .await;

        let mut chain_total = Decimal::ZERO;
        let mut last_error = None;
        for result in results {
            match result {
                Ok(balance) => chain_total += balance,
                Err(e) => {
                    check.addresses_failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if check.addresses_checked > 0 && check.addresses_failed == check.addresses_checked {
            error!(
                currency = %spec.code,
                addresses = check.addresses_checked,
                "Chain balance unavailable for every address"
            );
            check.message = last_error.map(|e| e.to_string());
            return check;
        }

        let variance = variance(ledger_total, chain_total);
        check.chain_total = Some(chain_total);
        check.variance = Some(variance);
        check.status = if variance > self.config.variance_threshold {
            warn!(
                currency = %spec.code,
                ledger_total = %ledger_total,
                chain_total = %chain_total,
                variance = %variance,
                "Chain balance variance above threshold"
            );
            AssetStatus::Alert
        } else if check.addresses_failed > 0 {
            check.message = last_error.map(|e| e.to_string());
            AssetStatus::Warning
        } else {
            AssetStatus::Ok
        };
        check
    }
}

/// |chain - ledger| / ledger; a zero ledger is fully off unless the chain is zero too.
fn variance(ledger: Decimal, chain: Decimal) -> Decimal {
    if ledger.is_zero() {
        if chain.is_zero() { Decimal::ZERO } else { Decimal::ONE }
    } else {
        ((chain - ledger).abs() / ledger.abs()).round_dp(8)
    }
}

fn summarize(snapshot: &LedgerSnapshot) -> Vec<CurrencySummary> {
    let mut by_currency: BTreeMap<&str, (Decimal, usize)> = BTreeMap::new();
    for wallet in &snapshot.wallets {
        let slot = by_currency.entry(wallet.currency()).or_default();
        slot.0 += wallet.balance();
        if wallet.balance() > Decimal::ZERO {
            slot.1 += 1;
        }
    }
    by_currency
        .into_iter()
        .map(|(currency, (total_balance, accounts_with_balance))| CurrencySummary {
            currency: currency.to_string(),
            total_balance,
            accounts_with_balance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChainClient;
    use crate::deposit::{DepositAddress, DepositStore};
    use crate::money::AssetKind;
    use crate::reconciliation::ReportStatus;
    use crate::storage::memory::MemoryStore;
    use crate::wallet::{BalanceChange, EntryType, WalletStore};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn registry() -> Arc<CurrencyRegistry> {
        Arc::new(CurrencyRegistry::new([
            CurrencySpec {
                code: "BTC".into(),
                decimals: 8,
                kind: AssetKind::Crypto,
                required_confirmations: 6,
            },
            CurrencySpec {
                code: "USD".into(),
                decimals: 2,
                kind: AssetKind::Fiat,
                required_confirmations: 0,
            },
        ]))
    }

    async fn setup(chain: Option<Arc<MockChainClient>>) -> (Arc<MemoryStore>, ReconciliationEngine) {
        let currencies = registry();
        let store = Arc::new(MemoryStore::new());
        for account in ["alice", "bob"] {
            store.open_account(account, &currencies.codes()).await.unwrap();
        }
        store
            .credit(BalanceChange::credit("alice", "BTC", d("2"), EntryType::Deposit))
            .await
            .unwrap();
        store
            .credit(BalanceChange::credit("bob", "BTC", d("1"), EntryType::Deposit))
            .await
            .unwrap();
        store
            .credit(BalanceChange::credit("alice", "USD", d("100"), EntryType::Deposit))
            .await
            .unwrap();
        for (account, address) in [("alice", "bc1alice"), ("bob", "bc1bob")] {
            store
                .register_address(DepositAddress {
                    account_id: account.into(),
                    currency: "BTC".into(),
                    address: address.into(),
                })
                .await
                .unwrap();
        }

        let mut chains = ChainClients::new();
        if let Some(chain) = chain {
            chains.insert("BTC", chain);
        }
        let engine = ReconciliationEngine::new(
            store.clone(),
            store.clone(),
            currencies,
            chains,
            RetryPolicy::none(),
            ReconciliationConfig::default(),
        );
        (store, engine)
    }

    fn backed_chain() -> Arc<MockChainClient> {
        let chain = Arc::new(MockChainClient::new());
        chain.set_balance("bc1alice", d("2"));
        chain.set_balance("bc1bob", d("1"));
        chain
    }

    #[tokio::test]
    async fn test_clean_ledger_reports_ok() {
        let (_store, engine) = setup(Some(backed_chain())).await;
        let report = engine.run().await.unwrap();
        assert_eq!(report.status, ReportStatus::Ok);
        assert_eq!(report.discrepancy_count, 0);
        assert_eq!(report.wallets_checked, 4);

        // Fiat is excluded from external checks
        assert_eq!(report.external.len(), 1);
        let btc = &report.external[0];
        assert_eq!(btc.status, AssetStatus::Ok);
        assert_eq!(btc.chain_total, Some(d("3")));

        let usd = report.summary.iter().find(|s| s.currency == "USD").unwrap();
        assert_eq!(usd.total_balance, d("100"));
        assert_eq!(usd.accounts_with_balance, 1);
        let btc = report.summary.iter().find(|s| s.currency == "BTC").unwrap();
        assert_eq!(btc.accounts_with_balance, 2);
    }

    #[tokio::test]
    async fn test_wallet_drift_is_one_discrepancy() {
        let (store, engine) = setup(Some(backed_chain())).await;
        // Wallet says 105, journal says 100
        store.corrupt_balance("alice", "USD", d("5")).await;

        let report = engine.run().await.unwrap();
        assert_eq!(report.status, ReportStatus::DiscrepanciesFound);
        assert_eq!(report.discrepancy_count, 1);
        let found = &report.discrepancies[0];
        assert_eq!(found.account_id, "alice");
        assert_eq!(found.currency, "USD");
        assert_eq!(found.wallet_balance, d("105"));
        assert_eq!(found.ledger_balance, d("100"));
        assert_eq!(found.difference, d("5"));

        // Reported, not corrected
        let wallet = store.get_wallet("alice", "USD").await.unwrap();
        assert_eq!(wallet.balance(), d("105"));
    }

    #[tokio::test]
    async fn test_drift_below_smallest_unit_ignored() {
        let (store, engine) = setup(Some(backed_chain())).await;
        store.corrupt_balance("alice", "USD", d("0.001")).await;
        let report = engine.run().await.unwrap();
        assert_eq!(report.discrepancy_count, 0);
    }

    #[tokio::test]
    async fn test_chain_shortfall_alerts() {
        let chain = backed_chain();
        chain.set_balance("bc1bob", d("0.5"));
        let (_store, engine) = setup(Some(chain)).await;
        let report = engine.run().await.unwrap();
        let btc = &report.external[0];
        assert_eq!(btc.status, AssetStatus::Alert);
        assert_eq!(btc.chain_total, Some(d("2.5")));
        assert_eq!(report.status, ReportStatus::DiscrepanciesFound);
    }

    #[tokio::test]
    async fn test_partial_chain_failure_warns() {
        let chain = backed_chain();
        // Remaining address still within 50% threshold
        chain.fail_address("bc1bob");
        let (_store, mut engine) = setup(Some(chain)).await;
        engine.config.variance_threshold = d("0.5");
        let report = engine.run().await.unwrap();
        let btc = &report.external[0];
        assert_eq!(btc.addresses_failed, 1);
        assert_eq!(btc.status, AssetStatus::Warning);
        assert_eq!(report.status, ReportStatus::Partial);
    }

    #[tokio::test]
    async fn test_missing_chain_is_partial_not_fatal() {
        let (_store, engine) = setup(None).await;
        let report = engine.run().await.unwrap();
        assert_eq!(report.external[0].status, AssetStatus::Error);
        assert_eq!(report.status, ReportStatus::Partial);
        // Internal check still ran
        assert_eq!(report.wallets_checked, 4);
    }

    #[tokio::test]
    async fn test_latest_or_run() {
        let (_store, engine) = setup(Some(backed_chain())).await;
        let first = engine.latest_or_run().await.unwrap();
        let again = engine.latest_or_run().await.unwrap();
        assert_eq!(first.id, again.id);
        let fresh = engine.run().await.unwrap();
        assert_eq!(engine.latest_or_run().await.unwrap().id, fresh.id);
    }

    #[test]
    fn test_variance() {
        assert_eq!(variance(d("100"), d("99")), d("0.01"));
        assert_eq!(variance(d("100"), d("101")), d("0.01"));
        assert_eq!(variance(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
        assert_eq!(variance(Decimal::ZERO, d("1")), Decimal::ONE);
    }
}
