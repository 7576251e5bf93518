//! Shared application state
//!
//! Services are wired once at startup from a storage backend plus the
//! external collaborators and shared by every handler and background task.

use std::sync::Arc;
use std::time::Duration;

use crate::banking::BankingEventProcessor;
use crate::chain::ChainClients;
use crate::config::AppConfig;
use crate::db::Database;
use crate::deposit::{DepositCreditCoordinator, DepositStore};
use crate::money::CurrencyRegistry;
use crate::proof::ProofOfReservesBuilder;
use crate::reconciliation::{ReconciliationEngine, ReconciliationSource, ReportStore};
use crate::reservation::ReservationManager;
use crate::retry::RetryPolicy;
use crate::wallet::{AccountService, LedgerJournal, WalletService, WalletStore};
use crate::withdrawal::{
    SettlementClient, SettlementTimeouts, WithdrawalSettlementCoordinator, WithdrawalStore,
};

/// Every store trait the services need, usually backed by one object
#[derive(Clone)]
pub struct Stores {
    pub wallets: Arc<dyn WalletStore>,
    pub journal: Arc<dyn LedgerJournal>,
    pub accounts: Arc<dyn AccountService>,
    pub deposits: Arc<dyn DepositStore>,
    pub withdrawals: Arc<dyn WithdrawalStore>,
    pub snapshots: Arc<dyn ReconciliationSource>,
    pub reports: Arc<dyn ReportStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: WalletStore
            + LedgerJournal
            + AccountService
            + DepositStore
            + WithdrawalStore
            + ReconciliationSource
            + ReportStore
            + 'static,
    {
        Self {
            wallets: backend.clone(),
            journal: backend.clone(),
            accounts: backend.clone(),
            deposits: backend.clone(),
            withdrawals: backend.clone(),
            snapshots: backend.clone(),
            reports: backend,
        }
    }
}

pub struct AppState {
    pub currencies: Arc<CurrencyRegistry>,
    pub wallets: Arc<WalletService>,
    pub reservations: Arc<ReservationManager>,
    pub deposits: Arc<DepositCreditCoordinator>,
    pub withdrawals: Arc<WithdrawalSettlementCoordinator>,
    pub banking: Arc<BankingEventProcessor>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub proofs: Arc<ProofOfReservesBuilder>,
    /// Present when running on PostgreSQL
    pub db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        currencies: Arc<CurrencyRegistry>,
        stores: Stores,
        chains: ChainClients,
        settlement: Arc<dyn SettlementClient>,
        db: Option<Arc<Database>>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let chain_timeout = Duration::from_millis(config.reconciliation.chain_timeout_ms);

        let wallets = Arc::new(WalletService::new(
            stores.wallets.clone(),
            stores.journal.clone(),
            currencies.clone(),
        ));
        let reservations = Arc::new(ReservationManager::new(
            wallets.clone(),
            stores.accounts.clone(),
            config.fee_account.clone(),
        ));
        let deposits = Arc::new(DepositCreditCoordinator::new(
            stores.deposits.clone(),
            currencies.clone(),
            chains.clone(),
            retry,
            chain_timeout,
        ));
        let withdrawals = Arc::new(WithdrawalSettlementCoordinator::new(
            stores.withdrawals.clone(),
            reservations.clone(),
            currencies.clone(),
            settlement,
            SettlementTimeouts::from(&config.withdrawals),
            config.fee_account.clone(),
        )
        .with_retry(retry));
        let banking = Arc::new(BankingEventProcessor::new(
            deposits.clone(),
            withdrawals.clone(),
            currencies.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            stores.snapshots.clone(),
            stores.reports.clone(),
            currencies.clone(),
            chains,
            retry,
            config.reconciliation.clone(),
        ));
        let proofs = Arc::new(ProofOfReservesBuilder::new(
            stores.snapshots,
            stores.reports,
        ));

        Self {
            currencies,
            wallets,
            reservations,
            deposits,
            withdrawals,
            banking,
            reconciliation,
            proofs,
            db,
        }
    }

    pub fn storage_kind(&self) -> &'static str {
        if self.db.is_some() { "postgres" } else { "memory" }
    }
}
