//! Withdrawal worker
//!
//! Broadcasts approved withdrawals, then polls processing ones until the
//! settlement collaborator reports a final result.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::coordinator::WithdrawalSettlementCoordinator;
use super::state::WithdrawalStatus;
use crate::config::WithdrawalConfig;
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTick {
    pub broadcast: usize,
    pub settled: usize,
    pub errors: usize,
}

pub struct WithdrawalWorker {
    coordinator: Arc<WithdrawalSettlementCoordinator>,
    interval: Duration,
    batch_size: usize,
}

impl WithdrawalWorker {
    pub fn new(config: &WithdrawalConfig, coordinator: Arc<WithdrawalSettlementCoordinator>) -> Self {
        Self {
            coordinator,
            interval: Duration::from_secs(config.worker_interval_secs.max(1)),
            batch_size: config.batch_size,
        }
    }

    pub async fn tick(&self) -> Result<WorkerTick, LedgerError> {
        let mut tick = WorkerTick::default();

        let approved = self
            .coordinator
            .list(WithdrawalStatus::Approved, self.batch_size)
            .await?;
        for w in approved {
            match self.coordinator.process(w.id).await {
                Ok(_) => tick.broadcast += 1,
                // Lost the CAS to another worker
                Err(LedgerError::InvalidStateTransition(_)) => {}
                Err(e) => {
                    tick.errors += 1;
                    error!(withdrawal_id = %w.id, error = %e, "Failed to process withdrawal");
                }
            }
        }

        let processing = self
            .coordinator
            .list(WithdrawalStatus::Processing, self.batch_size)
            .await?;
        for w in processing {
            match self.coordinator.check_settlement(w.id).await {
                Ok(updated) if updated.status.is_terminal() => tick.settled += 1,
                Ok(_) => {}
                Err(LedgerError::InvalidStateTransition(_)) => {}
                Err(e) => {
                    tick.errors += 1;
                    error!(withdrawal_id = %w.id, error = %e, "Failed to check withdrawal settlement");
                }
            }
        }

        if tick != WorkerTick::default() {
            debug!(?tick, "Withdrawal worker tick");
        }
        Ok(tick)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting withdrawal worker");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "Withdrawal worker tick failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Withdrawal worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{AssetKind, CurrencyRegistry, CurrencySpec};
    use crate::reservation::ReservationManager;
    use crate::storage::memory::MemoryStore;
    use crate::wallet::{BalanceChange, EntryType, WalletService, WalletStore};
    use crate::withdrawal::coordinator::SettlementTimeouts;
    use crate::withdrawal::models::NewWithdrawal;
    use crate::withdrawal::settlement::mock::MockSettlementClient;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_tick_broadcasts_and_settles() {
        let currencies = Arc::new(CurrencyRegistry::new([CurrencySpec {
            code: "USD".into(),
            decimals: 2,
            kind: AssetKind::Fiat,
            required_confirmations: 0,
        }]));
        let store = Arc::new(MemoryStore::new());
        store.open_account("carol", &currencies.codes()).await.unwrap();
        store
            .credit(BalanceChange::credit("carol", "USD", Decimal::new(500, 0), EntryType::Deposit))
            .await
            .unwrap();
        let wallets = Arc::new(WalletService::new(store.clone(), store.clone(), currencies.clone()));
        let coordinator = Arc::new(WithdrawalSettlementCoordinator::new(
            store.clone(),
            Arc::new(ReservationManager::new(wallets, store.clone(), None)),
            currencies,
            Arc::new(MockSettlementClient::auto_confirming()),
            SettlementTimeouts::default(),
            None,
        ));
        let w = coordinator
            .request(NewWithdrawal {
                account_id: "carol".into(),
                currency: "USD".into(),
                amount: Decimal::new(200, 0),
                fee: Decimal::ZERO,
                destination: "IBAN DE00".into(),
            })
            .await
            .unwrap();
        coordinator.approve(w.id).await.unwrap();

        let worker = WithdrawalWorker::new(&WithdrawalConfig::default(), coordinator.clone());
        let tick = worker.tick().await.unwrap();
        assert_eq!(tick.broadcast, 1);
        assert_eq!(tick.settled, 1);
        assert_eq!(tick.errors, 0);

        let done = coordinator.get(w.id).await.unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);
        let wallet = store.get_wallet("carol", "USD").await.unwrap();
        assert_eq!(wallet.balance(), Decimal::new(300, 0));
        assert_eq!(wallet.reserved_balance(), Decimal::ZERO);

        // Nothing left to do
        assert_eq!(worker.tick().await.unwrap(), WorkerTick::default());
    }
}
