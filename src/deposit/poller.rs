//! Deposit Poller
//!
//! One long-lived task per asset class. Each tick checks the class's
//! non-terminal deposits; shutdown is observed between ticks only.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use super::coordinator::DepositCreditCoordinator;
use crate::config::DepositPollerConfig;

pub struct DepositPoller {
    name: String,
    currencies: Vec<String>,
    interval: Duration,
    batch_size: usize,
    coordinator: Arc<DepositCreditCoordinator>,
}

impl DepositPoller {
    pub fn new(config: &DepositPollerConfig, coordinator: Arc<DepositCreditCoordinator>) -> Self {
        Self {
            name: config.name.clone(),
            currencies: config.currencies.clone(),
            interval: config.interval(),
            batch_size: config.batch_size,
            coordinator,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poller = %self.name,
            currencies = ?self.currencies,
            interval_secs = self.interval.as_secs(),
            "Starting deposit poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self
                .coordinator
                .poll_once(&self.currencies, self.batch_size)
                .await
            {
                error!(poller = %self.name, error = %e, "Deposit poll failed");
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

        info!(poller = %self.name, "Deposit poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClients;
    use crate::chain::mock::MockChainClient;
    use crate::deposit::NewDeposit;
    use crate::money::{AssetKind, CurrencyRegistry, CurrencySpec};
    use crate::retry::RetryPolicy;
    use crate::storage::memory::MemoryStore;
    use crate::wallet::WalletStore;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_poller_credits_and_stops_on_shutdown() {
        let currencies = Arc::new(CurrencyRegistry::new([CurrencySpec {
            code: "ETH".into(),
            decimals: 18,
            kind: AssetKind::Crypto,
            required_confirmations: 12,
        }]));
        let store = Arc::new(MemoryStore::new());
        store.open_account("bob", &currencies.codes()).await.unwrap();
        let chain = Arc::new(MockChainClient::new());
        chain.set_confirmations("0xabc", 12);
        let coordinator = Arc::new(DepositCreditCoordinator::new(
            store.clone(),
            currencies,
            ChainClients::new().with("ETH", chain),
            RetryPolicy::none(),
            Duration::from_secs(1),
        ));
        coordinator
            .record_deposit(NewDeposit {
                account_id: "bob".into(),
                currency: "ETH".into(),
                amount: Decimal::new(3, 0),
                address: "0xbob".into(),
                txid: "0xabc".into(),
                confirmations: 0,
            })
            .await
            .unwrap();

        let poller = DepositPoller::new(
            &DepositPollerConfig {
                name: "evm".into(),
                currencies: vec!["ETH".into()],
                interval_secs: 3600,
                batch_size: 10,
            },
            coordinator,
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));

        // First tick runs immediately
        for _ in 0..50 {
            if store.get_wallet("bob", "ETH").await.unwrap().balance() == Decimal::new(3, 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            store.get_wallet("bob", "ETH").await.unwrap().balance(),
            Decimal::new(3, 0)
        );

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
