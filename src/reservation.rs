//! Reservation Manager
//!
//! Holds funds for open orders and pending withdrawals, and settles trade
//! fills against reserved balances.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::wallet::{
    AccountService, AccountStatus, BalanceChange, EntryType, LedgerEntry, Reference, Wallet,
    WalletService,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    #[serde(default)]
    pub reference: Option<String>,
}

/// One matched trade between a buyer and a seller
///
/// The buyer pays `quote_amount` from reserved quote funds and receives
/// `base_amount`; the seller pays `base_amount` from reserved base funds
/// and receives `quote_amount`. Fees are charged in the currency received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub trade_id: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    #[serde(default)]
    pub buyer_fee: Decimal,
    #[serde(default)]
    pub seller_fee: Decimal,
}

pub struct ReservationManager {
    wallets: Arc<WalletService>,
    accounts: Arc<dyn AccountService>,
    fee_account: Option<String>,
}

impl ReservationManager {
    pub fn new(
        wallets: Arc<WalletService>,
        accounts: Arc<dyn AccountService>,
        fee_account: Option<String>,
    ) -> Self {
        Self {
            wallets,
            accounts,
            fee_account,
        }
    }

    /// Fails with AccountRestricted unless the account is active.
    pub async fn ensure_active(&self, account_id: &str) -> Result<(), LedgerError> {
        match self.accounts.account_status(account_id).await? {
            AccountStatus::Active => Ok(()),
            status => {
                warn!(account_id = %account_id, status = status.as_str(), "Reservation refused");
                Err(LedgerError::AccountRestricted(format!(
                    "{} is {}",
                    account_id,
                    status.as_str()
                )))
            }
        }
    }

    pub async fn reserve(&self, req: &ReservationRequest) -> Result<Wallet, LedgerError> {
        self.ensure_active(&req.account_id).await?;
        let wallet = self
            .wallets
            .reserve(&req.account_id, &req.currency, req.amount)
            .await?;
        info!(
            account_id = %req.account_id,
            currency = %req.currency,
            amount = %req.amount,
            reference = req.reference.as_deref().unwrap_or(""),
            "Funds reserved"
        );
        Ok(wallet)
    }

    pub async fn release(&self, req: &ReservationRequest) -> Result<Wallet, LedgerError> {
        let wallet = self
            .wallets
            .release(&req.account_id, &req.currency, req.amount)
            .await?;
        info!(
            account_id = %req.account_id,
            currency = %req.currency,
            amount = %req.amount,
            reference = req.reference.as_deref().unwrap_or(""),
            "Funds released"
        );
        Ok(wallet)
    }

    /// Settle a fill in one transaction; one journal entry per balance change.
    pub async fn settle_fill(&self, fill: &TradeFill) -> Result<Vec<LedgerEntry>, LedgerError> {
        let changes = self.fill_changes(fill)?;
        let entries = self.wallets.apply_batch(changes).await?;
        info!(
            trade_id = %fill.trade_id,
            buyer = %fill.buyer_id,
            seller = %fill.seller_id,
            entries = entries.len(),
            "Trade settled"
        );
        Ok(entries)
    }

    fn fill_changes(&self, fill: &TradeFill) -> Result<Vec<BalanceChange>, LedgerError> {
        if fill.buyer_id == fill.seller_id {
            return Err(LedgerError::Validation("buyer and seller are the same account".into()));
        }
        if fill.base_currency == fill.quote_currency {
            return Err(LedgerError::Validation("base and quote currency must differ".into()));
        }
        if fill.base_amount <= Decimal::ZERO || fill.quote_amount <= Decimal::ZERO {
            return Err(LedgerError::Validation("fill amounts must be positive".into()));
        }
        if fill.buyer_fee.is_sign_negative() || fill.seller_fee.is_sign_negative() {
            return Err(LedgerError::Validation("fees must not be negative".into()));
        }
        if fill.buyer_fee > fill.base_amount || fill.seller_fee > fill.quote_amount {
            return Err(LedgerError::Validation("fee exceeds amount received".into()));
        }

        let reference = Some(Reference::new("trade", fill.trade_id.clone()));
        let trade = |change: BalanceChange| {
            change
                .with_reference(reference.clone())
                .with_description(format!("trade {}", fill.trade_id))
        };

        let mut changes = vec![
            trade(BalanceChange::consume_reserved(
                &fill.buyer_id,
                &fill.quote_currency,
                fill.quote_amount,
                EntryType::Trade,
            )),
            trade(BalanceChange::credit(
                &fill.buyer_id,
                &fill.base_currency,
                fill.base_amount,
                EntryType::Trade,
            )),
            trade(BalanceChange::consume_reserved(
                &fill.seller_id,
                &fill.base_currency,
                fill.base_amount,
                EntryType::Trade,
            )),
            trade(BalanceChange::credit(
                &fill.seller_id,
                &fill.quote_currency,
                fill.quote_amount,
                EntryType::Trade,
            )),
        ];

        for (payer, currency, fee) in [
            (&fill.buyer_id, &fill.base_currency, fill.buyer_fee),
            (&fill.seller_id, &fill.quote_currency, fill.seller_fee),
        ] {
            if fee.is_zero() {
                continue;
            }
            let fee_account = self.fee_account.as_deref().ok_or_else(|| {
                LedgerError::Validation("fees charged but no fee account configured".into())
            })?;
            changes.push(trade(BalanceChange::credit(payer, currency, -fee, EntryType::Fee)));
            changes.push(trade(BalanceChange::credit(
                fee_account,
                currency,
                fee,
                EntryType::Fee,
            )));
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{AssetKind, CurrencyRegistry, CurrencySpec};
    use crate::storage::memory::MemoryStore;
    use crate::wallet::{BalanceUpdate, WalletStore};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        wallets: Arc<WalletService>,
        manager: ReservationManager,
    }

    async fn harness(fee_account: Option<&str>) -> Harness {
        let currencies = Arc::new(CurrencyRegistry::new([
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
        ]));
        let store = Arc::new(MemoryStore::new());
        let wallets = Arc::new(WalletService::new(store.clone(), store.clone(), currencies));
        for account in ["alice", "bob", "fees"] {
            wallets.open_account(account).await.unwrap();
        }
        for (account, currency, amount) in [("alice", "USD", "1000"), ("bob", "BTC", "1")] {
            wallets
                .update_balance(BalanceUpdate {
                    account_id: account.into(),
                    currency: currency.into(),
                    amount: d(amount),
                    entry_type: EntryType::Deposit,
                    reference: None,
                    description: None,
                })
                .await
                .unwrap();
        }
        let manager =
            ReservationManager::new(wallets.clone(), store.clone(), fee_account.map(String::from));
        Harness {
            store,
            wallets,
            manager,
        }
    }

    fn request(account: &str, currency: &str, amount: &str) -> ReservationRequest {
        ReservationRequest {
            account_id: account.into(),
            currency: currency.into(),
            amount: d(amount),
            reference: Some("order-1".into()),
        }
    }

    fn fill(buyer_fee: &str, seller_fee: &str) -> TradeFill {
        TradeFill {
            trade_id: "t-42".into(),
            base_currency: "BTC".into(),
            quote_currency: "USD".into(),
            buyer_id: "alice".into(),
            seller_id: "bob".into(),
            base_amount: d("0.5"),
            quote_amount: d("500"),
            buyer_fee: d(buyer_fee),
            seller_fee: d(seller_fee),
        }
    }

    async fn balances(h: &Harness, account: &str, currency: &str) -> (Decimal, Decimal, Decimal) {
        let w = h.wallets.get_wallet(account, currency).await.unwrap();
        (w.balance(), w.available_balance(), w.reserved_balance())
    }

    #[tokio::test]
    async fn test_settle_fill_moves_funds_and_fees() {
        let h = harness(Some("fees")).await;
        h.manager.reserve(&request("alice", "USD", "500")).await.unwrap();
        h.manager.reserve(&request("bob", "BTC", "1")).await.unwrap();

        let entries = h.manager.settle_fill(&fill("0.001", "1")).await.unwrap();
        assert_eq!(entries.len(), 8);
        assert!(entries.iter().all(|e| e.reference_id.as_deref() == Some("t-42")));

        assert_eq!(balances(&h, "alice", "USD").await, (d("500"), d("500"), d("0")));
        assert_eq!(balances(&h, "alice", "BTC").await, (d("0.499"), d("0.499"), d("0")));
        assert_eq!(balances(&h, "bob", "BTC").await, (d("0.5"), d("0"), d("0.5")));
        assert_eq!(balances(&h, "bob", "USD").await, (d("499"), d("499"), d("0")));
        assert_eq!(balances(&h, "fees", "BTC").await.0, d("0.001"));
        assert_eq!(balances(&h, "fees", "USD").await.0, d("1"));
    }

    #[tokio::test]
    async fn test_fill_beyond_reserved_changes_nothing() {
        let h = harness(Some("fees")).await;
        h.manager.reserve(&request("alice", "USD", "100")).await.unwrap();
        h.manager.reserve(&request("bob", "BTC", "1")).await.unwrap();

        let err = h.manager.settle_fill(&fill("0", "0")).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientReserved { .. }));
        assert_eq!(balances(&h, "alice", "USD").await, (d("1000"), d("900"), d("100")));
        assert_eq!(balances(&h, "bob", "BTC").await, (d("1"), d("0"), d("1")));
        assert_eq!(balances(&h, "alice", "BTC").await.0, d("0"));
    }

    #[tokio::test]
    async fn test_fill_validation() {
        let h = harness(None).await;
        let mut same = fill("0", "0");
        same.seller_id = "alice".into();
        assert!(matches!(
            h.manager.settle_fill(&same).await,
            Err(LedgerError::Validation(_))
        ));

        // Fees need somewhere to go
        let err = h.manager.settle_fill(&fill("0.001", "0")).await.unwrap_err();
        assert!(err.to_string().contains("fee account"));

        let err = h.manager.settle_fill(&fill("0.6", "0")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_restricted_account_cannot_reserve() {
        let h = harness(None).await;
        h.manager.reserve(&request("alice", "USD", "40")).await.unwrap();
        h.store
            .set_account_status("alice", AccountStatus::Restricted)
            .await
            .unwrap();

        let err = h.manager.reserve(&request("alice", "USD", "10")).await.unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_RESTRICTED");

        // Existing holds can still be released
        h.manager.release(&request("alice", "USD", "40")).await.unwrap();
        assert_eq!(balances(&h, "alice", "USD").await, (d("1000"), d("1000"), d("0")));
    }

    #[tokio::test]
    async fn test_unknown_account_rejected() {
        let h = harness(None).await;
        let err = h.manager.reserve(&request("mallory", "USD", "1")).await.unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_NOT_FOUND");
    }
}
