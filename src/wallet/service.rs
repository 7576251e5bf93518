use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use super::models::{AccountStatus, BalanceChange, EntryType, LedgerEntry, Reference, Wallet};
use super::store::{EntryFilter, EntryPage, LedgerJournal, Page, WalletStore};
use crate::error::LedgerError;
use crate::money::CurrencyRegistry;

/// Request for a direct journaled balance change
#[derive(Debug, Clone)]
pub struct BalanceUpdate {
    pub account_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub entry_type: EntryType,
    pub reference: Option<Reference>,
    pub description: Option<String>,
}

/// Validating front of [`WalletStore`] and [`LedgerJournal`]
///
/// Inputs are checked against the currency registry before any
/// transaction is opened.
pub struct WalletService {
    store: Arc<dyn WalletStore>,
    journal: Arc<dyn LedgerJournal>,
    currencies: Arc<CurrencyRegistry>,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn WalletStore>,
        journal: Arc<dyn LedgerJournal>,
        currencies: Arc<CurrencyRegistry>,
    ) -> Self {
        Self {
            store,
            journal,
            currencies,
        }
    }

    pub fn currencies(&self) -> &CurrencyRegistry {
        &self.currencies
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    pub async fn open_account(&self, account_id: &str) -> Result<Vec<Wallet>, LedgerError> {
        validate_account_id(account_id)?;
        self.store
            .open_account(account_id, &self.currencies.codes())
            .await?;
        info!(account_id = %account_id, "Account opened");
        self.store.list_wallets(account_id).await
    }

    pub async fn set_account_status(
        &self,
        account_id: &str,
        status: AccountStatus,
    ) -> Result<(), LedgerError> {
        self.store.set_account_status(account_id, status).await?;
        info!(account_id = %account_id, status = status.as_str(), "Account status changed");
        Ok(())
    }

    pub async fn get_wallet(&self, account_id: &str, currency: &str) -> Result<Wallet, LedgerError> {
        self.store.get_wallet(account_id, currency).await
    }

    pub async fn list_wallets(&self, account_id: &str) -> Result<Vec<Wallet>, LedgerError> {
        self.store.list_wallets(account_id).await
    }

    pub async fn reserve(
        &self,
        account_id: &str,
        currency: &str,
        amount: Decimal,
    ) -> Result<Wallet, LedgerError> {
        self.currencies.validate_positive(currency, amount)?;
        self.store.reserve(account_id, currency, amount).await
    }

    pub async fn release(
        &self,
        account_id: &str,
        currency: &str,
        amount: Decimal,
    ) -> Result<Wallet, LedgerError> {
        self.currencies.validate_positive(currency, amount)?;
        self.store.release(account_id, currency, amount).await
    }

    /// Signed credit to balance and available, with one journal entry.
    pub async fn update_balance(&self, update: BalanceUpdate) -> Result<LedgerEntry, LedgerError> {
        self.currencies
            .validate_signed(&update.currency, update.amount)?;
        if !update.entry_type.changes_balance() {
            return Err(LedgerError::Validation(format!(
                "{} is not a balance-changing entry type",
                update.entry_type
            )));
        }
        let change = BalanceChange::credit(
            &update.account_id,
            &update.currency,
            update.amount,
            update.entry_type,
        )
        .with_reference(update.reference)
        .with_description(update.description.unwrap_or_default());

        let entry = self.store.credit(change).await?;
        debug!(
            account_id = %entry.account_id,
            currency = %entry.currency,
            amount = %entry.amount,
            balance_after = %entry.balance_after,
            entry_type = %entry.entry_type,
            "Balance updated"
        );
        Ok(entry)
    }

    /// Validate every change, then apply them in one transaction.
    pub async fn apply_batch(
        &self,
        changes: Vec<BalanceChange>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        for change in &changes {
            self.currencies.validate_precision(&change.currency, change.amount)?;
            if change.amount.is_zero() {
                return Err(LedgerError::Validation(format!(
                    "zero amount change for {}",
                    change.key()
                )));
            }
        }
        self.store.apply_batch(changes).await
    }

    pub async fn list_entries(
        &self,
        account_id: &str,
        filter: &EntryFilter,
        page: Page,
    ) -> Result<EntryPage, LedgerError> {
        if let Some(currency) = &filter.currency {
            self.currencies.get(currency)?;
        }
        self.journal.list_entries(account_id, filter, page).await
    }
}

fn validate_account_id(account_id: &str) -> Result<(), LedgerError> {
    if account_id.trim().is_empty() || account_id.len() > 128 {
        return Err(LedgerError::Validation(
            "account_id must be 1-128 characters".into(),
        ));
    }
    Ok(())
}
