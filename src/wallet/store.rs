//! Storage seams for wallets and the journal
//!
//! Every mutating method is one atomic transaction in the backing store:
//! the wallet row is locked before it is read, and a failure anywhere rolls
//! back every wallet and journal write made by the call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::models::{AccountStatus, BalanceChange, EntryType, LedgerEntry, Wallet};
use crate::error::LedgerError;

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Create the account and a zero wallet per currency. Idempotent.
    async fn open_account(&self, account_id: &str, currencies: &[String])
    -> Result<(), LedgerError>;

    async fn set_account_status(
        &self,
        account_id: &str,
        status: AccountStatus,
    ) -> Result<(), LedgerError>;

    async fn get_wallet(&self, account_id: &str, currency: &str) -> Result<Wallet, LedgerError>;

    /// All wallets of an account, ordered by currency. Unknown accounts yield NotFound.
    async fn list_wallets(&self, account_id: &str) -> Result<Vec<Wallet>, LedgerError>;

    async fn reserve(
        &self,
        account_id: &str,
        currency: &str,
        amount: Decimal,
    ) -> Result<Wallet, LedgerError>;

    async fn release(
        &self,
        account_id: &str,
        currency: &str,
        amount: Decimal,
    ) -> Result<Wallet, LedgerError>;

    /// Apply one journaled change. Returns the appended entry.
    async fn credit(&self, change: BalanceChange) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.apply_batch(vec![change]).await?;
        entries
            .pop()
            .ok_or_else(|| LedgerError::Internal("batch returned no entry".into()))
    }

    /// Apply several changes atomically, locking wallets in (account, currency) order.
    async fn apply_batch(&self, changes: Vec<BalanceChange>)
    -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Looked up before funds are reserved for an account.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn account_status(&self, account_id: &str) -> Result<AccountStatus, LedgerError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    pub currency: Option<String>,
    pub entry_type: Option<EntryType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.currency.as_ref().is_none_or(|c| *c == entry.currency)
            && self.entry_type.is_none_or(|t| t == entry.entry_type)
            && self.from.is_none_or(|from| entry.created_at >= from)
            && self.to.is_none_or(|to| entry.created_at < to)
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPage {
    pub entries: Vec<LedgerEntry>,
    pub limit: u32,
    pub offset: u32,
    pub has_more: bool,
}

/// Read side of the append-only journal. Writes go through [`WalletStore`].
#[async_trait]
pub trait LedgerJournal: Send + Sync {
    /// Entries of one account, newest first.
    async fn list_entries(
        &self,
        account_id: &str,
        filter: &EntryFilter,
        page: Page,
    ) -> Result<EntryPage, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(currency: &str, entry_type: EntryType) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            account_id: "alice".into(),
            currency: currency.into(),
            amount: Decimal::ONE,
            balance_after: Decimal::ONE,
            entry_type,
            reference_id: None,
            reference_type: None,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_matching() {
        let e = entry("BTC", EntryType::Deposit);
        assert!(EntryFilter::default().matches(&e));
        let by_currency = EntryFilter {
            currency: Some("ETH".into()),
            ..Default::default()
        };
        assert!(!by_currency.matches(&e));
        let by_type = EntryFilter {
            entry_type: Some(EntryType::Deposit),
            ..Default::default()
        };
        assert!(by_type.matches(&e));
        let future = EntryFilter {
            from: Some(Utc::now() + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(!future.matches(&e));
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(Page::default().limit, DEFAULT_PAGE_SIZE);
        assert_eq!(Page::new(Some(0), None).limit, 1);
        assert_eq!(Page::new(Some(10_000), Some(20)).limit, MAX_PAGE_SIZE);
        assert_eq!(Page::new(Some(10_000), Some(20)).offset, 20);
    }
}
