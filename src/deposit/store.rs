use async_trait::async_trait;
use uuid::Uuid;

use super::models::{ConfirmationUpdate, Deposit, DepositAddress, NewDeposit};
use crate::error::LedgerError;
use crate::wallet::LedgerEntry;

#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Insert a pending deposit; a repeat of (currency, txid) returns the stored row.
    async fn record_deposit(
        &self,
        deposit: NewDeposit,
        required_confirmations: u64,
    ) -> Result<Deposit, LedgerError>;

    async fn get_deposit(&self, id: Uuid) -> Result<Deposit, LedgerError>;

    async fn list_deposits(&self, account_id: &str, limit: u32) -> Result<Vec<Deposit>, LedgerError>;

    /// Pending and confirmed deposits in the given currencies, oldest first.
    async fn list_active_deposits(
        &self,
        currencies: &[String],
        limit: usize,
    ) -> Result<Vec<Deposit>, LedgerError>;

    /// Store the observed count and promote pending -> confirmed once the threshold is met.
    async fn record_confirmations(
        &self,
        id: Uuid,
        confirmations: u64,
    ) -> Result<ConfirmationUpdate, LedgerError>;

    /// In one transaction: conditionally move confirmed -> credited, credit the
    /// wallet and append the journal entry. `None` if the row was not in
    /// `confirmed` (already credited by someone else, or failed).
    async fn credit_deposit(&self, id: Uuid) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Move a non-terminal deposit to failed. Returns false if it was already terminal.
    async fn fail_deposit(&self, id: Uuid, reason: &str) -> Result<bool, LedgerError>;

    async fn register_address(&self, address: DepositAddress) -> Result<(), LedgerError>;

    async fn deposit_addresses(&self, currency: &str) -> Result<Vec<DepositAddress>, LedgerError>;
}
