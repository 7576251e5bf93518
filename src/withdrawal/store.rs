use async_trait::async_trait;
use uuid::Uuid;

use super::models::{NewWithdrawal, Withdrawal};
use super::state::WithdrawalStatus;
use crate::error::LedgerError;
use crate::wallet::LedgerEntry;

#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Reserve `amount` on the wallet and insert a pending withdrawal, atomically.
    async fn create_withdrawal(&self, request: NewWithdrawal) -> Result<Withdrawal, LedgerError>;

    async fn get_withdrawal(&self, id: Uuid) -> Result<Withdrawal, LedgerError>;

    /// Oldest first.
    async fn list_withdrawals(
        &self,
        status: WithdrawalStatus,
        limit: usize,
    ) -> Result<Vec<Withdrawal>, LedgerError>;

    /// Compare-and-set status. Returns false if the row was not in `from`.
    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> Result<bool, LedgerError>;

    /// Attach the settlement reference to a processing withdrawal.
    async fn record_external_ref(&self, id: Uuid, external_ref: &str) -> Result<bool, LedgerError>;

    /// In one transaction: move a pending/approved/processing withdrawal to
    /// failed and release its reservation. `None` if it was already terminal.
    async fn fail_withdrawal(&self, id: Uuid, reason: &str) -> Result<Option<Withdrawal>, LedgerError>;

    /// In one transaction: move processing -> completed, remove the reserved
    /// amount from the wallet, and journal the outflow (plus fee entries,
    /// crediting `fee_account` when given). `None` if it was not processing.
    async fn complete_withdrawal(
        &self,
        id: Uuid,
        fee_account: Option<&str>,
    ) -> Result<Option<Vec<LedgerEntry>>, LedgerError>;
}
