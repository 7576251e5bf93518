//! Withdrawal Settlement Coordinator
//!
//! Funds are reserved when the withdrawal is requested. Every path into
//! FAILED releases the reservation; COMPLETED removes it from the wallet.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{NewWithdrawal, Withdrawal};
use super::settlement::{SettlementClient, SettlementError, SettlementStatus};
use super::state::WithdrawalStatus;
use super::store::WithdrawalStore;
use crate::config::WithdrawalConfig;
use crate::error::LedgerError;
use crate::money::CurrencyRegistry;
use crate::reservation::ReservationManager;
use crate::retry::RetryPolicy;
use crate::wallet::LedgerEntry;

#[derive(Debug, Clone)]
pub struct SettlementTimeouts {
    pub broadcast: Duration,
    pub confirmation: Duration,
}

impl Default for SettlementTimeouts {
    fn default() -> Self {
        Self {
            broadcast: Duration::from_secs(30),
            confirmation: Duration::from_secs(30),
        }
    }
}

impl From<&WithdrawalConfig> for SettlementTimeouts {
    fn from(config: &WithdrawalConfig) -> Self {
        Self {
            broadcast: Duration::from_millis(config.broadcast_timeout_ms),
            confirmation: Duration::from_millis(config.confirmation_timeout_ms),
        }
    }
}

pub struct WithdrawalSettlementCoordinator {
    store: Arc<dyn WithdrawalStore>,
    reservations: Arc<ReservationManager>,
    currencies: Arc<CurrencyRegistry>,
    settlement: Arc<dyn SettlementClient>,
    timeouts: SettlementTimeouts,
    retry: RetryPolicy,
    fee_account: Option<String>,
}

impl WithdrawalSettlementCoordinator {
    pub fn new(
        store: Arc<dyn WithdrawalStore>,
        reservations: Arc<ReservationManager>,
        currencies: Arc<CurrencyRegistry>,
        settlement: Arc<dyn SettlementClient>,
        timeouts: SettlementTimeouts,
        fee_account: Option<String>,
    ) -> Self {
        Self {
            store,
            reservations,
            currencies,
            settlement,
            timeouts,
            retry: RetryPolicy::none(),
            fee_account,
        }
    }

    /// Retry transient broadcast failures before giving up on this attempt.
    ///
    /// Settlement clients must treat a repeated broadcast of the same
    /// withdrawal id as the same payout.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate, then reserve the gross amount and insert the pending row atomically.
    pub async fn request(&self, request: NewWithdrawal) -> Result<Withdrawal, LedgerError> {
        self.currencies
            .validate_positive(&request.currency, request.amount)?;
        if request.fee.is_sign_negative() {
            return Err(LedgerError::Validation("fee must not be negative".into()));
        }
        if request.fee > Decimal::ZERO {
            self.currencies.validate_precision(&request.currency, request.fee)?;
        }
        if request.fee >= request.amount {
            return Err(LedgerError::Validation("fee must be less than amount".into()));
        }
        if request.destination.trim().is_empty() {
            return Err(LedgerError::Validation("destination must not be empty".into()));
        }
        self.reservations.ensure_active(&request.account_id).await?;

        let withdrawal = self.store.create_withdrawal(request).await?;
        info!(
            withdrawal_id = %withdrawal.id,
            account_id = %withdrawal.account_id,
            currency = %withdrawal.currency,
            amount = %withdrawal.amount,
            fee = %withdrawal.fee,
            "Withdrawal requested, funds reserved"
        );
        Ok(withdrawal)
    }

    pub async fn get(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        self.store.get_withdrawal(id).await
    }

    pub async fn list(&self, status: WithdrawalStatus, limit: usize) -> Result<Vec<Withdrawal>, LedgerError> {
        self.store.list_withdrawals(status, limit).await
    }

    pub async fn approve(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        self.transition(id, WithdrawalStatus::Pending, WithdrawalStatus::Approved)
            .await?;
        info!(withdrawal_id = %id, "Withdrawal approved");
        self.store.get_withdrawal(id).await
    }

    /// approved -> processing, then hand the payout to the settlement collaborator.
    ///
    /// Only a definite rejection fails the withdrawal and releases the
    /// reservation. A timeout or outage that outlasts the retry policy may
    /// still have paid out, so the withdrawal stays processing with funds
    /// reserved until `check_settlement`, a banking event or an operator
    /// resolves it.
    pub async fn process(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        self.transition(id, WithdrawalStatus::Approved, WithdrawalStatus::Processing)
            .await?;
        let withdrawal = self.store.get_withdrawal(id).await?;

        let pending = &withdrawal;
        let broadcast = self
            .retry
            .run("withdrawal broadcast", move || async move {
                tokio::time::timeout(self.timeouts.broadcast, self.settlement.broadcast(pending))
                    .await
                    .unwrap_or(Err(SettlementError::Timeout))
            })
            .await;

        match broadcast {
            Ok(external_ref) => {
                self.store.record_external_ref(id, &external_ref).await?;
                info!(withdrawal_id = %id, external_ref = %external_ref, "Withdrawal broadcast");
                self.store.get_withdrawal(id).await
            }
            Err(SettlementError::Rejected(reason)) => {
                error!(withdrawal_id = %id, reason = %reason, "Withdrawal broadcast rejected");
                self.fail(id, &format!("broadcast rejected: {}", reason)).await
            }
            Err(e) => {
                warn!(
                    withdrawal_id = %id,
                    error = %e,
                    "Withdrawal broadcast outcome unknown, holding reservation"
                );
                Ok(withdrawal)
            }
        }
    }

    /// Poll the collaborator for a processing withdrawal and settle it if final.
    pub async fn check_settlement(&self, id: Uuid) -> Result<Withdrawal, LedgerError> {
        let withdrawal = self.store.get_withdrawal(id).await?;
        if withdrawal.status != WithdrawalStatus::Processing {
            return Ok(withdrawal);
        }
        let status = tokio::time::timeout(
            self.timeouts.confirmation,
            self.settlement.check_status(&withdrawal),
        )
        .await
        .unwrap_or(Err(SettlementError::Timeout))?;

        match status {
            SettlementStatus::Pending => {
                debug!(withdrawal_id = %id, "Withdrawal still settling");
                Ok(withdrawal)
            }
            SettlementStatus::Confirmed => {
                self.complete(id).await?;
                self.store.get_withdrawal(id).await
            }
            SettlementStatus::Failed(reason) => self.fail(id, &reason).await,
        }
    }

    /// processing -> completed; reserved funds leave the wallet.
    pub async fn complete(&self, id: Uuid) -> Result<Vec<LedgerEntry>, LedgerError> {
        match self
            .store
            .complete_withdrawal(id, self.fee_account.as_deref())
            .await?
        {
            Some(entries) => {
                info!(withdrawal_id = %id, entries = entries.len(), "Withdrawal completed");
                Ok(entries)
            }
            None => {
                let current = self.store.get_withdrawal(id).await?;
                Err(LedgerError::InvalidStateTransition(format!(
                    "withdrawal {} is {}, expected processing",
                    id, current.status
                )))
            }
        }
    }

    /// Fail from pending/approved/processing and release the reservation.
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<Withdrawal, LedgerError> {
        match self.store.fail_withdrawal(id, reason).await? {
            Some(withdrawal) => {
                warn!(
                    withdrawal_id = %id,
                    account_id = %withdrawal.account_id,
                    amount = %withdrawal.amount,
                    reason,
                    "Withdrawal failed, reservation released"
                );
                Ok(withdrawal)
            }
            None => {
                let current = self.store.get_withdrawal(id).await?;
                Err(LedgerError::InvalidStateTransition(format!(
                    "withdrawal {} is already {}",
                    id, current.status
                )))
            }
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> Result<(), LedgerError> {
        if self.store.transition_withdrawal(id, from, to).await? {
            return Ok(());
        }
        // CAS lost: report what the row actually is
        let current = self.store.get_withdrawal(id).await?;
        Err(LedgerError::InvalidStateTransition(format!(
            "withdrawal {} is {}, cannot move {} -> {}",
            id, current.status, from, to
        )))
    }
}
